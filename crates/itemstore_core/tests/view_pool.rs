use itemstore_core::schema::pim::{pim_schema, NOTE};
use itemstore_core::{Repository, RepositoryConfig, ViewPool};
use std::thread;

#[test]
fn pool_prewarms_views_from_config() {
    let repo = Repository::open_in_memory(pim_schema().unwrap()).unwrap();
    let config = RepositoryConfig {
        pool_prewarm: 3,
        ..RepositoryConfig::default()
    };
    let pool = ViewPool::with_config(repo, &config).unwrap();
    assert_eq!(pool.len(), 3);
    assert_eq!(pool.available(), 3);
    assert_eq!(pool.in_use(), 0);
}

#[test]
fn pool_grows_to_the_number_of_concurrent_borrowers() {
    let repo = Repository::open_in_memory(pim_schema().unwrap()).unwrap();
    let pool = ViewPool::new(repo);

    let a = pool.get_view().unwrap();
    let b = pool.get_view().unwrap();
    assert_ne!(a.name(), b.name());
    assert_eq!(pool.in_use(), 2);

    pool.release_view(a);
    drop(b);
    assert_eq!(pool.len(), 2);
    assert_eq!(pool.available(), 2);
}

#[test]
fn reused_views_are_clean_and_current() {
    let repo = Repository::open_in_memory(pim_schema().unwrap()).unwrap();
    let pool = ViewPool::new(repo.clone());

    {
        let mut view = pool.get_view().unwrap();
        let id = view.create_item(NOTE, None, "left-over").unwrap();
        view.set_value(id, "title", "never committed").unwrap();
    }

    let mut writer = repo.create_view("writer").unwrap();
    let id = writer.create_item(NOTE, None, "shared").unwrap();
    writer.set_value(id, "title", "shared").unwrap();
    writer.commit().unwrap();

    let mut view = pool.get_view().unwrap();
    assert!(!view.has_pending_changes());
    assert_eq!(view.version(), 1);
    assert_eq!(view.roots().unwrap(), vec![id]);
}

#[test]
fn threads_commit_through_pooled_views() {
    let repo = Repository::open_in_memory(pim_schema().unwrap()).unwrap();
    let pool = ViewPool::new(repo.clone());

    thread::scope(|scope| {
        for worker in 0..4 {
            let pool = &pool;
            scope.spawn(move || {
                for round in 0..5 {
                    let mut view = pool.get_view().unwrap();
                    let name = format!("w{worker}-r{round}");
                    let id = view.create_item(NOTE, None, &name).unwrap();
                    view.set_value(id, "title", name.as_str()).unwrap();
                    view.commit().unwrap();
                }
            });
        }
    });

    assert!(pool.len() <= 4);
    assert_eq!(pool.in_use(), 0);
    assert_eq!(repo.current_version().unwrap(), 20);
    let mut view = pool.get_view().unwrap();
    assert_eq!(view.roots().unwrap().len(), 20);
}
