use itemstore_core::schema::pim::{pim_schema, NOTE};
use itemstore_core::{
    LoggingConfig, RepoError, Repository, RepositoryConfig, RepositoryView, Value, ViewError,
};
use std::sync::Arc;
use uuid::Uuid;

fn repo() -> Arc<Repository> {
    Repository::open_in_memory(pim_schema().unwrap()).unwrap()
}

fn note(view: &mut RepositoryView, name: &str) -> Uuid {
    let id = view.create_item(NOTE, None, name).unwrap();
    view.set_value(id, "title", name).unwrap();
    id
}

fn title(view: &mut RepositoryView, id: Uuid) -> Option<Value> {
    view.get_value(id, "title").unwrap()
}

#[test]
fn commits_are_invisible_to_other_views_until_refresh() {
    let repo = repo();
    let mut writer = repo.create_view("writer").unwrap();
    let mut reader = repo.create_view("reader").unwrap();

    let id = note(&mut writer, "memo");
    assert_eq!(writer.commit().unwrap(), 1);
    assert_eq!(repo.current_version().unwrap(), 1);

    assert!(reader.get_item(id).unwrap().is_none());
    assert_eq!(reader.refresh().unwrap(), 1);
    assert_eq!(reader.version(), 1);
    assert_eq!(title(&mut reader, id), Some(Value::from("memo")));

    writer.set_value(id, "title", "edited").unwrap();
    writer.commit().unwrap();
    assert_eq!(title(&mut reader, id), Some(Value::from("memo")));
    reader.refresh().unwrap();
    assert_eq!(title(&mut reader, id), Some(Value::from("edited")));
}

#[test]
fn committing_without_changes_keeps_the_version() {
    let repo = repo();
    let mut view = repo.create_view("main").unwrap();
    assert_eq!(view.commit().unwrap(), 0);
    note(&mut view, "memo");
    assert_eq!(view.commit().unwrap(), 1);
    assert_eq!(view.commit().unwrap(), 1);
}

#[test]
fn cancel_discards_pending_changes() {
    let repo = repo();
    let mut view = repo.create_view("main").unwrap();
    let kept = note(&mut view, "kept");
    view.commit().unwrap();

    let dropped = note(&mut view, "dropped");
    view.set_value(kept, "title", "changed").unwrap();
    assert_eq!(view.pending_count(), 2);
    view.cancel().unwrap();

    assert!(!view.has_pending_changes());
    assert!(view.get_item(dropped).unwrap().is_none());
    assert_eq!(title(&mut view, kept), Some(Value::from("kept")));
}

#[test]
fn concurrent_edits_of_one_item_conflict() {
    let repo = repo();
    let mut setup = repo.create_view("setup").unwrap();
    let id = note(&mut setup, "memo");
    setup.commit().unwrap();

    let mut first = repo.create_view("first").unwrap();
    let mut second = repo.create_view("second").unwrap();
    first.set_value(id, "title", "first").unwrap();
    second.set_value(id, "title", "second").unwrap();
    first.commit().unwrap();

    match second.commit().unwrap_err() {
        RepoError::View(ViewError::VersionConflict { view, items }) => {
            assert_eq!(view, "second");
            assert_eq!(items, vec![id]);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(matches!(
        second.refresh().unwrap_err(),
        RepoError::View(ViewError::VersionConflict { .. })
    ));

    second.cancel().unwrap();
    second.refresh().unwrap();
    assert_eq!(title(&mut second, id), Some(Value::from("first")));
}

#[test]
fn conflicting_refresh_leaves_the_view_untouched() {
    let repo = repo();
    let mut setup = repo.create_view("setup").unwrap();
    let id = note(&mut setup, "memo");
    setup.commit().unwrap();

    let mut stale = repo.create_view("stale").unwrap();
    let mut other = repo.create_view("other").unwrap();
    stale.set_value(id, "title", "mine").unwrap();
    let draft = note(&mut stale, "draft");
    other.set_value(id, "title", "theirs").unwrap();
    other.commit().unwrap();

    let version = stale.version();
    assert!(stale.refresh().is_err());
    assert_eq!(stale.version(), version);
    assert_eq!(stale.pending_count(), 2);
    assert!(stale.has_pending_changes());
    assert_eq!(title(&mut stale, id), Some(Value::from("mine")));
    assert_eq!(title(&mut stale, draft), Some(Value::from("draft")));
}

#[test]
fn disjoint_edits_merge_on_commit() {
    let repo = repo();
    let mut setup = repo.create_view("setup").unwrap();
    let a = note(&mut setup, "a");
    let b = note(&mut setup, "b");
    setup.commit().unwrap();

    let mut first = repo.create_view("first").unwrap();
    let mut second = repo.create_view("second").unwrap();
    first.set_value(a, "body", "from first").unwrap();
    second.set_value(b, "body", "from second").unwrap();
    assert_eq!(first.commit().unwrap(), 2);
    assert_eq!(second.commit().unwrap(), 3);

    assert_eq!(
        second.get_value(a, "body").unwrap(),
        Some(Value::from("from first"))
    );
}

#[test]
fn names_taken_by_another_commit_are_refused() {
    let repo = repo();
    let mut first = repo.create_view("first").unwrap();
    let mut second = repo.create_view("second").unwrap();
    note(&mut first, "inbox");
    note(&mut second, "inbox");
    first.commit().unwrap();

    let err = second.commit().unwrap_err();
    assert!(matches!(err, RepoError::View(ViewError::DuplicateName { .. })));
    assert_eq!(repo.current_version().unwrap(), 1);
}

#[test]
fn file_repository_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let config = RepositoryConfig {
        logging: Some(LoggingConfig::with_default_level(dir.path().join("logs"))),
        ..RepositoryConfig::at_path(dir.path().join("items.db"))
    };

    let id = {
        let repo = Repository::open(&config, pim_schema().unwrap()).unwrap();
        let mut view = repo.create_view("first").unwrap();
        let id = note(&mut view, "persisted");
        view.add_value(id, "tags", "kept").unwrap();
        view.commit().unwrap();
        id
    };

    let repo = Repository::open(&config, pim_schema().unwrap()).unwrap();
    assert_eq!(repo.current_version().unwrap(), 1);
    let mut view = repo.create_view("second").unwrap();
    assert_eq!(view.find_path("persisted").unwrap(), Some(id));
    assert_eq!(
        view.get_value(id, "tags").unwrap(),
        Some(Value::List(vec![Value::from("kept")]))
    );
}
