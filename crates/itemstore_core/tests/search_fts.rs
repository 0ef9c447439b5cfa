use itemstore_core::schema::pim::{pim_schema, EVENT, NOTE};
use itemstore_core::{Repository, RepositoryView, SearchQuery};
use std::sync::Arc;
use uuid::Uuid;

fn repo() -> Arc<Repository> {
    Repository::open_in_memory(pim_schema().unwrap()).unwrap()
}

fn add(view: &mut RepositoryView, kind: &str, name: &str, title: &str) -> Uuid {
    let id = view.create_item(kind, None, name).unwrap();
    view.set_value(id, "title", title).unwrap();
    id
}

#[test]
fn committed_items_are_searchable() {
    let repo = repo();
    let mut view = repo.create_view("main").unwrap();
    let id = add(&mut view, NOTE, "rust-notes", "hello rust search");
    view.commit().unwrap();

    let hits = view.search_items("rust", 10).unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].item_id, id);
    assert_eq!(hits[0].kind, NOTE);
    assert!(hits[0].snippet.contains("[rust]"));
}

#[test]
fn uncommitted_text_is_not_searched() {
    let repo = repo();
    let mut view = repo.create_view("main").unwrap();
    add(&mut view, NOTE, "draft", "secret plans");
    assert!(view.search_items("secret", 10).unwrap().is_empty());
}

#[test]
fn updates_replace_the_searchable_text() {
    let repo = repo();
    let mut view = repo.create_view("main").unwrap();
    let id = add(&mut view, NOTE, "memo", "alpha text");
    view.commit().unwrap();

    view.set_value(id, "title", "beta text").unwrap();
    view.commit().unwrap();

    assert!(view.search_items("alpha", 10).unwrap().is_empty());
    let hits = view.search_items("beta", 10).unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].item_id, id);
}

#[test]
fn searches_are_pinned_to_the_view_version() {
    let repo = repo();
    let mut writer = repo.create_view("writer").unwrap();
    let id = add(&mut writer, NOTE, "memo", "alpha text");
    writer.commit().unwrap();

    let mut reader = repo.create_view("reader").unwrap();
    writer.set_value(id, "title", "beta text").unwrap();
    writer.commit().unwrap();

    assert_eq!(reader.search_items("alpha", 10).unwrap().len(), 1);
    assert!(reader.search_items("beta", 10).unwrap().is_empty());

    reader.refresh().unwrap();
    assert!(reader.search_items("alpha", 10).unwrap().is_empty());
    assert_eq!(reader.search_items("beta", 10).unwrap().len(), 1);
}

#[test]
fn deleted_items_drop_out_of_results() {
    let repo = repo();
    let mut view = repo.create_view("main").unwrap();
    let id = add(&mut view, EVENT, "shopping", "buy milk tomorrow");
    view.commit().unwrap();

    view.delete_item(id, false).unwrap();
    view.commit().unwrap();
    assert!(view.search_items("milk", 10).unwrap().is_empty());
}

#[test]
fn every_term_must_match_and_limit_caps_hits() {
    let repo = repo();
    let mut view = repo.create_view("main").unwrap();
    add(&mut view, NOTE, "one", "plan meeting agenda");
    add(&mut view, NOTE, "two", "plan vacation");
    add(&mut view, EVENT, "three", "plan meeting room");
    view.commit().unwrap();

    assert_eq!(view.search_items("plan meeting", 10).unwrap().len(), 2);
    assert_eq!(view.search_items("plan", 2).unwrap().len(), 2);
    assert!(view.search_items("plan", 0).unwrap().is_empty());
    assert!(view.search_items("   ", 10).unwrap().is_empty());
}

#[test]
fn fts_operators_in_plain_text_are_matched_literally() {
    let repo = repo();
    let mut view = repo.create_view("main").unwrap();
    add(&mut view, NOTE, "quotes", r#"say "hi" OR wave"#);
    view.commit().unwrap();

    let hits = view.search_items(r#""hi" OR"#, 10).unwrap();
    assert_eq!(hits.len(), 1);
}

#[test]
fn kind_filter_keeps_hits_of_that_kind() {
    let repo = repo();
    let mut view = repo.create_view("main").unwrap();
    let note = add(&mut view, NOTE, "minutes", "quarterly review notes");
    let event = add(&mut view, EVENT, "review", "quarterly review meeting");
    view.commit().unwrap();

    let all = view.search(&SearchQuery::new("quarterly review")).unwrap();
    assert_eq!(all.len(), 2);

    let events = view
        .search(&SearchQuery::new("quarterly review").with_kind(EVENT))
        .unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].item_id, event);
    assert_eq!(events[0].kind, EVENT);

    let notes = view
        .search(&SearchQuery::new("review").with_kind(NOTE).with_limit(5))
        .unwrap();
    assert_eq!(notes.iter().map(|hit| hit.item_id).collect::<Vec<_>>(), vec![note]);
}
