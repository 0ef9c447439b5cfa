use itemstore_core::schema::pim::{pim_schema, CONTACT, EVENT, NOTE};
use itemstore_core::schema::registry::ITEM_KIND_PATH;
use itemstore_core::{
    RepoError, Repository, RepositoryView, SchemaError, Value, ViewError,
};
use std::collections::BTreeMap;
use std::sync::Arc;

fn repo() -> Arc<Repository> {
    Repository::open_in_memory(pim_schema().unwrap()).unwrap()
}

fn note(view: &mut RepositoryView, parent: Option<uuid::Uuid>, name: &str) -> uuid::Uuid {
    let id = view.create_item(NOTE, parent, name).unwrap();
    view.set_value(id, "title", name).unwrap();
    id
}

#[test]
fn created_items_form_a_named_tree() {
    let repo = repo();
    let mut view = repo.create_view("main").unwrap();
    let inbox = view.create_item(ITEM_KIND_PATH, None, "inbox").unwrap();
    let b = note(&mut view, Some(inbox), "b");
    let a = note(&mut view, Some(inbox), "a");

    assert_eq!(view.roots().unwrap(), vec![inbox]);
    assert_eq!(view.children(Some(inbox)).unwrap(), vec![a, b]);
    assert_eq!(view.find_path("/inbox/b").unwrap(), Some(b));
    assert_eq!(view.find_path("inbox/missing").unwrap(), None);
    assert_eq!(view.item_path(a).unwrap(), "/inbox/a");
    assert!(view.is_item_of(a, "pim/ContentItem").unwrap());
    assert!(!view.is_item_of(a, EVENT).unwrap());
}

#[test]
fn sibling_names_must_be_unique() {
    let repo = repo();
    let mut view = repo.create_view("main").unwrap();
    let first = note(&mut view, None, "todo");
    let other = note(&mut view, None, "other");

    let err = view.create_item(NOTE, None, "todo").unwrap_err();
    assert!(matches!(err, RepoError::View(ViewError::DuplicateName { .. })));

    let err = view.rename_item(other, "todo").unwrap_err();
    assert!(matches!(err, RepoError::View(ViewError::DuplicateName { .. })));

    view.rename_item(first, "done").unwrap();
    view.rename_item(other, "todo").unwrap();
    assert_eq!(view.find_path("todo").unwrap(), Some(other));
}

#[test]
fn invalid_names_are_rejected() {
    let repo = repo();
    let mut view = repo.create_view("main").unwrap();
    for name in ["", "a/b"] {
        let err = view.create_item(NOTE, None, name).unwrap_err();
        assert!(
            matches!(err, RepoError::View(ViewError::InvalidName(_))),
            "{name:?}: {err}"
        );
    }
}

#[test]
fn items_cannot_move_below_themselves() {
    let repo = repo();
    let mut view = repo.create_view("main").unwrap();
    let top = view.create_item(ITEM_KIND_PATH, None, "top").unwrap();
    let middle = view.create_item(ITEM_KIND_PATH, Some(top), "middle").unwrap();
    let leaf = note(&mut view, Some(middle), "leaf");

    let err = view.move_item(top, Some(leaf)).unwrap_err();
    assert!(matches!(
        err,
        RepoError::View(ViewError::MoveIntoDescendant { .. })
    ));

    view.move_item(leaf, None).unwrap();
    assert_eq!(view.item_path(leaf).unwrap(), "/leaf");
    assert!(view.children(Some(middle)).unwrap().is_empty());
}

#[test]
fn values_are_checked_against_attribute_definitions() {
    let repo = repo();
    let mut view = repo.create_view("main").unwrap();
    let id = note(&mut view, None, "groceries");

    let err = view.set_value(id, "title", 42_i64).unwrap_err();
    assert!(matches!(err, RepoError::Schema(SchemaError::TypeMismatch { .. })));

    let err = view.set_value(id, "colour", "red").unwrap_err();
    assert!(matches!(
        err,
        RepoError::Schema(SchemaError::UnknownAttribute { .. })
    ));

    view.add_value(id, "tags", "home").unwrap();
    view.add_value(id, "tags", "errands").unwrap();
    assert_eq!(
        view.get_value(id, "tags").unwrap(),
        Some(Value::List(vec![Value::from("home"), Value::from("errands")]))
    );

    let err = view.add_value(id, "title", "again").unwrap_err();
    assert!(matches!(
        err,
        RepoError::Schema(SchemaError::CardinalityMismatch { .. })
    ));
}

#[test]
fn defaults_fill_unset_values_but_do_not_count_as_stored() {
    let repo = repo();
    let mut view = repo.create_view("main").unwrap();
    let event = view.create_item(EVENT, None, "standup").unwrap();

    assert_eq!(
        view.get_value(event, "all_day").unwrap(),
        Some(Value::Boolean(false))
    );
    assert!(!view.has_value(event, "all_day").unwrap());
    assert_eq!(view.get_value(event, "location").unwrap(), None);

    view.set_value(event, "all_day", true).unwrap();
    assert!(view.has_value(event, "all_day").unwrap());
    assert!(view.remove_value(event, "all_day").unwrap());
    assert!(!view.remove_value(event, "all_day").unwrap());
}

#[test]
fn dict_values_are_set_per_key() {
    let repo = repo();
    let mut view = repo.create_view("main").unwrap();
    let contact = view.create_item(CONTACT, None, "ada").unwrap();
    view.set_dict_value(contact, "phones", "home", "555-0100")
        .unwrap();
    view.set_dict_value(contact, "phones", "work", "555-0199")
        .unwrap();

    let expected: BTreeMap<String, Value> = [
        ("home".to_string(), Value::from("555-0100")),
        ("work".to_string(), Value::from("555-0199")),
    ]
    .into_iter()
    .collect();
    assert_eq!(
        view.get_value(contact, "phones").unwrap(),
        Some(Value::Dict(expected))
    );
}

#[test]
fn reference_attributes_are_not_values() {
    let repo = repo();
    let mut view = repo.create_view("main").unwrap();
    let event = view.create_item(EVENT, None, "review").unwrap();
    let err = view.get_value(event, "attendees").unwrap_err();
    assert!(matches!(err, RepoError::Schema(SchemaError::NotAValue { .. })));
}

#[test]
fn deleting_requires_recursion_for_parents() {
    let repo = repo();
    let mut view = repo.create_view("main").unwrap();
    let folder = view.create_item(ITEM_KIND_PATH, None, "folder").unwrap();
    let child = note(&mut view, Some(folder), "child");

    let err = view.delete_item(folder, false).unwrap_err();
    assert!(matches!(err, RepoError::View(ViewError::HasChildren(_))));

    view.delete_item(folder, true).unwrap();
    assert!(view.get_item(folder).unwrap().is_none());
    assert!(view.get_item(child).unwrap().is_none());
    assert!(matches!(
        view.item(child).unwrap_err(),
        RepoError::View(ViewError::ItemNotFound(_))
    ));
    assert!(view.roots().unwrap().is_empty());
}

#[test]
fn closed_view_refuses_every_operation() {
    let repo = repo();
    let mut view = repo.create_view("main").unwrap();
    let id = note(&mut view, None, "draft");
    view.close();
    view.close();

    assert!(!view.is_open());
    assert!(matches!(
        view.item(id).unwrap_err(),
        RepoError::View(ViewError::Closed(_))
    ));
    assert!(matches!(
        view.commit().unwrap_err(),
        RepoError::View(ViewError::Closed(_))
    ));
}

#[test]
fn missing_required_value_fails_the_commit() {
    let repo = repo();
    let mut view = repo.create_view("main").unwrap();
    view.create_item(NOTE, None, "untitled").unwrap();

    let err = view.commit().unwrap_err();
    assert!(matches!(
        err,
        RepoError::Schema(SchemaError::MissingRequired { .. })
    ));
    assert!(view.has_pending_changes());
    assert_eq!(repo.current_version().unwrap(), 0);
}
