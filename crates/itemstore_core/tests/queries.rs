use itemstore_core::schema::pim::{pim_schema, CONTACT, CONTENT_ITEM, EVENT, NOTE};
use itemstore_core::{
    AccessPath, Predicate, Query, QueryError, QueryPlan, QuerySource, RepoError, Repository,
    RepositoryView, SchemaError, Value,
};
use std::sync::Arc;
use uuid::Uuid;

struct Fixture {
    repo: Arc<Repository>,
    groceries: Uuid,
    journal: Uuid,
    standup: Uuid,
    offsite: Uuid,
    ada: Uuid,
}

fn fixture() -> Fixture {
    let repo = Repository::open_in_memory(pim_schema().unwrap()).unwrap();
    let mut view = repo.create_view("setup").unwrap();

    let groceries = content(&mut view, NOTE, "groceries", "Buy milk");
    view.add_value(groceries, "tags", "home").unwrap();
    let journal = content(&mut view, NOTE, "journal", "Dear diary");
    let standup = content(&mut view, EVENT, "standup", "Daily standup");
    view.set_value(standup, "start", Value::DateTime(1_000)).unwrap();
    view.set_value(standup, "location", "Room 4").unwrap();
    let offsite = content(&mut view, EVENT, "offsite", "Team offsite");
    view.set_value(offsite, "start", Value::DateTime(5_000)).unwrap();
    view.set_value(offsite, "all_day", true).unwrap();

    let ada = view.create_item(CONTACT, None, "ada").unwrap();
    view.set_value(ada, "display_name", "Ada").unwrap();
    view.add_ref(standup, "attendees", ada).unwrap();
    view.commit().unwrap();

    Fixture {
        repo,
        groceries,
        journal,
        standup,
        offsite,
        ada,
    }
}

fn content(view: &mut RepositoryView, kind: &str, name: &str, title: &str) -> Uuid {
    let id = view.create_item(kind, None, name).unwrap();
    view.set_value(id, "title", title).unwrap();
    id
}

fn sorted(mut ids: Vec<Uuid>) -> Vec<Uuid> {
    ids.sort();
    ids
}

#[test]
fn exact_and_recursive_kind_sources() {
    let fx = fixture();
    let mut view = fx.repo.create_view("q").unwrap();

    let notes = view.query(r#"for i in "pim/Note""#, &[]).unwrap();
    assert_eq!(notes, sorted(vec![fx.groceries, fx.journal]));

    let exact = view.query(r#"for i in "pim/ContentItem""#, &[]).unwrap();
    assert!(exact.is_empty());

    let all = view.query(r#"for i inevery "pim/ContentItem""#, &[]).unwrap();
    assert_eq!(
        all,
        sorted(vec![fx.groceries, fx.journal, fx.standup, fx.offsite])
    );
}

#[test]
fn predicates_filter_with_parameters() {
    let fx = fixture();
    let mut view = fx.repo.create_view("q").unwrap();

    let hits = view
        .query(r#"for i in "pim/Note" where i.title == $1"#, &[Value::from("Dear diary")])
        .unwrap();
    assert_eq!(hits, vec![fx.journal]);

    let hits = view
        .query(
            r#"for e in "pim/Event" where e.start >= @2000 or contains(e.location, "Room")"#,
            &[],
        )
        .unwrap();
    assert_eq!(hits, sorted(vec![fx.standup, fx.offsite]));

    let hits = view
        .query(r#"for e in "pim/Event" where e.all_day == False"#, &[])
        .unwrap();
    assert_eq!(hits, vec![fx.standup]);

    let hits = view
        .query(
            r#"for i inevery $1 where contains(i.tags, "home") or matches(i.title, "^Team")"#,
            &[Value::from(CONTENT_ITEM)],
        )
        .unwrap();
    assert_eq!(hits, sorted(vec![fx.groceries, fx.offsite]));

    let hits = view
        .query(r#"for e in "pim/Event" where len(e.attendees) > 0"#, &[])
        .unwrap();
    assert_eq!(hits, vec![fx.standup]);
}

#[test]
fn reference_sources_follow_collections() {
    let fx = fixture();
    let mut view = fx.repo.create_view("q").unwrap();
    let hits = view
        .query(r#"for e in $1.events where has(e.location)"#, &[Value::Uuid(fx.ada)])
        .unwrap();
    assert_eq!(hits, vec![fx.standup]);

    let item_source = format!(r#"for c in item("{}").attendees"#, fx.standup);
    assert_eq!(view.query(&item_source, &[]).unwrap(), vec![fx.ada]);
}

#[test]
fn set_operations_combine_results() {
    let fx = fixture();
    let mut view = fx.repo.create_view("q").unwrap();

    let hits = view
        .query(
            r#"union(for i in "pim/Event" where i.all_day == True, for i in "pim/Note" where i.itsName == "journal")"#,
            &[],
        )
        .unwrap();
    assert_eq!(hits, vec![fx.offsite, fx.journal]);

    let hits = view
        .query(
            r#"intersect(for i inevery "pim/ContentItem", index("events"))"#,
            &[],
        )
        .map(sorted);
    assert!(hits.is_err(), "index() is a source, not a plan");

    let hits = view
        .query(
            r#"intersect(for i inevery "pim/ContentItem", for i in index("events"))"#,
            &[],
        )
        .unwrap();
    assert_eq!(sorted(hits), sorted(vec![fx.standup, fx.offsite]));

    let hits = view
        .query(
            r#"difference(for i in index("events"), for i in $1.events)"#,
            &[Value::Uuid(fx.ada)],
        )
        .unwrap();
    assert_eq!(hits, vec![fx.offsite]);
}

#[test]
fn queries_see_uncommitted_changes_of_their_view() {
    let fx = fixture();
    let mut view = fx.repo.create_view("q").unwrap();
    let draft = content(&mut view, NOTE, "draft", "Dear diary");
    view.delete_item(fx.journal, false).unwrap();

    let hits = view
        .query(r#"for i in "pim/Note" where i.title == "Dear diary""#, &[])
        .unwrap();
    assert_eq!(hits, vec![draft]);

    let mut other = fx.repo.create_view("other").unwrap();
    let hits = other
        .query(r#"for i in "pim/Note" where i.title == "Dear diary""#, &[])
        .unwrap();
    assert_eq!(hits, vec![fx.journal]);
}

#[test]
fn built_plans_match_parsed_ones() {
    let fx = fixture();
    let mut view = fx.repo.create_view("q").unwrap();
    let plan: QueryPlan = Query::new(
        QuerySource::exact(NOTE),
        Predicate::attr_eq("title", "Buy milk"),
    )
    .into();
    assert_eq!(view.run_query(&plan, &[]).unwrap(), vec![fx.groceries]);
}

#[test]
fn explain_reports_index_and_kind_scans() {
    let fx = fixture();
    let view = fx.repo.create_view("q").unwrap();
    let plan = itemstore_core::parse_query(
        r#"union(for e inevery "pim/Event", for n in "pim/Note", for e in $1.events)"#,
    )
    .unwrap();
    let paths = view.explain(&plan, &[Value::Uuid(fx.ada)]).unwrap();
    assert_eq!(
        paths,
        vec![
            AccessPath::IndexScan {
                index: "events".to_string()
            },
            AccessPath::KindScan {
                kinds: vec![NOTE.to_string()]
            },
            AccessPath::Refs {
                owner: fx.ada,
                attribute: "events".to_string()
            },
        ]
    );
}

#[test]
fn bad_queries_fail_before_reading_items() {
    let fx = fixture();
    let mut view = fx.repo.create_view("q").unwrap();

    let err = view
        .query(r#"for i in "pim/Note" where i.colour == "red""#, &[])
        .unwrap_err();
    assert!(matches!(
        err,
        RepoError::Schema(SchemaError::UnknownAttribute { .. })
    ));

    let err = view
        .query(r#"for i in "pim/Note" where i.title == $2"#, &[Value::from("x")])
        .unwrap_err();
    assert!(matches!(
        err,
        RepoError::Query(QueryError::UnboundParameter(2))
    ));

    let err = view
        .query(r#"for i in "pim/Note" where matches(i.title, "(")"#, &[])
        .unwrap_err();
    assert!(matches!(
        err,
        RepoError::Query(QueryError::InvalidRegex { .. })
    ));

    let err = view.query(r#"for i in "pim/Nope""#, &[]).unwrap_err();
    assert!(matches!(err, RepoError::Schema(SchemaError::UnknownKind(_))));

    let err = view.query(r#"for i in $1"#, &[Value::Integer(3)]).unwrap_err();
    assert!(matches!(
        err,
        RepoError::Query(QueryError::InvalidParameter { index: 1, .. })
    ));
}
