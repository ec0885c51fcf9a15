use mirante::core::db::{self, indicator_db_path};
use mirante::core::store::Store;
use mirante::engine::registry::Registry;
use mirante::engine::schedule::{self, TaskPlan};
use mirante::engine::source::{self, DirectoryRecord};
use rusqlite::Connection;
use tempfile::tempdir;

fn setup() -> (tempfile::TempDir, Store, Registry) {
    let tmp = tempdir().unwrap();
    let store = Store::under(tmp.path());
    db::initialize_db(&store).unwrap();
    let registry = Registry::load(&store.root).unwrap();
    (tmp, store, registry)
}

fn open(store: &Store) -> Connection {
    db::db_connect(&indicator_db_path(&store.root).to_string_lossy()).unwrap()
}

#[test]
fn test_replanning_is_idempotent() {
    let (_tmp, store, registry) = setup();
    let plans = schedule::plan_tasks(&registry, 2024, 5);
    assert!(!plans.is_empty());

    schedule::upsert_tasks(&store, &plans).unwrap();
    let first = schedule::list_tasks(&store).unwrap();

    schedule::upsert_tasks(&store, &plans).unwrap();
    let second = schedule::list_tasks(&store).unwrap();

    assert_eq!(first.len(), plans.len());
    assert_eq!(second.len(), first.len());
}

#[test]
fn test_replanning_updates_in_place() {
    let (_tmp, store, registry) = setup();
    let plans = schedule::plan_tasks(&registry, 2024, 5);
    schedule::upsert_tasks(&store, &plans).unwrap();

    // A later plan with a wider window updates params, not row count.
    let wider = schedule::plan_tasks(&registry, 2024, 10);
    schedule::upsert_tasks(&store, &wider).unwrap();

    let tasks = schedule::list_tasks(&store).unwrap();
    assert_eq!(tasks.len(), plans.len());
    let evolution = tasks
        .iter()
        .find(|t| t.name == "production-evolution-use_license")
        .unwrap();
    assert_eq!(evolution.params["start_year"], 2014);
}

#[test]
fn test_run_slots_are_valid_times() {
    let (_tmp, store, registry) = setup();
    let plans = schedule::plan_tasks(&registry, 2024, 5);
    schedule::upsert_tasks(&store, &plans).unwrap();
    for task in schedule::list_tasks(&store).unwrap() {
        assert!((0..24).contains(&task.run_at_hour));
        assert!((0..60).contains(&task.run_at_minute));
        assert!(task.enabled);
    }
}

#[test]
fn test_run_executes_every_combination() {
    let (_tmp, store, registry) = setup();
    let conn = open(&store);
    source::insert_directory(
        &conn,
        source::SourceKind::Education,
        &DirectoryRecord {
            title: "Curso".into(),
            action: Some("educação".into()),
            classification: Some("curso livre".into()),
            practice: Some("X".into()),
            ..Default::default()
        },
    )
    .unwrap();

    let plans = schedule::plan_tasks(&registry, 2024, 5);
    schedule::upsert_tasks(&store, &plans).unwrap();
    let summary = schedule::run_tasks(&store, &registry).unwrap();

    assert_eq!(summary.executed as usize, plans.len());
    assert_eq!(summary.failed, 0);
    assert!(!summary.indicators.is_empty());

    for task in schedule::list_tasks(&store).unwrap() {
        assert_eq!(task.last_status.as_deref(), Some("success"));
        assert!(task.last_run.is_some());
    }
}

#[test]
fn test_one_bad_task_never_aborts_the_batch() {
    let (_tmp, store, registry) = setup();

    let mut plans = vec![TaskPlan {
        name: "broken-task".to_string(),
        operation: "no_such_operation".to_string(),
        params: serde_json::json!({}),
        priority: 0,
        offset_minutes: 1,
    }];
    plans.extend(schedule::plan_tasks(&registry, 2024, 5));
    schedule::upsert_tasks(&store, &plans).unwrap();

    let summary = schedule::run_tasks(&store, &registry).unwrap();
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.executed as usize, plans.len() - 1);

    let tasks = schedule::list_tasks(&store).unwrap();
    let broken = tasks.iter().find(|t| t.name == "broken-task").unwrap();
    assert!(broken.last_status.as_deref().unwrap().starts_with("error"));
}

#[test]
fn test_rerun_grows_version_chains_not_duplicates() {
    let (_tmp, store, registry) = setup();
    let conn = open(&store);
    source::insert_directory(
        &conn,
        source::SourceKind::Education,
        &DirectoryRecord {
            title: "Curso".into(),
            action: Some("educação".into()),
            ..Default::default()
        },
    )
    .unwrap();

    let plans = schedule::plan_tasks(&registry, 2024, 5);
    schedule::upsert_tasks(&store, &plans).unwrap();
    schedule::run_tasks(&store, &registry).unwrap();
    schedule::run_tasks(&store, &registry).unwrap();

    // Every code has exactly one CURRENT version no matter how many runs.
    let over_current: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM (
                SELECT code FROM indicator WHERE validity = 'CURRENT'
                GROUP BY code HAVING COUNT(*) > 1
             )",
            [],
            |r| r.get(0),
        )
        .unwrap();
    assert_eq!(over_current, 0);

    let max_seq: i64 = conn
        .query_row("SELECT MAX(seq) FROM indicator", [], |r| r.get(0))
        .unwrap();
    assert_eq!(max_seq, 2);
}
