use mirante::core::db::{self, indicator_db_path};
use mirante::core::store::Store;
use mirante::engine::chain::{self, NewRecord};
use mirante::engine::compute;
use mirante::engine::record;
use mirante::engine::registry::Registry;
use mirante::engine::source::{self, ArticleRecord, DirectoryRecord, InstitutionInput};
use rusqlite::Connection;
use serde_json::Value;
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

fn seed_education(conn: &Connection, n: usize) {
    for _ in 0..n {
        source::insert_directory(
            conn,
            source::SourceKind::Education,
            &DirectoryRecord {
                title: "Curso de ciência aberta".into(),
                action: Some("educação".into()),
                classification: Some("curso livre".into()),
                practice: Some("X".into()),
                ..Default::default()
            },
        )
        .unwrap();
    }
}

fn seed_articles(conn: &Connection) {
    for (year, oa, license, inst, state) in [
        (2022, "gold", "CC-BY", "USP", "SP"),
        (2022, "gold", "CC-BY", "USP", "SP"),
        (2023, "green", "CC-BY", "UFRGS", "RS"),
        (2023, "closed", "CC0", "USP", "SP"),
    ] {
        source::insert_article(
            conn,
            &ArticleRecord {
                doi: Some("10.1590/x".into()),
                journal: Some(format!("Revista {}", inst)),
                year: Some(year),
                open_access_status: Some(oa.into()),
                use_license: Some(license.into()),
                affiliation_institution: Some(inst.into()),
                affiliation_state: Some(state.into()),
                affiliation_country: Some("BR".into()),
                ..Default::default()
            },
        )
        .unwrap();
    }
}

#[test]
fn test_base_ranking_scenario() {
    let (_tmp, store, registry) = setup();
    let conn = open(&store);
    seed_education(&conn, 3);

    let ids = compute::directory_counts(&store, &registry, None, None).unwrap();
    assert_eq!(ids.len(), 1);

    let version = chain::get_version(&conn, &ids[0]).unwrap().unwrap();
    assert_eq!(version.record_status, "PUBLISHED");
    assert_eq!(version.validity, Some("CURRENT".to_string()));
    assert_eq!(version.seq, 1);
    assert_eq!(version.code.len(), 64);

    let computed: Value = serde_json::from_str(version.computed.as_deref().unwrap()).unwrap();
    let items = computed["items"].as_array().unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["name"], "educação | curso livre");
    assert_eq!(items[0]["count"], 3);
}

#[test]
fn test_idempotent_rerun_supersedes_previous() {
    let (_tmp, store, registry) = setup();
    let conn = open(&store);
    seed_education(&conn, 3);

    let first = compute::directory_counts(&store, &registry, None, None).unwrap();
    let second = compute::directory_counts(&store, &registry, None, None).unwrap();

    let v1 = chain::get_version(&conn, &first[0]).unwrap().unwrap();
    let v2 = chain::get_version(&conn, &second[0]).unwrap().unwrap();

    assert_eq!(v1.code, v2.code);
    assert_eq!(v1.seq, 1);
    assert_eq!(v2.seq, 2);
    assert_eq!(v1.validity, Some("OUTDATED".to_string()));
    assert_eq!(v1.posterior_id, Some(v2.id.clone()));
    assert_eq!(v2.previous_id, Some(v1.id.clone()));
    assert_eq!(v2.validity, Some("CURRENT".to_string()));

    let rows: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM indicator WHERE code = ?1",
            [&v1.code],
            |r| r.get(0),
        )
        .unwrap();
    assert_eq!(rows, 2);
}

#[test]
fn test_wip_exclusivity_blocks_pipeline() {
    let (_tmp, store, registry) = setup();
    let conn = open(&store);
    seed_education(&conn, 1);

    // Park a WIP version on the code the pipeline is about to claim.
    let code = mirante::engine::code::build_code(&mirante::engine::code::CodeParams {
        measurement: Some(mirante::engine::Measurement::Frequency),
        object_name: "action",
        category1: Some("CA_ACTION"),
        ..Default::default()
    });
    chain::create_record(
        &conn,
        &NewRecord {
            code: &code,
            title: "stale computation",
            ..Default::default()
        },
    )
    .unwrap();

    let err = compute::directory_counts(&store, &registry, None, None).unwrap_err();
    assert!(matches!(
        err,
        mirante::core::error::MiranteError::CreateIndicatorRecordError(_)
    ));
    let rows: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM indicator WHERE code = ?1",
            [&code],
            |r| r.get(0),
        )
        .unwrap();
    assert_eq!(rows, 1);
}

#[test]
fn test_chain_integrity_across_three_runs() {
    let (_tmp, store, registry) = setup();
    let conn = open(&store);
    seed_education(&conn, 2);

    for _ in 0..3 {
        compute::directory_counts(&store, &registry, None, None).unwrap();
    }

    let code: String = conn
        .query_row("SELECT code FROM indicator LIMIT 1", [], |r| r.get(0))
        .unwrap();
    let seqs: Vec<i64> = conn
        .prepare("SELECT seq FROM indicator WHERE code = ?1 ORDER BY seq")
        .unwrap()
        .query_map([&code], |r| r.get(0))
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(seqs, vec![1, 2, 3]);

    let current: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM indicator WHERE code = ?1 AND validity = 'CURRENT'",
            [&code],
            |r| r.get(0),
        )
        .unwrap();
    assert_eq!(current, 1);
}

#[test]
fn test_sparse_payload_invariant() {
    let (_tmp, store, registry) = setup();
    let conn = open(&store);
    seed_education(&conn, 3);
    seed_articles(&conn);

    compute::directory_counts(&store, &registry, None, None).unwrap();
    compute::directory_counts(&store, &registry, Some("CA_PRACTICE"), None).unwrap();
    compute::journal_counts(&store, &registry, "OPEN_ACCESS_STATUS", None).unwrap();
    compute::production_evolution(&store, &registry, "USE_LICENSE", None, 2021, 2023).unwrap();

    let payloads: Vec<String> = conn
        .prepare("SELECT computed FROM indicator WHERE computed IS NOT NULL")
        .unwrap()
        .query_map([], |r| r.get(0))
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert!(!payloads.is_empty());
    for payload in payloads {
        let value: Value = serde_json::from_str(&payload).unwrap();
        for item in value["items"].as_array().unwrap() {
            assert!(item["count"].as_i64().unwrap() > 0);
        }
    }
}

#[test]
fn test_context_slicing_creates_one_indicator_per_value() {
    let (_tmp, store, registry) = setup();
    let conn = open(&store);

    let usp = InstitutionInput {
        name: "USP".into(),
        city: Some("São Paulo".into()),
        state: Some("SP".into()),
        ..Default::default()
    };
    // USP reported by an education record and, under the organization
    // naming, by an event record; UFRGS by education only.
    source::insert_directory(
        &conn,
        source::SourceKind::Education,
        &DirectoryRecord {
            title: "curso".into(),
            action: Some("educação".into()),
            institutions: vec![usp.clone()],
            ..Default::default()
        },
    )
    .unwrap();
    source::insert_directory(
        &conn,
        source::SourceKind::Event,
        &DirectoryRecord {
            title: "encontro".into(),
            action: Some("educação".into()),
            institutions: vec![usp],
            ..Default::default()
        },
    )
    .unwrap();
    source::insert_directory(
        &conn,
        source::SourceKind::Education,
        &DirectoryRecord {
            title: "outro curso".into(),
            action: Some("educação".into()),
            institutions: vec![InstitutionInput {
                name: "UFRGS".into(),
                ..Default::default()
            }],
            ..Default::default()
        },
    )
    .unwrap();

    let ids = compute::directory_counts(&store, &registry, None, Some("INSTITUTION")).unwrap();
    assert_eq!(ids.len(), 2);

    // The USP indicator unions the education and event counts.
    let mut totals = Vec::new();
    for id in &ids {
        let version = chain::get_version(&conn, id).unwrap().unwrap();
        assert_eq!(version.scope, Some("INSTITUTIONAL".to_string()));
        let computed: Value = serde_json::from_str(version.computed.as_deref().unwrap()).unwrap();
        let count: i64 = computed["items"]
            .as_array()
            .unwrap()
            .iter()
            .map(|i| i["count"].as_i64().unwrap())
            .sum();
        totals.push((version.context.unwrap(), count));
    }
    totals.sort();
    assert_eq!(totals[0].1, 1); // UFRGS
    assert!(totals[1].0.starts_with("USP"));
    assert_eq!(totals[1].1, 2); // USP across both collections

    // Cross-references and keywords derived from the context values.
    let linked: i64 = conn
        .query_row("SELECT COUNT(*) FROM indicator_institutions", [], |r| {
            r.get(0)
        })
        .unwrap();
    assert_eq!(linked, 2);
    let keywords: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM indicator_keywords WHERE keyword = 'USP'",
            [],
            |r| r.get(0),
        )
        .unwrap();
    assert_eq!(keywords, 1);
}

#[test]
fn test_production_evolution_matrix_payload() {
    let (_tmp, store, registry) = setup();
    let conn = open(&store);
    seed_articles(&conn);

    let ids =
        compute::production_evolution(&store, &registry, "OPEN_ACCESS_STATUS", None, 2021, 2023)
            .unwrap();
    assert_eq!(ids.len(), 1);

    let version = chain::get_version(&conn, &ids[0]).unwrap().unwrap();
    assert_eq!(version.start_date_year, Some(2021));
    assert_eq!(version.end_date_year, Some(2023));
    assert_eq!(version.measurement, Some("EVOLUTION".to_string()));

    let computed: Value = serde_json::from_str(version.computed.as_deref().unwrap()).unwrap();
    assert_eq!(computed["cat1_name"], "year");
    assert_eq!(computed["cat2_name"], "open_access_status");
    assert_eq!(
        computed["cat1_values"],
        serde_json::json!(["2021", "2022", "2023"])
    );
    let items = computed["items"].as_array().unwrap();
    // The closed-access article never shows up.
    assert!(items.iter().all(|i| i["open_access_status"] != "closed"));
    let gold_2022 = items
        .iter()
        .find(|i| i["year"] == "2022" && i["open_access_status"] == "gold")
        .unwrap();
    assert_eq!(gold_2022["count"], 2);

    // The raw dataset export holds every contributing source row.
    let dataset = std::fs::read_to_string(version.raw_data_path.unwrap()).unwrap();
    assert_eq!(dataset.lines().count(), 3);
}

#[test]
fn test_production_evolution_by_affiliation_state() {
    let (_tmp, store, registry) = setup();
    let conn = open(&store);
    seed_articles(&conn);

    let ids = compute::production_evolution(
        &store,
        &registry,
        "USE_LICENSE",
        Some("AFFILIATION_UF"),
        2021,
        2023,
    )
    .unwrap();
    // One indicator per affiliation state with open-access output.
    assert_eq!(ids.len(), 2);
    let locations: i64 = conn
        .query_row("SELECT COUNT(*) FROM indicator_locations", [], |r| r.get(0))
        .unwrap();
    assert_eq!(locations, 2);
}

#[test]
fn test_journal_counts_distinct_journals() {
    let (_tmp, store, registry) = setup();
    let conn = open(&store);
    seed_articles(&conn);

    let ids = compute::journal_counts(&store, &registry, "OPEN_ACCESS_STATUS", Some(2024)).unwrap();
    let version = chain::get_version(&conn, &ids[0]).unwrap().unwrap();
    assert_eq!(version.start_date_year, Some(2024));

    let computed: Value = serde_json::from_str(version.computed.as_deref().unwrap()).unwrap();
    let items = computed["items"].as_array().unwrap();
    // Two gold articles in the same journal count once.
    let gold = items.iter().find(|i| i["name"] == "gold").unwrap();
    assert_eq!(gold["count"], 1);
}

#[test]
fn test_delete_all_leaves_no_orphans() {
    let (_tmp, store, registry) = setup();
    let conn = open(&store);
    seed_education(&conn, 2);
    seed_articles(&conn);

    compute::directory_counts(&store, &registry, None, None).unwrap();
    compute::production_evolution(
        &store,
        &registry,
        "USE_LICENSE",
        Some("AFFILIATION_UF"),
        2021,
        2023,
    )
    .unwrap();

    let datasets_before = std::fs::read_dir(store.datasets_dir()).unwrap().count();
    assert!(datasets_before > 0);

    let deleted = record::delete_all(&store, &conn).unwrap();
    assert!(deleted > 0);

    for table in [
        "indicator",
        "indicator_institutions",
        "indicator_locations",
        "indicator_thematic_areas",
        "indicator_keywords",
    ] {
        let left: i64 = conn
            .query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |r| r.get(0))
            .unwrap();
        assert_eq!(left, 0, "orphan rows left in {}", table);
    }
    assert_eq!(std::fs::read_dir(store.datasets_dir()).unwrap().count(), 0);

    // The chain restarts cleanly after a wipe.
    let ids = compute::directory_counts(&store, &registry, None, None).unwrap();
    let version = chain::get_version(&conn, &ids[0]).unwrap().unwrap();
    assert_eq!(version.seq, 1);
}

#[test]
fn test_practice_crosstab_payload() {
    let (_tmp, store, registry) = setup();
    let conn = open(&store);
    seed_education(&conn, 3);

    let ids = compute::directory_counts(&store, &registry, Some("CA_PRACTICE"), None).unwrap();
    let version = chain::get_version(&conn, &ids[0]).unwrap().unwrap();
    let computed: Value = serde_json::from_str(version.computed.as_deref().unwrap()).unwrap();
    assert_eq!(computed["cat1_name"], "practice");
    assert_eq!(computed["cat2_name"], "action");
    let items = computed["items"].as_array().unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["practice"], "X");
    assert_eq!(items[0]["action"], "educação | curso livre");
    assert_eq!(items[0]["count"], 3);

    // Distinct codes for distinct combinations: the cross-tab and the
    // base ranking never collide.
    let base = compute::directory_counts(&store, &registry, None, None).unwrap();
    let base_version = chain::get_version(&conn, &base[0]).unwrap().unwrap();
    assert_ne!(base_version.code, version.code);
}
