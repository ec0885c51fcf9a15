use mirante::cli::{Cli, Command};
use mirante::core::db::{self, indicator_db_path};
use mirante::core::store::Store;
use rusqlite::Connection;
use std::fs;
use tempfile::tempdir;

fn setup() -> (tempfile::TempDir, Store) {
    let tmp = tempdir().unwrap();
    let store = Store::under(tmp.path());
    db::initialize_db(&store).unwrap();
    (tmp, store)
}

fn open(store: &Store) -> Connection {
    db::db_connect(&indicator_db_path(&store.root).to_string_lossy()).unwrap()
}

#[test]
fn test_load_directory_jsonl_skips_malformed_lines() {
    let (tmp, store) = setup();
    let file = tmp.path().join("education.jsonl");
    fs::write(
        &file,
        concat!(
            r#"{"title": "Curso A", "action": "educação / capacitação", "classification": "curso livre", "practice": "educação aberta", "institutions": [{"name": "USP", "state": "SP"}]}"#,
            "\n",
            r#"{"title": "Curso B", "action": "educação / capacitação"}"#,
            "\n",
            "not json at all\n",
            "\n",
        ),
    )
    .unwrap();

    mirante::cli::run(Cli {
        dir: Some(tmp.path().to_path_buf()),
        command: Command::Load {
            kind: "education".to_string(),
            file,
        },
    })
    .unwrap();

    let conn = open(&store);
    let loaded: i64 = conn
        .query_row("SELECT COUNT(*) FROM education", [], |r| r.get(0))
        .unwrap();
    assert_eq!(loaded, 2);

    // Reference entities were resolved on the way in.
    let actions: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM action WHERE name = 'educação / capacitação'",
            [],
            |r| r.get(0),
        )
        .unwrap();
    assert_eq!(actions, 1);
    let institutions: i64 = conn
        .query_row("SELECT COUNT(*) FROM institution", [], |r| r.get(0))
        .unwrap();
    assert_eq!(institutions, 1);
}

#[test]
fn test_load_articles_jsonl() {
    let (tmp, store) = setup();
    let file = tmp.path().join("articles.jsonl");
    fs::write(
        &file,
        concat!(
            r#"{"doi": "10.1590/a", "journal": "Revista A", "year": 2023, "open_access_status": "gold", "use_license": "CC-BY", "affiliation_country": "BR"}"#,
            "\n",
            r#"{"doi": "10.1590/b", "journal": "Revista B", "year": 2022, "open_access_status": "closed"}"#,
            "\n",
        ),
    )
    .unwrap();

    mirante::cli::run(Cli {
        dir: Some(tmp.path().to_path_buf()),
        command: Command::Load {
            kind: "article".to_string(),
            file,
        },
    })
    .unwrap();

    let conn = open(&store);
    let loaded: i64 = conn
        .query_row("SELECT COUNT(*) FROM article", [], |r| r.get(0))
        .unwrap();
    assert_eq!(loaded, 2);
}

#[test]
fn test_load_rejects_unknown_collection() {
    let (tmp, _store) = setup();
    let file = tmp.path().join("x.jsonl");
    fs::write(&file, "{}\n").unwrap();
    let err = mirante::cli::run(Cli {
        dir: Some(tmp.path().to_path_buf()),
        command: Command::Load {
            kind: "journals".to_string(),
            file,
        },
    });
    assert!(err.is_err());
}

#[test]
fn test_moderate_command_flags_mismatches() {
    let (tmp, store) = setup();
    let file = tmp.path().join("event.jsonl");
    fs::write(
        &file,
        concat!(
            r#"{"title": "Workshop de dados", "classification": "encontro"}"#,
            "\n",
            r#"{"title": "Encontro nacional", "classification": "encontro"}"#,
            "\n",
        ),
    )
    .unwrap();
    mirante::cli::run(Cli {
        dir: Some(tmp.path().to_path_buf()),
        command: Command::Load {
            kind: "event".to_string(),
            file,
        },
    })
    .unwrap();

    mirante::cli::run(Cli {
        dir: Some(tmp.path().to_path_buf()),
        command: Command::Moderate,
    })
    .unwrap();

    let conn = open(&store);
    let flagged: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM event WHERE record_status = 'TO MODERATE'",
            [],
            |r| r.get(0),
        )
        .unwrap();
    assert_eq!(flagged, 1);
    let published: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM event WHERE record_status = 'PUBLISHED'",
            [],
            |r| r.get(0),
        )
        .unwrap();
    assert_eq!(published, 1);
}

#[test]
fn test_audit_log_records_operations() {
    let (tmp, store) = setup();
    let file = tmp.path().join("education.jsonl");
    fs::write(&file, "{\"title\": \"Curso\"}\n").unwrap();
    mirante::cli::run(Cli {
        dir: Some(tmp.path().to_path_buf()),
        command: Command::Load {
            kind: "education".to_string(),
            file,
        },
    })
    .unwrap();

    let audit = fs::read_to_string(store.root.join("broker.events.jsonl")).unwrap();
    let ops: Vec<String> = audit
        .lines()
        .map(|line| {
            serde_json::from_str::<serde_json::Value>(line).unwrap()["op"]
                .as_str()
                .unwrap()
                .to_string()
        })
        .collect();
    assert!(ops.contains(&"db.init".to_string()));
    assert!(ops.contains(&"load.records".to_string()));
}
