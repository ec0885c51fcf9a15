use crate::core::broker::DbBroker;
use crate::core::error;
use crate::core::schemas;
use crate::core::store::Store;
use rusqlite::Connection;
use std::fs;
use std::path::{Path, PathBuf};

pub fn db_connect(db_path: &str) -> Result<Connection, error::MiranteError> {
    let conn = Connection::open(db_path)?;
    conn.busy_timeout(std::time::Duration::from_secs(5))
        .map_err(error::MiranteError::RusqliteError)?;
    conn.query_row("PRAGMA journal_mode=WAL;", [], |_| Ok(()))
        .map_err(error::MiranteError::RusqliteError)?;
    conn.execute("PRAGMA foreign_keys=ON;", [])
        .map_err(error::MiranteError::RusqliteError)?;
    Ok(conn)
}

pub fn indicator_db_path(root: &Path) -> PathBuf {
    root.join(schemas::INDICATOR_DB_NAME)
}

/// Create the store directories and apply every schema statement.
/// Idempotent: every statement is `IF NOT EXISTS`.
pub fn initialize_db(store: &Store) -> Result<(), error::MiranteError> {
    let root = &store.root;
    fs::create_dir_all(root).map_err(error::MiranteError::IoError)?;
    fs::create_dir_all(store.datasets_dir()).map_err(error::MiranteError::IoError)?;

    let broker = DbBroker::new(root);
    let db_path = indicator_db_path(root);
    broker.with_conn(&db_path, "mirante", None, "db.init", |conn| {
        for stmt in schemas::ALL_SCHEMAS {
            conn.execute(stmt, [])?;
        }
        Ok(())
    })?;
    Ok(())
}
