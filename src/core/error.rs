use rusqlite;
use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MiranteError {
    #[error("SQLite error: {0}")]
    RusqliteError(#[from] rusqlite::Error),
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("Registry configuration error: {0}")]
    ConfigError(String),
    #[error("grouping field {field} is not supported by collection {collection}")]
    InvalidGroupingField { collection: String, field: String },
    #[error("a work-in-progress version already exists for code {0}")]
    CreateIndicatorRecordError(String),
    #[error("failed to resolve reference entity: {0}")]
    ReferenceEntityResolutionError(String),
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("Not found: {0}")]
    NotFound(String),
}
