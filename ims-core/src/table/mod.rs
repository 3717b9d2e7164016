mod sqlite;

use std::path::PathBuf;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

pub use sqlite::{SqliteTableStore, SqliteTableStoreBuilder};

/// Rows accepted by a single `insert` call.
pub const MAX_ROWS_PER_INSERT: usize = 100;

#[derive(Debug, Error)]
pub enum TableError {
    #[error("table store path not configured")]
    MissingStore,
    #[error("failed to open table database {path}: {source}")]
    Open {
        source: rusqlite::Error,
        path: PathBuf,
    },
    #[error("table database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("row serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("table store task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
    #[error("insert of {count} rows exceeds the limit of {max}")]
    TooManyRows { count: usize, max: usize },
}

pub type TableResult<T> = std::result::Result<T, TableError>;

#[derive(Debug, Clone, PartialEq)]
pub struct TableRow {
    pub id: String,
    pub payload: Value,
}

impl TableRow {
    pub fn from_record<T: Serialize>(id: impl Into<String>, record: &T) -> TableResult<Self> {
        Ok(Self {
            id: id.into(),
            payload: serde_json::to_value(record)?,
        })
    }
}

#[async_trait]
pub trait TableStore: Send + Sync {
    /// Inserts up to [`MAX_ROWS_PER_INSERT`] rows. Rows with an existing id are replaced.
    async fn insert(&self, dataset: &str, table: &str, rows: Vec<TableRow>) -> TableResult<()>;

    async fn fetch(&self, dataset: &str, table: &str, id: &str) -> TableResult<Option<Value>>;
}
