use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("metadata store path not configured")]
    MissingStore,
    #[error("failed to open metadata database {path}: {source}")]
    Open {
        source: rusqlite::Error,
        path: PathBuf,
    },
    #[error("metadata database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("metadata store task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
    #[error("metadata update rejected for {object}: {reason}")]
    Rejected { object: String, reason: String },
}

pub type MetadataResult<T> = std::result::Result<T, MetadataError>;
