use thiserror::Error;

use crate::metadata::MetadataError;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("metadata store error: {0}")]
    Store(#[from] MetadataError),
    #[error("failed to encode step status: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("ledger writer for step {step_id} is closed")]
    WriterClosed { step_id: String },
}

pub type LedgerResult<T> = std::result::Result<T, LedgerError>;
