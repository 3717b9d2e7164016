use thiserror::Error;

use crate::cache::CacheError;
use crate::chunk::ChunkError;
use crate::error::ConfigError;
use crate::fanout::FanOutError;
use crate::inference::InferenceError;
use crate::ledger::LedgerError;
use crate::media::TimestampError;
use crate::probe::ProbeError;
use crate::table::TableError;
use crate::templates::TemplateError;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),
    #[error("fan-out error: {0}")]
    FanOut(#[from] FanOutError),
    #[error("content cache error: {0}")]
    Cache(#[from] CacheError),
    #[error("inference error: {0}")]
    Inference(#[from] InferenceError),
    #[error("table store error: {0}")]
    Table(#[from] TableError),
    #[error("probe error: {0}")]
    Probe(#[from] ProbeError),
    #[error("template error: {0}")]
    Template(#[from] TemplateError),
    #[error("chunk error: {0}")]
    Chunk(#[from] ChunkError),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("missing required output of step {0}")]
    MissingInput(String),
    #[error("invalid output of step {step}: {reason}")]
    InvalidInput { step: String, reason: String },
    #[error("segment {sequence}: {source}")]
    Timestamp {
        sequence: usize,
        #[source]
        source: TimestampError,
    },
    #[error("content summary failed validation after {attempts} attempts: {reason}")]
    Validation { attempts: u32, reason: String },
    #[error("media {0} not found in the table store")]
    MediaNotFound(String),
}

pub type PipelineResult<T> = std::result::Result<T, PipelineError>;
