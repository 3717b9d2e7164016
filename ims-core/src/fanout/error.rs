use thiserror::Error;
use tokio::sync::AcquireError;
use tokio::task::JoinError;

use crate::ledger::LedgerError;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error)]
pub enum FanOutError {
    #[error("sub-step {step_id} failed ({failed} failed in total): {source}")]
    SubStep {
        step_id: String,
        failed: usize,
        source: BoxError,
    },
    #[error("final ledger flush failed with {pending} records pending: {source}")]
    Flush {
        pending: usize,
        source: LedgerError,
    },
    #[error("sub-steps not completed after fan-out: {}", missing.join(", "))]
    Incomplete { missing: Vec<String> },
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),
    #[error("aggregator task failed: {0}")]
    Aggregator(#[from] JoinError),
    #[error("worker slots closed: {0}")]
    SlotsClosed(#[from] AcquireError),
}

pub type FanOutResult<T> = std::result::Result<T, FanOutError>;
