use tokio::sync::mpsc;

use super::{Ledger, LedgerError, LedgerResult, StepStatus};

/// Ledger entry produced inside a fan-out worker, persisted by the aggregator.
#[derive(Debug)]
pub(crate) struct StagedRecord {
    pub key: String,
    pub status: StepStatus,
}

/// Where auxiliary ledger records (content cache entries) are written.
///
/// Sequential stages write straight to the ledger. Inside a fan-out the
/// records are handed to the aggregator so it stays the only writer.
#[derive(Clone)]
pub struct LedgerWriter {
    target: WriteTarget,
}

#[derive(Clone)]
enum WriteTarget {
    Direct(Ledger),
    Staged(mpsc::Sender<StagedRecord>),
}

impl LedgerWriter {
    pub fn direct(ledger: Ledger) -> Self {
        Self {
            target: WriteTarget::Direct(ledger),
        }
    }

    pub(crate) fn staged(sender: mpsc::Sender<StagedRecord>) -> Self {
        Self {
            target: WriteTarget::Staged(sender),
        }
    }

    pub fn is_staged(&self) -> bool {
        matches!(self.target, WriteTarget::Staged(_))
    }

    pub async fn record_completed(&self, key: &str, output: &str) -> LedgerResult<()> {
        match &self.target {
            WriteTarget::Direct(ledger) => ledger.record_completed(key, output).await,
            WriteTarget::Staged(sender) => sender
                .send(StagedRecord {
                    key: key.to_string(),
                    status: StepStatus::completed(output),
                })
                .await
                .map_err(|_| LedgerError::WriterClosed {
                    step_id: key.to_string(),
                }),
        }
    }
}

impl std::fmt::Debug for LedgerWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self.target {
            WriteTarget::Direct(_) => "direct",
            WriteTarget::Staged(_) => "staged",
        };
        f.debug_struct("LedgerWriter").field("target", &kind).finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::metadata::{MemoryMetadataStore, ObjectRef};

    #[tokio::test]
    async fn staged_records_go_to_the_channel() {
        let store = MemoryMetadataStore::new();
        let ledger = Ledger::new(Arc::new(store.clone()), ObjectRef::new("b", "o.mp4"));
        let (tx, mut rx) = mpsc::channel(4);
        let writer = LedgerWriter::staged(tx);
        writer.record_completed("cache_key", "{}").await.unwrap();

        let record = rx.recv().await.unwrap();
        assert_eq!(record.key, "cache_key");
        assert!(record.status.is_completed());
        assert_eq!(store.write_count(), 0);
        assert!(!ledger.is_completed("cache_key").await.unwrap());
    }

    #[tokio::test]
    async fn closed_stage_reports_writer_closed() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let writer = LedgerWriter::staged(tx);
        let err = writer.record_completed("k", "v").await.unwrap_err();
        assert!(matches!(err, LedgerError::WriterClosed { .. }));
    }
}
