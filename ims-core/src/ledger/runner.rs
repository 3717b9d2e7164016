use std::fmt::Display;
use std::future::Future;
use std::time::Instant;

use tracing::{error, info};

use super::{Ledger, LedgerError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// A completed entry already existed; the work function was not invoked.
    Skipped,
    Completed { output: String },
}

impl StepOutcome {
    pub fn was_skipped(&self) -> bool {
        matches!(self, StepOutcome::Skipped)
    }
}

/// Runs a unit of work at most once per completed ledger entry.
///
/// A failing work function leaves the step absent, so the next run of the
/// pipeline retries it. Side effects inside the work function may therefore
/// run more than once if the process dies between the effect and the write.
#[derive(Debug, Clone)]
pub struct StepRunner {
    ledger: Ledger,
}

impl StepRunner {
    pub fn new(ledger: Ledger) -> Self {
        Self { ledger }
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub async fn run<F, Fut, E>(&self, step_id: &str, work: F) -> Result<StepOutcome, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<String, E>>,
        E: From<LedgerError> + Display,
    {
        let object = self.ledger.object();
        if self.ledger.is_completed(step_id).await? {
            info!(step = %step_id, object = %object, "step already completed, skipping");
            return Ok(StepOutcome::Skipped);
        }

        info!(step = %step_id, object = %object, "running step");
        let started = Instant::now();
        let output = match work().await {
            Ok(output) => output,
            Err(err) => {
                error!(step = %step_id, object = %object, error = %err, "step failed");
                return Err(err);
            }
        };

        self.ledger.record_completed(step_id, &output).await?;
        info!(
            step = %step_id,
            object = %object,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "step completed"
        );
        Ok(StepOutcome::Completed { output })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;
    use crate::metadata::{MemoryMetadataStore, ObjectRef};

    #[derive(Debug, thiserror::Error)]
    enum TestError {
        #[error(transparent)]
        Ledger(#[from] LedgerError),
        #[error("work failed: {0}")]
        Work(&'static str),
    }

    fn runner() -> (MemoryMetadataStore, StepRunner) {
        let store = MemoryMetadataStore::new();
        let ledger = Ledger::new(Arc::new(store.clone()), ObjectRef::new("b", "clip.mp4"));
        (store, ledger.runner())
    }

    #[tokio::test]
    async fn completed_step_is_never_rerun() {
        let (_store, runner) = runner();
        let first = runner
            .run("ims_content_length", || async { Ok::<_, TestError>("61".to_string()) })
            .await
            .unwrap();
        assert_eq!(first, StepOutcome::Completed { output: "61".into() });

        let calls = AtomicUsize::new(0);
        let second = runner
            .run("ims_content_length", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<String, _>(TestError::Work("must not run"))
            })
            .await
            .unwrap();
        assert!(second.was_skipped());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(
            runner.ledger().status("ims_content_length").await.unwrap().unwrap().output,
            "61"
        );
    }

    #[tokio::test]
    async fn failed_work_leaves_step_absent() {
        let (store, runner) = runner();
        let err = runner
            .run("ims_content_type", || async {
                Err::<String, _>(TestError::Work("model unavailable"))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, TestError::Work(_)));
        assert_eq!(store.write_count(), 0);
        assert!(runner.ledger().status("ims_content_type").await.unwrap().is_none());

        let retried = runner
            .run("ims_content_type", || async { Ok::<_, TestError>("movie".to_string()) })
            .await
            .unwrap();
        assert_eq!(retried, StepOutcome::Completed { output: "movie".into() });
    }

    #[tokio::test]
    async fn failed_completion_write_is_an_error() {
        let (store, runner) = runner();
        store.fail_next_writes(1);
        let err = runner
            .run("ims_persist", || async { Ok::<_, TestError>("id".to_string()) })
            .await
            .unwrap_err();
        assert!(matches!(err, TestError::Ledger(LedgerError::Store(_))));
        assert!(!runner.ledger().is_completed("ims_persist").await.unwrap());
    }
}
