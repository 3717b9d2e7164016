//! Bounded fan-out over independent sub-steps.
//!
//! Workers never touch the ledger. Each result, and each record a worker
//! stages through its [`LedgerWriter`], goes to a single aggregator task that
//! batches them into multi-key metadata writes. A batch is flushed when it
//! reaches `batch_size`, when the flush interval ticks, and once more after
//! the last worker has finished.

mod error;
mod types;

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;

use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::ledger::{Ledger, LedgerError, LedgerWriter, StagedRecord, StepState, StepStatus};

pub use error::{BoxError, FanOutError, FanOutResult};
pub use types::{FanOutConfig, FanOutReport};

struct Finished {
    step_id: String,
    result: Result<String, BoxError>,
}

#[derive(Default)]
struct Aggregated {
    seen: HashSet<String>,
    completed: usize,
    failures: Vec<(String, BoxError)>,
    records_flushed: usize,
    flushes: usize,
    failed_flushes: usize,
    unflushed: Option<(usize, LedgerError)>,
}

#[derive(Debug, Clone)]
pub struct FanOutExecutor {
    ledger: Ledger,
    config: FanOutConfig,
}

impl FanOutExecutor {
    pub fn new(ledger: Ledger, config: FanOutConfig) -> Self {
        Self { ledger, config }
    }

    pub fn config(&self) -> &FanOutConfig {
        &self.config
    }

    /// Ids without a completed ledger entry, in input order. Costs one store read.
    pub async fn pending<S: AsRef<str>>(&self, step_ids: &[S]) -> FanOutResult<Vec<String>> {
        let statuses = self.ledger.steps_status(step_ids).await?;
        Ok(step_ids
            .iter()
            .map(AsRef::as_ref)
            .filter(|id| statuses.get(*id) != Some(&StepState::Completed))
            .map(str::to_string)
            .collect())
    }

    /// Re-reads the ledger and fails unless every id is completed.
    pub async fn verify_completed<S: AsRef<str>>(&self, step_ids: &[S]) -> FanOutResult<()> {
        let missing = self.pending(step_ids).await?;
        if missing.is_empty() {
            Ok(())
        } else {
            Err(FanOutError::Incomplete { missing })
        }
    }

    /// Runs `work` once per id with at most `max_concurrent` in flight.
    ///
    /// Failed sub-steps are never written. When any failed, the returned
    /// error names one of them after every worker and the final flush are done.
    pub async fn run<F, Fut, E>(&self, step_ids: Vec<String>, work: F) -> FanOutResult<FanOutReport>
    where
        F: Fn(String, LedgerWriter) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<String, E>> + Send + 'static,
        E: Into<BoxError> + Send + 'static,
    {
        let submitted = step_ids.len();
        if submitted == 0 {
            return Ok(FanOutReport::default());
        }

        let slots = self.config.slots();
        let (done_tx, done_rx) = mpsc::channel::<Finished>(slots);
        let (staged_tx, staged_rx) = mpsc::channel::<StagedRecord>(slots);
        let aggregator = tokio::spawn(aggregate(
            self.ledger.clone(),
            self.config.clone(),
            done_rx,
            staged_rx,
        ));

        info!(
            object = %self.ledger.object(),
            submitted,
            max_concurrent = slots,
            batch_size = self.config.threshold(),
            "starting fan-out"
        );

        let semaphore = Arc::new(Semaphore::new(slots));
        let work = Arc::new(work);
        let mut workers = JoinSet::new();
        for step_id in step_ids.iter().cloned() {
            let permit = Arc::clone(&semaphore).acquire_owned().await?;
            let work = Arc::clone(&work);
            let done_tx = done_tx.clone();
            let writer = LedgerWriter::staged(staged_tx.clone());
            workers.spawn(async move {
                debug!(step = %step_id, "sub-step started");
                let result = (*work)(step_id.clone(), writer).await.map_err(Into::into);
                drop(permit);
                // Only fails if the aggregator is gone, which already surfaces below.
                let _ = done_tx.send(Finished { step_id, result }).await;
            });
        }
        drop(done_tx);
        drop(staged_tx);

        while let Some(joined) = workers.join_next().await {
            if let Err(err) = joined {
                if err.is_panic() {
                    warn!(error = %err, "fan-out worker panicked");
                }
            }
        }

        let aggregated = aggregator.await?;
        let mut failures = aggregated.failures;
        for step_id in &step_ids {
            if !aggregated.seen.contains(step_id) {
                failures.push((
                    step_id.clone(),
                    BoxError::from("worker ended without reporting a result"),
                ));
            }
        }

        let report = FanOutReport {
            submitted,
            completed: aggregated.completed,
            failed: failures.iter().map(|(id, _)| id.clone()).collect(),
            records_flushed: aggregated.records_flushed,
            flushes: aggregated.flushes,
            failed_flushes: aggregated.failed_flushes,
        };
        info!(
            object = %self.ledger.object(),
            submitted,
            completed = report.completed,
            failed = report.failed.len(),
            flushes = report.flushes,
            failed_flushes = report.failed_flushes,
            "fan-out finished"
        );

        let failed = failures.len();
        if let Some((step_id, source)) = failures.into_iter().next() {
            return Err(FanOutError::SubStep {
                step_id,
                failed,
                source,
            });
        }
        if let Some((pending, source)) = aggregated.unflushed {
            return Err(FanOutError::Flush { pending, source });
        }
        Ok(report)
    }
}

async fn aggregate(
    ledger: Ledger,
    config: FanOutConfig,
    mut done_rx: mpsc::Receiver<Finished>,
    mut staged_rx: mpsc::Receiver<StagedRecord>,
) -> Aggregated {
    let threshold = config.threshold();
    let mut batch: HashMap<String, StepStatus> = HashMap::new();
    let mut aggregated = Aggregated::default();

    let mut ticker = time::interval(config.flush_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;

    let mut done_open = true;
    let mut staged_open = true;
    while done_open || staged_open {
        tokio::select! {
            finished = done_rx.recv(), if done_open => match finished {
                Some(Finished { step_id, result }) => {
                    aggregated.seen.insert(step_id.clone());
                    match result {
                        Ok(output) => {
                            aggregated.completed += 1;
                            batch.insert(step_id, StepStatus::completed(output));
                        }
                        Err(err) => {
                            warn!(step = %step_id, error = %err, "sub-step failed");
                            aggregated.failures.push((step_id, err));
                        }
                    }
                    if batch.len() >= threshold {
                        let _ = flush(&ledger, &mut batch, &mut aggregated, "batch_size").await;
                    }
                }
                None => done_open = false,
            },
            record = staged_rx.recv(), if staged_open => match record {
                Some(StagedRecord { key, status }) => {
                    batch.insert(key, status);
                    if batch.len() >= threshold {
                        let _ = flush(&ledger, &mut batch, &mut aggregated, "batch_size").await;
                    }
                }
                None => staged_open = false,
            },
            _ = ticker.tick() => {
                if !batch.is_empty() {
                    let _ = flush(&ledger, &mut batch, &mut aggregated, "interval").await;
                }
            }
        }
    }

    if !batch.is_empty() {
        if let Err(err) = flush(&ledger, &mut batch, &mut aggregated, "final").await {
            aggregated.unflushed = Some((batch.len(), err));
        }
    }
    aggregated
}

/// Writes the batch in one metadata update. On failure the batch is kept for
/// the next trigger.
async fn flush(
    ledger: &Ledger,
    batch: &mut HashMap<String, StepStatus>,
    aggregated: &mut Aggregated,
    trigger: &'static str,
) -> Result<(), LedgerError> {
    match ledger.record_batch(batch).await {
        Ok(()) => {
            debug!(records = batch.len(), trigger, "flushed fan-out batch");
            aggregated.records_flushed += batch.len();
            aggregated.flushes += 1;
            batch.clear();
            Ok(())
        }
        Err(err) => {
            warn!(records = batch.len(), trigger, error = %err, "fan-out flush failed, keeping batch");
            aggregated.failed_flushes += 1;
            Err(err)
        }
    }
}
