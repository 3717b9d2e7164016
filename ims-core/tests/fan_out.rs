use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use tempfile::TempDir;

use ims_core::fanout::FanOutError;
use ims_core::steps;
use ims_core::{FanOutConfig, FanOutExecutor, Ledger, ObjectRef, SqliteMetadataStore};

fn executor(dir: &TempDir, config: FanOutConfig) -> FanOutExecutor {
    let store = SqliteMetadataStore::builder()
        .path(dir.path().join("metadata.sqlite"))
        .create_if_missing(true)
        .build()
        .unwrap();
    store.initialize().unwrap();
    let ledger = Ledger::new(Arc::new(store), ObjectRef::new("media-in", "long.mp4"));
    FanOutExecutor::new(ledger, config)
}

fn config() -> FanOutConfig {
    FanOutConfig {
        max_concurrent: 4,
        batch_size: 3,
        flush_interval_secs: 30,
    }
}

#[tokio::test]
async fn interrupted_fan_out_resumes_with_only_the_failed_ids() {
    let dir = TempDir::new().unwrap();
    let executor = executor(&dir, config());
    let ids = steps::segment_summaries(12);
    let flaky: HashSet<String> = [3, 7, 11].iter().map(|n| steps::segment_summary(*n)).collect();

    let err = executor
        .run(ids.clone(), {
            let flaky = flaky.clone();
            move |step_id, _writer| {
                let fails = flaky.contains(&step_id);
                async move {
                    if fails {
                        Err(format!("transient failure in {step_id}"))
                    } else {
                        Ok(format!("summary of {step_id}"))
                    }
                }
            }
        })
        .await
        .unwrap_err();
    assert!(matches!(err, FanOutError::SubStep { failed: 3, .. }));
    assert!(matches!(
        executor.verify_completed(&ids).await,
        Err(FanOutError::Incomplete { ref missing }) if missing.len() == 3
    ));

    let pending = executor.pending(&ids).await.unwrap();
    assert_eq!(pending.iter().cloned().collect::<HashSet<_>>(), flaky);

    let seen = Arc::new(Mutex::new(Vec::new()));
    let report = executor
        .run(pending, {
            let seen = seen.clone();
            move |step_id, _writer| {
                seen.lock().unwrap().push(step_id.clone());
                async move { Ok::<_, String>(format!("summary of {step_id}")) }
            }
        })
        .await
        .unwrap();
    assert_eq!(report.completed, 3);
    assert_eq!(seen.lock().unwrap().len(), 3);
    executor.verify_completed(&ids).await.unwrap();
}

#[tokio::test]
async fn empty_input_makes_no_writes() {
    let dir = TempDir::new().unwrap();
    let executor = executor(&dir, config());
    let report = executor
        .run(Vec::new(), |_step_id, _writer| async { Ok::<_, String>(String::new()) })
        .await
        .unwrap();
    assert_eq!(report.submitted, 0);
    assert_eq!(report.flushes, 0);
}
