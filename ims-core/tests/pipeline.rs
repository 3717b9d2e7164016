use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use tempfile::TempDir;

use ims_core::fanout::FanOutError;
use ims_core::inference::{CacheRequest, InferenceError, InferenceResult};
use ims_core::media::{format_hms, media_summary_schema, Media, MediaSummary, Segment, TimeSpan};
use ims_core::pipeline::media_id;
use ims_core::steps;
use ims_core::{
    load_ims_config, AnalysisContext, AnalysisPipeline, CachedContent, GenerateRequest,
    GeneratedContent, ImsConfig, InferenceClient, Ledger, MetadataStore, ObjectRef,
    PipelineError, RunContext, SqliteMetadataStore, SqliteTableStore, TableStore,
};

/// Answers each kind of request the way a well-behaved model would.
#[derive(Default)]
struct ScriptedModel {
    caches: Mutex<Vec<CacheRequest>>,
    generations: AtomicUsize,
    embeddings: AtomicUsize,
    malformed_summaries: AtomicUsize,
    cache_limit: Option<usize>,
}

impl ScriptedModel {
    fn with_malformed_summaries(count: usize) -> Self {
        let model = Self::default();
        model.malformed_summaries.store(count, Ordering::SeqCst);
        model
    }

    /// Cache creation fails once `limit` caches exist.
    fn with_cache_limit(limit: usize) -> Self {
        Self {
            cache_limit: Some(limit),
            ..Self::default()
        }
    }

    fn summary_for(prompt: &str) -> String {
        let length: u64 = prompt
            .split("Summarise this ")
            .nth(1)
            .and_then(|rest| rest.split_whitespace().next())
            .and_then(|value| value.parse().ok())
            .expect("summary prompt carries the length");
        let half = length / 2;
        let summary = MediaSummary {
            title: "Night Train".into(),
            category: "drama".into(),
            summary: "A long journey.".into(),
            length_in_seconds: length,
            segment_timestamps: vec![
                TimeSpan::new(format_hms(0), format_hms(half)),
                TimeSpan::new(format_hms(half), format_hms(length)),
            ],
            ..MediaSummary::default()
        };
        serde_json::to_string(&summary).unwrap()
    }

    fn segment_for(prompt: &str) -> String {
        let segment = Segment {
            sequence_number: 0,
            start: "00:00:00".into(),
            end: "00:00:10".into(),
            script: prompt.lines().next().unwrap_or_default().to_string(),
            cast: Vec::new(),
        };
        serde_json::to_string(&segment).unwrap()
    }
}

#[async_trait]
impl InferenceClient for ScriptedModel {
    async fn create_cache(&self, request: CacheRequest) -> InferenceResult<CachedContent> {
        let mut caches = self.caches.lock().unwrap();
        if self.cache_limit.is_some_and(|limit| caches.len() >= limit) {
            return Err(InferenceError::Rejected("cache quota exhausted".into()));
        }
        caches.push(request);
        Ok(CachedContent {
            name: format!("cachedContents/{}", caches.len()),
            expire_time: Utc::now() + Duration::hours(1),
        })
    }

    async fn generate_content(&self, request: GenerateRequest) -> InferenceResult<GeneratedContent> {
        self.generations.fetch_add(1, Ordering::SeqCst);
        let text = match &request.response_schema {
            None => "This looks like a Movie.".to_string(),
            Some(schema) if *schema == media_summary_schema() => {
                let malformed = self
                    .malformed_summaries
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
                    .is_ok();
                if malformed {
                    r#"{"segment_timestamps": []}"#.to_string()
                } else {
                    Self::summary_for(&request.prompt)
                }
            }
            Some(_) => Self::segment_for(&request.prompt),
        };
        Ok(GeneratedContent {
            text,
            input_tokens: 100,
            output_tokens: 10,
        })
    }

    async fn embed_content(&self, _model: &str, text: &str) -> InferenceResult<Vec<f64>> {
        self.embeddings.fetch_add(1, Ordering::SeqCst);
        Ok(vec![text.len() as f64, 1.0])
    }
}

struct Harness {
    _dir: TempDir,
    config: Arc<ImsConfig>,
    metadata: SqliteMetadataStore,
    tables: SqliteTableStore,
    object: ObjectRef,
}

impl Harness {
    async fn new(content_length: u64) -> Self {
        let dir = TempDir::new().unwrap();
        let config_path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../configs/ims.toml");
        let mut config = load_ims_config(config_path).unwrap();
        config.fan_out.max_concurrent = 3;
        config.fan_out.batch_size = 2;

        let metadata = SqliteMetadataStore::builder()
            .path(dir.path().join("metadata.sqlite"))
            .create_if_missing(true)
            .build()
            .unwrap();
        metadata.initialize().unwrap();
        let tables = SqliteTableStore::builder()
            .path(dir.path().join("tables.sqlite"))
            .create_if_missing(true)
            .build()
            .unwrap();
        tables.initialize().unwrap();

        let object = ObjectRef::new("media-in", "films/night-train.mp4");
        let harness = Self {
            _dir: dir,
            config: Arc::new(config),
            metadata,
            tables,
            object,
        };
        // The probe step needs ffprobe and a mounted file; record its output up front.
        harness
            .ledger()
            .record_completed(steps::CONTENT_LENGTH, &content_length.to_string())
            .await
            .unwrap();
        harness
    }

    fn ledger(&self) -> Ledger {
        Ledger::new(Arc::new(self.metadata.clone()), self.object.clone())
    }

    fn pipeline(&self, model: Arc<ScriptedModel>) -> AnalysisPipeline {
        let run = RunContext::new(self.object.clone(), self.config.clone());
        let metadata: Arc<dyn MetadataStore> = Arc::new(self.metadata.clone());
        let tables: Arc<dyn TableStore> = Arc::new(self.tables.clone());
        AnalysisPipeline::new(AnalysisContext::new(run, metadata, model, tables)).unwrap()
    }

    async fn persisted_media(&self) -> Media {
        let row = self
            .tables
            .fetch(
                &self.config.table_store.dataset,
                &self.config.table_store.media_table,
                &media_id(&self.object),
            )
            .await
            .unwrap()
            .expect("media row");
        serde_json::from_value(row).unwrap()
    }
}

#[tokio::test]
async fn short_media_runs_every_stage_once() {
    let harness = Harness::new(120).await;
    let model = Arc::new(ScriptedModel::default());

    let report = harness.pipeline(model.clone()).run().await.unwrap();
    assert_eq!(report.stages.len(), steps::ANALYSIS_STEPS.len());
    assert!(report.stages[0].skipped, "seeded content length is reused");
    assert!(report.stages[1..].iter().all(|stage| !stage.skipped));
    assert!(report.usage.input_tokens > 0);

    let ledger = harness.ledger();
    let outputs = ledger.steps_output(&steps::ANALYSIS_STEPS).await.unwrap();
    assert_eq!(outputs.len(), steps::ANALYSIS_STEPS.len());
    assert_eq!(outputs[steps::CONTENT_TYPE], "movie");
    assert_eq!(outputs[steps::SEGMENT_SUMMARY_ALL], "summary generated for 2 segments");
    assert_eq!(outputs[steps::PERSIST], media_id(&harness.object));
    assert_eq!(
        outputs[steps::GENERATE_EMBEDDINGS],
        "generated and persisted embeddings for 2 segments"
    );
    assert!(ledger.is_completed(&steps::segment_summary(1)).await.unwrap());
    assert!(ledger.is_completed(&steps::segment_summary(2)).await.unwrap());

    let summary: MediaSummary = serde_json::from_str(&outputs[steps::CONTENT_SUMMARY]).unwrap();
    assert_eq!(
        summary.media_url,
        "https://storage.mtls.cloud.google.com/media-in/films/night-train.mp4"
    );

    let media = harness.persisted_media().await;
    assert_eq!(media.length_in_seconds, 120);
    assert_eq!(media.segments.len(), 2);
    let sequences: Vec<u32> = media.segments.iter().map(|s| s.sequence_number).collect();
    assert_eq!(sequences, vec![1, 2]);
    assert_eq!(
        harness
            .tables
            .count(
                &harness.config.table_store.dataset,
                &harness.config.table_store.embedding_table
            )
            .unwrap(),
        2
    );
    assert_eq!(model.embeddings.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn rerun_skips_completed_work() {
    let harness = Harness::new(120).await;
    let model = Arc::new(ScriptedModel::default());
    harness.pipeline(model.clone()).run().await.unwrap();
    let generations = model.generations.load(Ordering::SeqCst);
    let caches = model.caches.lock().unwrap().len();

    let report = harness.pipeline(model.clone()).run().await.unwrap();
    assert!(report.stages.iter().all(|stage| stage.skipped));
    assert_eq!(model.generations.load(Ordering::SeqCst), generations);
    assert_eq!(model.caches.lock().unwrap().len(), caches);
}

#[tokio::test]
async fn long_media_is_summarised_in_chunks() {
    let harness = Harness::new(700).await;
    let model = Arc::new(ScriptedModel::default());
    harness.pipeline(model.clone()).run().await.unwrap();

    let ledger = harness.ledger();
    let chunk_ids = [
        steps::content_summary_chunk(0, 300),
        steps::content_summary_chunk(300, 600),
        steps::content_summary_chunk(600, 700),
    ];
    let chunk_outputs = ledger.steps_output(&chunk_ids).await.unwrap();
    assert_eq!(chunk_outputs.len(), 3);

    let summary: MediaSummary = serde_json::from_str(
        &ledger.steps_output(&[steps::CONTENT_SUMMARY]).await.unwrap()[steps::CONTENT_SUMMARY],
    )
    .unwrap();
    assert_eq!(summary.length_in_seconds, 700);
    let spans: Vec<(&str, &str)> = summary
        .segment_timestamps
        .iter()
        .map(|span| (span.start.as_str(), span.end.as_str()))
        .collect();
    assert_eq!(
        spans,
        vec![
            ("00:00:00", "00:02:30"),
            ("00:02:30", "00:05:00"),
            ("00:05:00", "00:07:30"),
            ("00:07:30", "00:10:00"),
            ("00:10:00", "00:10:50"),
            ("00:10:50", "00:11:40"),
        ]
    );
    assert_eq!(harness.persisted_media().await.segments.len(), 6);

    let windowed: Vec<_> = model
        .caches
        .lock()
        .unwrap()
        .iter()
        .filter_map(|request| request.contents[0].window)
        .map(|window| (window.start_secs, window.end_secs))
        .collect();
    assert!(windowed.contains(&(0, 300)));
    assert!(windowed.contains(&(600, 700)));
}

#[tokio::test]
async fn invalid_summaries_are_retried_then_fail() {
    let harness = Harness::new(120).await;
    let model = Arc::new(ScriptedModel::with_malformed_summaries(2));
    let report = harness.pipeline(model.clone()).run().await.unwrap();
    assert_eq!(report.stages[2].usage.retries, 2);

    let harness = Harness::new(120).await;
    let model = Arc::new(ScriptedModel::with_malformed_summaries(10));
    let err = harness.pipeline(model).run().await.unwrap_err();
    assert!(matches!(err, PipelineError::Validation { attempts: 5, .. }));
    let ledger = harness.ledger();
    assert!(!ledger.is_completed(steps::CONTENT_SUMMARY).await.unwrap());
    assert!(ledger.is_completed(steps::CONTENT_TYPE).await.unwrap());
}

#[tokio::test]
async fn segment_cache_failure_fails_the_sub_step_until_rerun() {
    let harness = Harness::new(120).await;
    // content type and content summary get the only two caches
    let model = Arc::new(ScriptedModel::with_cache_limit(2));
    let err = harness.pipeline(model.clone()).run().await.unwrap_err();
    assert!(
        matches!(err, PipelineError::FanOut(FanOutError::SubStep { failed: 2, .. })),
        "{err}"
    );

    let ledger = harness.ledger();
    assert!(ledger.is_completed(steps::CONTENT_SUMMARY).await.unwrap());
    assert!(!ledger.is_completed(steps::SEGMENT_SUMMARY_ALL).await.unwrap());
    let segment_ids = steps::segment_summaries(2);
    assert!(ledger.steps_status(&segment_ids).await.unwrap().is_empty());
    let generations = model.generations.load(Ordering::SeqCst);

    let model = Arc::new(ScriptedModel::default());
    let report = harness.pipeline(model.clone()).run().await.unwrap();
    assert!(report.stages[2].skipped);
    assert!(!report.stages[3].skipped);
    assert!(ledger.is_completed(steps::SEGMENT_SUMMARY_ALL).await.unwrap());
    let windows: Vec<_> = model
        .caches
        .lock()
        .unwrap()
        .iter()
        .map(|request| request.contents[0].window.map(|w| (w.start_secs, w.end_secs)))
        .collect();
    assert_eq!(windows.len(), 2);
    assert!(windows.contains(&Some((0, 60))));
    assert!(windows.contains(&Some((60, 120))));
    assert_eq!(generations, 2, "segment prompts never ran without a cache");
}

#[tokio::test]
async fn persist_without_summary_is_an_input_error() {
    let harness = Harness::new(120).await;
    let ledger = harness.ledger();
    ledger.record_completed(steps::CONTENT_TYPE, "movie").await.unwrap();
    ledger
        .record_completed(steps::SEGMENT_SUMMARY_ALL, "summary generated for 0 segments")
        .await
        .unwrap();

    let run = RunContext::new(harness.object.clone(), harness.config.clone());
    let ctx = AnalysisContext::new(
        run,
        Arc::new(harness.metadata.clone()),
        Arc::new(ScriptedModel::default()),
        Arc::new(harness.tables.clone()),
    );
    let stage = ims_core::pipeline::PersistStage::new(harness.config.table_store.clone());
    let err = stage.run(&ctx).await.unwrap_err();
    assert!(matches!(err, PipelineError::MissingInput(step) if step == steps::CONTENT_SUMMARY));
    assert!(!ledger.is_completed(steps::PERSIST).await.unwrap());
}
