//! Analysis stages, each reading its inputs from earlier ledger outputs.

mod content_type;
mod context;
mod embeddings;
mod error;
mod length;
mod persist;
mod proxy;
mod segments;
mod summary;

use std::collections::HashMap;

use serde::Serialize;
use tracing::info;

use crate::ledger::StepOutcome;
use crate::metrics::TokenUsage;
use crate::probe::MediaProbe;
use crate::steps;

pub use content_type::{match_content_type, ContentTypeStage};
pub use context::{AnalysisContext, RunContext};
pub use embeddings::EmbeddingsStage;
pub use error::{PipelineError, PipelineResult};
pub use length::ContentLengthStage;
pub use persist::{collect_segments, media_id, PersistStage};
pub use proxy::ProxyStage;
pub use segments::{summary_document, SegmentSummariesStage};
pub use summary::{validate_summary, ContentSummaryStage, SummaryValidationError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageReport {
    pub step: String,
    pub skipped: bool,
    pub usage: TokenUsage,
}

impl StageReport {
    fn new(step: &str, outcome: &StepOutcome, usage: TokenUsage) -> Self {
        Self {
            step: step.to_string(),
            skipped: outcome.was_skipped(),
            usage,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PipelineReport {
    pub object: String,
    pub stages: Vec<StageReport>,
    pub usage: TokenUsage,
}

/// The six analysis stages in dependency order.
#[derive(Debug, Clone)]
pub struct AnalysisPipeline {
    ctx: AnalysisContext,
    content_length: ContentLengthStage,
    content_type: ContentTypeStage,
    content_summary: ContentSummaryStage,
    segment_summaries: SegmentSummariesStage,
    persist: PersistStage,
    embeddings: EmbeddingsStage,
}

impl AnalysisPipeline {
    /// Resolves every stage's model and settings from the run's config.
    pub fn new(ctx: AnalysisContext) -> PipelineResult<Self> {
        let config = ctx.run.config.clone();
        Ok(Self {
            content_length: ContentLengthStage::new(MediaProbe::new(config.probe.clone())),
            content_type: ContentTypeStage::new(
                config.model(&config.content_type.model)?,
                config.content_type.clone(),
            ),
            content_summary: ContentSummaryStage::new(
                config.model(&config.summary.model)?,
                config.chunking.clone(),
                config.summary.max_attempts,
            ),
            segment_summaries: SegmentSummariesStage::new(
                config.model(&config.summary.segment_model)?,
                config.fan_out.clone(),
            ),
            persist: PersistStage::new(config.table_store.clone()),
            embeddings: EmbeddingsStage::new(
                config.embedding.model_name.clone(),
                config.table_store.clone(),
            ),
            ctx,
        })
    }

    pub fn context(&self) -> &AnalysisContext {
        &self.ctx
    }

    pub async fn run(&self) -> PipelineResult<PipelineReport> {
        let ctx = &self.ctx;
        info!(object = %ctx.run.object, "starting analysis");
        let mut stages = Vec::with_capacity(steps::ANALYSIS_STEPS.len());

        let outcome = self.content_length.run(ctx).await?;
        stages.push(StageReport::new(steps::CONTENT_LENGTH, &outcome, TokenUsage::default()));

        let (outcome, usage) = self.content_type.run(ctx).await?;
        stages.push(StageReport::new(steps::CONTENT_TYPE, &outcome, usage));

        let (outcome, usage) = self.content_summary.run(ctx).await?;
        stages.push(StageReport::new(steps::CONTENT_SUMMARY, &outcome, usage));

        let (outcome, usage) = self.segment_summaries.run(ctx).await?;
        stages.push(StageReport::new(steps::SEGMENT_SUMMARY_ALL, &outcome, usage));

        let outcome = self.persist.run(ctx).await?;
        stages.push(StageReport::new(steps::PERSIST, &outcome, TokenUsage::default()));

        let outcome = self.embeddings.run(ctx).await?;
        stages.push(StageReport::new(steps::GENERATE_EMBEDDINGS, &outcome, TokenUsage::default()));

        let usage = stages
            .iter()
            .fold(TokenUsage::default(), |total, stage| total.merge(stage.usage));
        info!(
            object = %ctx.run.object,
            input_tokens = usage.input_tokens,
            output_tokens = usage.output_tokens,
            retries = usage.retries,
            "analysis finished"
        );
        Ok(PipelineReport {
            object: ctx.run.object.to_string(),
            stages,
            usage,
        })
    }
}

pub(crate) fn required<'a>(
    outputs: &'a HashMap<String, String>,
    step: &str,
) -> PipelineResult<&'a str> {
    outputs
        .get(step)
        .map(String::as_str)
        .ok_or_else(|| PipelineError::MissingInput(step.to_string()))
}
