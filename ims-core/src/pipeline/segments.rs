use std::collections::HashMap;
use std::sync::Arc;

use tracing::info;

use crate::cache::SystemInstruction;
use crate::fanout::{FanOutConfig, FanOutExecutor};
use crate::inference::{GenerateRequest, ModelSpec, TimeWindow};
use crate::ledger::{LedgerWriter, StepOutcome};
use crate::media::{example_segment, parse_flexible, segment_schema, MediaSummary};
use crate::metrics::{TokenCounters, TokenUsage};
use crate::steps;
use crate::templates::render;

use super::{required, AnalysisContext, PipelineError, PipelineResult};

/// One sub-step per segment span of the content summary, run through the fan-out executor.
#[derive(Debug, Clone)]
pub struct SegmentSummariesStage {
    model: ModelSpec,
    fan_out: FanOutConfig,
}

impl SegmentSummariesStage {
    pub fn new(model: ModelSpec, fan_out: FanOutConfig) -> Self {
        Self { model, fan_out }
    }

    pub async fn run(&self, ctx: &AnalysisContext) -> PipelineResult<(StepOutcome, TokenUsage)> {
        let counters = Arc::new(TokenCounters::default());
        let outcome = ctx
            .ledger
            .runner()
            .run(steps::SEGMENT_SUMMARY_ALL, || self.summarize_all(ctx, counters.clone()))
            .await?;
        Ok((outcome, counters.log(steps::SEGMENT_SUMMARY_ALL)))
    }

    async fn summarize_all(
        &self,
        ctx: &AnalysisContext,
        counters: Arc<TokenCounters>,
    ) -> PipelineResult<String> {
        let inputs = ctx
            .ledger
            .steps_output(&[steps::CONTENT_TYPE, steps::CONTENT_SUMMARY])
            .await?;
        let content_type = required(&inputs, steps::CONTENT_TYPE)?.to_string();
        let summary: MediaSummary =
            serde_json::from_str(required(&inputs, steps::CONTENT_SUMMARY)?).map_err(|err| {
                PipelineError::InvalidInput {
                    step: steps::CONTENT_SUMMARY.to_string(),
                    reason: err.to_string(),
                }
            })?;

        let count = summary.segment_timestamps.len();
        let step_ids = steps::segment_summaries(count);
        let executor = FanOutExecutor::new(ctx.ledger.clone(), self.fan_out.clone());
        let pending = executor.pending(&step_ids).await?;
        info!(
            object = %ctx.run.object,
            segments = count,
            pending = pending.len(),
            "summarising segments"
        );

        if !pending.is_empty() {
            let job = Arc::new(SegmentJob {
                ctx: ctx.clone(),
                model: self.model.clone(),
                summary_document: summary_document(&summary),
                summary,
                content_type,
                index_by_step: step_ids
                    .iter()
                    .enumerate()
                    .map(|(index, id)| (id.clone(), index))
                    .collect(),
                counters,
            });
            let report = executor
                .run(pending, move |step_id, writer| {
                    let job = job.clone();
                    async move { job.summarize(&step_id, &writer).await }
                })
                .await?;
            info!(
                completed = report.completed,
                flushes = report.flushes,
                "segment summaries finished"
            );
        }

        executor.verify_completed(&step_ids).await?;
        Ok(format!("summary generated for {count} segments"))
    }
}

struct SegmentJob {
    ctx: AnalysisContext,
    model: ModelSpec,
    summary: MediaSummary,
    summary_document: String,
    content_type: String,
    index_by_step: HashMap<String, usize>,
    counters: Arc<TokenCounters>,
}

impl SegmentJob {
    async fn summarize(&self, step_id: &str, writer: &LedgerWriter) -> PipelineResult<String> {
        let index = *self
            .index_by_step
            .get(step_id)
            .ok_or_else(|| PipelineError::MissingInput(step_id.to_string()))?;
        let sequence = index + 1;
        let span = &self.summary.segment_timestamps[index];
        let start = parse_flexible(&span.start)
            .map_err(|source| PipelineError::Timestamp { sequence, source })?;
        let end = parse_flexible(&span.end)
            .map_err(|source| PipelineError::Timestamp { sequence, source })?;

        let templates = self.ctx.templates.for_content_type(&self.content_type)?;
        let params = HashMap::from([
            ("SEQUENCE", sequence.to_string()),
            ("SUMMARY_DOCUMENT", self.summary_document.clone()),
            ("TIME_START", span.start.clone()),
            ("TIME_END", span.end.clone()),
            ("EXAMPLE_JSON", serde_json::to_string(&example_segment())?),
        ]);
        let prompt = render(&templates.segment_prompt, &params)?;
        let instruction = SystemInstruction::from_text(templates.system_instructions.clone());
        let cached = self
            .ctx
            .caches
            .get_or_create(writer, &self.model, &instruction, Some(TimeWindow::new(start, end)))
            .await?;

        let request = GenerateRequest {
            model: self.model.model_name.clone(),
            prompt,
            cached_content: Some(cached.name),
            response_schema: Some(segment_schema()),
            temperature: self.model.temperature,
            ..GenerateRequest::default()
        };
        let generated = self.ctx.inference.generate_content(request).await?;
        self.counters.record(&generated);
        Ok(generated.text)
    }
}

/// Title, summary and cast of the media, given to every segment prompt as context.
pub fn summary_document(summary: &MediaSummary) -> String {
    let cast: String = summary
        .cast
        .iter()
        .map(|member| format!("{} - {}\n", member.character_name, member.actor_name))
        .collect();
    format!(
        "Title:{}\nSummary:\n\n{}\nCast:\n\n{}\n",
        summary.title, summary.summary, cast
    )
}
