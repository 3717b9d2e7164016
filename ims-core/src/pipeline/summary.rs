use std::collections::HashMap;

use thiserror::Error;
use tracing::{info, warn};

use crate::cache::SystemInstruction;
use crate::chunk::{self, ChunkWindow, ChunkingConfig, SummaryScope};
use crate::inference::{GenerateRequest, ModelSpec};
use crate::ledger::StepOutcome;
use crate::media::{example_summary, format_hms, media_summary_schema, parse_hms, MediaSummary};
use crate::metrics::{TokenCounters, TokenUsage};
use crate::steps;

use super::length::parse_length;
use super::{required, AnalysisContext, PipelineError, PipelineResult};

const START_TOLERANCE_SECS: i64 = 1;
const MIN_SEGMENT_SECS: i64 = 5;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SummaryValidationError {
    #[error("no segment timestamps found")]
    NoSegments,
    #[error("segment {index}: invalid timestamp '{value}'")]
    Timestamp { index: usize, value: String },
    #[error("first segment starts at {0}s, not at 0s")]
    LateStart(i64),
    #[error("last segment ends at {end}s, expected {length}s")]
    WrongEnd { end: i64, length: i64 },
    #[error("segment {index}: start is not before end")]
    Inverted { index: usize },
    #[error("segment {index}: gap after previous end at {previous_end}s")]
    Gap { index: usize, previous_end: i64 },
    #[error("segment {index}: shorter than 5 seconds")]
    TooShort { index: usize },
}

fn seconds(index: usize, value: &str) -> Result<i64, SummaryValidationError> {
    parse_hms(value)
        .ok()
        .and_then(|secs| i64::try_from(secs).ok())
        .ok_or_else(|| SummaryValidationError::Timestamp {
            index,
            value: value.to_string(),
        })
}

/// Checks that the spans tile `[0, length_secs]` closely enough to be usable.
///
/// Overlapping spans are accepted; a forward gap over one second is not.
pub fn validate_summary(
    summary: &MediaSummary,
    length_secs: u64,
) -> Result<(), SummaryValidationError> {
    let spans = &summary.segment_timestamps;
    let (Some(first), Some(last)) = (spans.first(), spans.last()) else {
        return Err(SummaryValidationError::NoSegments);
    };

    let first_start = seconds(1, &first.start)?;
    if first_start > START_TOLERANCE_SECS {
        return Err(SummaryValidationError::LateStart(first_start));
    }
    let end = seconds(spans.len(), &last.end)?;
    let length = i64::try_from(length_secs).unwrap_or(i64::MAX);
    if (end - length).abs() > START_TOLERANCE_SECS {
        return Err(SummaryValidationError::WrongEnd { end, length });
    }

    let mut previous_end = 0;
    for (i, span) in spans.iter().enumerate() {
        let index = i + 1;
        let start = seconds(index, &span.start)?;
        let end = seconds(index, &span.end)?;
        if start >= end {
            return Err(SummaryValidationError::Inverted { index });
        }
        if i > 0 && start - previous_end > START_TOLERANCE_SECS {
            return Err(SummaryValidationError::Gap {
                index,
                previous_end,
            });
        }
        if end - start < MIN_SEGMENT_SECS {
            return Err(SummaryValidationError::TooShort { index });
        }
        previous_end = end;
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct ContentSummaryStage {
    model: ModelSpec,
    chunking: ChunkingConfig,
    max_attempts: u32,
}

impl ContentSummaryStage {
    pub fn new(model: ModelSpec, chunking: ChunkingConfig, max_attempts: u32) -> Self {
        Self {
            model,
            chunking,
            max_attempts: max_attempts.max(1),
        }
    }

    pub async fn run(&self, ctx: &AnalysisContext) -> PipelineResult<(StepOutcome, TokenUsage)> {
        let counters = TokenCounters::default();
        let runner = ctx.ledger.runner();
        if ctx.ledger.is_completed(steps::CONTENT_SUMMARY).await? {
            info!(step = %steps::CONTENT_SUMMARY, object = %ctx.run.object, "step already completed, skipping");
            return Ok((StepOutcome::Skipped, TokenUsage::default()));
        }

        let inputs = ctx
            .ledger
            .steps_output(&[steps::CONTENT_LENGTH, steps::CONTENT_TYPE])
            .await?;
        let length = parse_length(steps::CONTENT_LENGTH, required(&inputs, steps::CONTENT_LENGTH)?)?;
        let content_type = required(&inputs, steps::CONTENT_TYPE)?.to_string();

        let chunking = &self.chunking;
        let outcome = if chunk::should_chunk(length, chunking.chunk_length_secs, chunking.min_tail_secs) {
            let windows = chunk::plan(length, chunking.chunk_length_secs, chunking.min_tail_secs);
            info!(
                object = %ctx.run.object,
                length,
                chunks = windows.len(),
                "summarising in chunks"
            );
            for window in &windows {
                let scope = SummaryScope::Chunk {
                    duration_secs: length,
                    content_type: content_type.clone(),
                    window: *window,
                };
                runner
                    .run(&scope.step_id(), || self.summarize(ctx, &scope, &counters))
                    .await?;
            }
            runner
                .run(steps::CONTENT_SUMMARY, || consolidate_chunks(ctx, &windows, length))
                .await?
        } else {
            let scope = SummaryScope::Whole {
                duration_secs: length,
                content_type,
            };
            runner
                .run(steps::CONTENT_SUMMARY, || self.summarize(ctx, &scope, &counters))
                .await?
        };
        Ok((outcome, counters.log(steps::CONTENT_SUMMARY)))
    }

    async fn summarize(
        &self,
        ctx: &AnalysisContext,
        scope: &SummaryScope,
        counters: &TokenCounters,
    ) -> PipelineResult<String> {
        let templates = ctx.templates.for_content_type(scope.content_type())?;
        let length = scope.length_secs();
        let params = HashMap::from([
            ("CATEGORIES", ctx.config().categories_line()),
            ("EXAMPLE_JSON", serde_json::to_string(&example_summary())?),
            ("VIDEO_LENGTH", length.to_string()),
            ("VIDEO_END_TIMESTAMP", format_hms(length)),
        ]);
        let prompt = crate::templates::render(&templates.summary_prompt, &params)?;
        let instruction = SystemInstruction::from_text(templates.system_instructions.clone());
        let cached = ctx
            .caches
            .get_or_create(&ctx.ledger.writer(), &self.model, &instruction, scope.cache_window())
            .await?;

        let mut last_error = String::new();
        for attempt in 1..=self.max_attempts {
            let request = GenerateRequest {
                model: self.model.model_name.clone(),
                prompt: prompt.clone(),
                cached_content: Some(cached.name.clone()),
                response_schema: Some(media_summary_schema()),
                temperature: self.model.temperature,
                ..GenerateRequest::default()
            };
            let generated = match ctx.inference.generate_content(request).await {
                Ok(generated) => generated,
                Err(err) => {
                    counters.record_retry();
                    warn!(attempt, start = scope.start_secs(), error = %err, "content summary call failed");
                    last_error = err.to_string();
                    continue;
                }
            };
            counters.record(&generated);

            match accept_summary(&generated.text, length, &ctx.run.media_url()) {
                Ok(output) => return Ok(output),
                Err(reason) => {
                    counters.record_retry();
                    warn!(
                        attempt,
                        start = scope.start_secs(),
                        chunk = scope.is_chunk(),
                        reason = %reason,
                        "content summary validation failed"
                    );
                    last_error = reason;
                }
            }
        }
        Err(PipelineError::Validation {
            attempts: self.max_attempts,
            reason: last_error,
        })
    }
}

/// Parses, validates and stamps the media url onto a generated summary.
fn accept_summary(raw: &str, length_secs: u64, media_url: &str) -> Result<String, String> {
    let mut summary: MediaSummary =
        serde_json::from_str(raw).map_err(|err| format!("malformed content summary: {err}"))?;
    validate_summary(&summary, length_secs).map_err(|err| err.to_string())?;
    summary.media_url = media_url.to_string();
    serde_json::to_string(&summary).map_err(|err| err.to_string())
}

async fn consolidate_chunks(
    ctx: &AnalysisContext,
    windows: &[ChunkWindow],
    length: u64,
) -> PipelineResult<String> {
    let ids: Vec<String> = windows.iter().map(ChunkWindow::step_id).collect();
    let outputs = ctx.ledger.steps_output(&ids).await?;
    let mut parts = Vec::with_capacity(windows.len());
    for (window, id) in windows.iter().zip(&ids) {
        let raw = required(&outputs, id)?;
        let summary: MediaSummary =
            serde_json::from_str(raw).map_err(|err| PipelineError::InvalidInput {
                step: id.clone(),
                reason: err.to_string(),
            })?;
        parts.push((*window, summary));
    }
    let merged = chunk::consolidate(parts, length)?;
    info!(
        object = %ctx.run.object,
        segments = merged.segment_timestamps.len(),
        "consolidated chunk summaries"
    );
    Ok(serde_json::to_string(&merged)?)
}
