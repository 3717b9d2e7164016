use tracing::{info, warn};

use crate::cache::SystemInstruction;
use crate::config::ContentTypeSection;
use crate::inference::{GenerateRequest, ModelSpec, TimeWindow};
use crate::ledger::StepOutcome;
use crate::metrics::{TokenCounters, TokenUsage};
use crate::steps;

use super::{AnalysisContext, PipelineResult};

#[derive(Debug, Clone)]
pub struct ContentTypeStage {
    model: ModelSpec,
    section: ContentTypeSection,
}

impl ContentTypeStage {
    pub fn new(model: ModelSpec, section: ContentTypeSection) -> Self {
        Self { model, section }
    }

    pub async fn run(&self, ctx: &AnalysisContext) -> PipelineResult<(StepOutcome, TokenUsage)> {
        let counters = TokenCounters::default();
        let outcome = ctx
            .ledger
            .runner()
            .run(steps::CONTENT_TYPE, || self.classify(ctx, &counters))
            .await?;
        Ok((outcome, counters.log(steps::CONTENT_TYPE)))
    }

    async fn classify(
        &self,
        ctx: &AnalysisContext,
        counters: &TokenCounters,
    ) -> PipelineResult<String> {
        let prompt = ctx.templates.content_type_prompt(&self.section.types)?;
        let instruction =
            SystemInstruction::from_text(self.model.system_instruction.clone().unwrap_or_default());
        let window = TimeWindow::new(self.section.window_start_secs, self.section.window_end_secs);
        let cached = ctx
            .caches
            .get_or_create(&ctx.ledger.writer(), &self.model, &instruction, Some(window))
            .await?;

        let generated = ctx
            .inference
            .generate_content(GenerateRequest {
                model: self.model.model_name.clone(),
                prompt,
                cached_content: Some(cached.name),
                temperature: self.model.temperature,
                ..GenerateRequest::default()
            })
            .await?;
        counters.record(&generated);

        let content_type = match match_content_type(&generated.text, &self.section.types) {
            Some(found) => found.to_string(),
            None => {
                warn!(
                    answer = %generated.text.trim(),
                    default = %self.section.default_type,
                    "answer names no known content type, using default"
                );
                self.section.default_type.clone()
            }
        };
        info!(object = %ctx.run.object, content_type = %content_type, "content type");
        Ok(content_type)
    }
}

/// First configured type contained in the answer, ignoring case.
pub fn match_content_type<'a>(answer: &str, types: &'a [String]) -> Option<&'a str> {
    let answer = answer.trim().to_lowercase();
    types
        .iter()
        .find(|candidate| answer.contains(&candidate.to_lowercase()))
        .map(String::as_str)
}
