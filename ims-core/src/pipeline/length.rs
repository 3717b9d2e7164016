use tracing::info;

use crate::ledger::StepOutcome;
use crate::probe::MediaProbe;
use crate::steps;

use super::{AnalysisContext, PipelineError, PipelineResult};

/// Records the media duration in whole seconds, rounded up past the probe's float.
#[derive(Debug, Clone)]
pub struct ContentLengthStage {
    probe: MediaProbe,
}

impl ContentLengthStage {
    pub fn new(probe: MediaProbe) -> Self {
        Self { probe }
    }

    pub async fn run(&self, ctx: &AnalysisContext) -> PipelineResult<StepOutcome> {
        ctx.ledger
            .runner()
            .run(steps::CONTENT_LENGTH, || async {
                let path = self.probe.wait_for(&ctx.run.input_path()).await?;
                let seconds = self.probe.duration_secs(&path).await?;
                info!(object = %ctx.run.object, seconds, "content length");
                Ok::<_, PipelineError>(seconds.to_string())
            })
            .await
    }
}

/// Reads the recorded content length back as seconds.
pub(crate) fn parse_length(step: &str, raw: &str) -> PipelineResult<u64> {
    raw.trim()
        .parse::<u64>()
        .map_err(|err| PipelineError::InvalidInput {
            step: step.to_string(),
            reason: err.to_string(),
        })
}
