use crate::ledger::{Ledger, StepOutcome};
use crate::probe::{MediaProbe, ProxyTranscoder};
use crate::steps;

use super::{PipelineError, PipelineResult, RunContext};

/// Low-resolution proxy of the input, written next to the mounted media.
///
/// Runs outside the analysis sequence and needs no inference collaborators.
#[derive(Debug, Clone)]
pub struct ProxyStage {
    probe: MediaProbe,
    transcoder: ProxyTranscoder,
}

impl ProxyStage {
    pub fn new(probe: MediaProbe, transcoder: ProxyTranscoder) -> Self {
        Self { probe, transcoder }
    }

    pub fn from_run(run: &RunContext) -> Self {
        Self::new(
            MediaProbe::new(run.config.probe.clone()),
            ProxyTranscoder::new(run.config.proxy.clone()),
        )
    }

    pub async fn run(&self, run: &RunContext, ledger: &Ledger) -> PipelineResult<StepOutcome> {
        ledger
            .runner()
            .run(steps::GENERATE_PROXY, || async {
                let input = self.probe.wait_for(&run.input_path()).await?;
                let relative = self
                    .transcoder
                    .transcode(&input, &run.mount_point, &run.object.object)
                    .await?;
                Ok::<_, PipelineError>(relative)
            })
            .await
    }
}
