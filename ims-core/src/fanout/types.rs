use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FanOutConfig {
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_flush_interval_secs")]
    pub flush_interval_secs: u64,
}

impl FanOutConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_interval_secs.max(1))
    }

    pub(crate) fn slots(&self) -> usize {
        self.max_concurrent.max(1)
    }

    pub(crate) fn threshold(&self) -> usize {
        self.batch_size.max(1)
    }
}

impl Default for FanOutConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            batch_size: default_batch_size(),
            flush_interval_secs: default_flush_interval_secs(),
        }
    }
}

fn default_max_concurrent() -> usize {
    10
}

fn default_batch_size() -> usize {
    5
}

fn default_flush_interval_secs() -> u64 {
    30
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FanOutReport {
    pub submitted: usize,
    pub completed: usize,
    pub failed: Vec<String>,
    pub records_flushed: usize,
    pub flushes: usize,
    pub failed_flushes: usize,
}
