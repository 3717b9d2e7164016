use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use tracing::info;

use crate::inference::GeneratedContent;

/// Token usage of one step, shared by the workers of a fan-out.
#[derive(Debug, Default)]
pub struct TokenCounters {
    input: AtomicU64,
    output: AtomicU64,
    retries: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub retries: u64,
}

impl TokenUsage {
    pub fn merge(self, other: TokenUsage) -> TokenUsage {
        TokenUsage {
            input_tokens: self.input_tokens + other.input_tokens,
            output_tokens: self.output_tokens + other.output_tokens,
            retries: self.retries + other.retries,
        }
    }
}

impl TokenCounters {
    pub fn record(&self, generated: &GeneratedContent) {
        self.input.fetch_add(generated.input_tokens, Ordering::Relaxed);
        self.output.fetch_add(generated.output_tokens, Ordering::Relaxed);
    }

    pub fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> TokenUsage {
        TokenUsage {
            input_tokens: self.input.load(Ordering::Relaxed),
            output_tokens: self.output.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
        }
    }

    pub fn log(&self, step: &str) -> TokenUsage {
        let usage = self.snapshot();
        info!(
            step = %step,
            input_tokens = usage.input_tokens,
            output_tokens = usage.output_tokens,
            retries = usage.retries,
            "token usage"
        );
        usage
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accumulates_generations_and_retries() {
        let counters = TokenCounters::default();
        for _ in 0..2 {
            counters.record(&GeneratedContent {
                text: String::new(),
                input_tokens: 100,
                output_tokens: 7,
            });
        }
        counters.record_retry();
        assert_eq!(
            counters.snapshot(),
            TokenUsage {
                input_tokens: 200,
                output_tokens: 14,
                retries: 1
            }
        );
    }
}
