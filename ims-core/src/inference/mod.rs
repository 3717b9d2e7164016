mod http;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub use http::HttpInferenceClient;

#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("inference gateway returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("request to {endpoint} timed out after {timeout_secs}s")]
    Timeout { endpoint: String, timeout_secs: u64 },
    #[error("inference call rejected: {0}")]
    Rejected(String),
}

pub type InferenceResult<T> = std::result::Result<T, InferenceError>;

/// A configured model: the alias used in ledger keys plus provider settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSpec {
    pub alias: String,
    pub model_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

impl ModelSpec {
    pub fn new(alias: impl Into<String>, model_name: impl Into<String>) -> Self {
        Self {
            alias: alias.into(),
            model_name: model_name.into(),
            system_instruction: None,
            temperature: None,
        }
    }

    pub fn with_system_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.system_instruction = Some(instruction.into());
        self
    }
}

/// Half-open `[start_secs, end_secs)` clip of the input media.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start_secs: u64,
    pub end_secs: u64,
}

impl TimeWindow {
    pub fn new(start_secs: u64, end_secs: u64) -> Self {
        Self {
            start_secs,
            end_secs,
        }
    }

    pub fn len_secs(&self) -> u64 {
        self.end_secs.saturating_sub(self.start_secs)
    }
}

/// Reference to the input media, optionally clipped to a window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaReference {
    pub uri: String,
    pub mime_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window: Option<TimeWindow>,
}

impl MediaReference {
    pub fn new(uri: impl Into<String>, mime_type: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            mime_type: mime_type.into(),
            window: None,
        }
    }

    pub fn clipped(mut self, window: Option<TimeWindow>) -> Self {
        self.window = window;
        self
    }
}

/// Provider-side cached context. Serialized as the ledger output of a cache key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedContent {
    pub name: String,
    pub expire_time: DateTime<Utc>,
}

impl CachedContent {
    pub fn is_live_at(&self, now: DateTime<Utc>) -> bool {
        self.expire_time > now
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheRequest {
    pub model: String,
    pub contents: Vec<MediaReference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerateRequest {
    pub model: String,
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cached_content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media: Option<MediaReference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_schema: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GeneratedContent {
    pub text: String,
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
}

#[async_trait]
pub trait InferenceClient: Send + Sync {
    async fn create_cache(&self, request: CacheRequest) -> InferenceResult<CachedContent>;

    async fn generate_content(&self, request: GenerateRequest) -> InferenceResult<GeneratedContent>;

    async fn embed_content(&self, model: &str, text: &str) -> InferenceResult<Vec<f64>>;
}
