use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::time::timeout;
use tracing::debug;

use super::{
    CacheRequest, CachedContent, GenerateRequest, GeneratedContent, InferenceClient,
    InferenceError, InferenceResult,
};

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embedding: Vec<f64>,
}

/// JSON gateway in front of the model provider.
///
/// `POST {endpoint}/caches`, `{endpoint}/generate` and `{endpoint}/embed`.
#[derive(Debug, Clone)]
pub struct HttpInferenceClient {
    client: reqwest::Client,
    endpoint: String,
    request_timeout: Duration,
}

impl HttpInferenceClient {
    pub fn new(endpoint: impl Into<String>, request_timeout: Duration) -> InferenceResult<Self> {
        let client = reqwest::Client::builder()
            .user_agent("ims-analyzer/0.1")
            .build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            request_timeout,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn post<B, R>(&self, path: &str, body: &B) -> InferenceResult<R>
    where
        B: Serialize + Sync,
        R: DeserializeOwned,
    {
        let url = format!("{}/{}", self.endpoint, path);
        debug!(target: "inference", url = %url, "posting request");
        let call = async {
            let response = self.client.post(&url).json(body).send().await?;
            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(InferenceError::Status {
                    status: status.as_u16(),
                    body,
                });
            }
            let bytes = response.bytes().await?;
            Ok(serde_json::from_slice::<R>(&bytes)?)
        };
        match timeout(self.request_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(InferenceError::Timeout {
                endpoint: url,
                timeout_secs: self.request_timeout.as_secs(),
            }),
        }
    }
}

#[async_trait]
impl InferenceClient for HttpInferenceClient {
    async fn create_cache(&self, request: CacheRequest) -> InferenceResult<CachedContent> {
        self.post("caches", &request).await
    }

    async fn generate_content(&self, request: GenerateRequest) -> InferenceResult<GeneratedContent> {
        self.post("generate", &request).await
    }

    async fn embed_content(&self, model: &str, text: &str) -> InferenceResult<Vec<f64>> {
        let response: EmbedResponse = self.post("embed", &EmbedRequest { model, text }).await?;
        Ok(response.embedding)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_drops_trailing_slash() {
        let client =
            HttpInferenceClient::new("http://127.0.0.1:8088/v1/", Duration::from_secs(5)).unwrap();
        assert_eq!(client.endpoint(), "http://127.0.0.1:8088/v1");
    }

    #[tokio::test]
    async fn unreachable_gateway_is_a_transport_error() {
        let client =
            HttpInferenceClient::new("http://127.0.0.1:9", Duration::from_secs(5)).unwrap();
        let err = client.embed_content("embed-model", "text").await.unwrap_err();
        assert!(matches!(
            err,
            InferenceError::Transport(_) | InferenceError::Timeout { .. }
        ));
    }
}
