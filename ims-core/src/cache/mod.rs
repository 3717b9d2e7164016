mod key;

use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::inference::{
    CacheRequest, CachedContent, InferenceClient, InferenceError, MediaReference, ModelSpec,
    TimeWindow,
};
use crate::ledger::{Ledger, LedgerError, LedgerWriter};

pub use key::{cache_key, SystemInstruction, CACHE_KEY_PREFIX, NO_SYSTEM_INSTRUCTION};

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),
    #[error("inference error: {0}")]
    Inference(#[from] InferenceError),
}

pub type CacheResult<T> = std::result::Result<T, CacheError>;

#[derive(Clone)]
pub struct ContentCacheManager {
    client: Arc<dyn InferenceClient>,
    ledger: Ledger,
    media: MediaReference,
}

impl std::fmt::Debug for ContentCacheManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentCacheManager")
            .field("ledger", &self.ledger)
            .field("media", &self.media)
            .finish_non_exhaustive()
    }
}

impl ContentCacheManager {
    pub fn new(client: Arc<dyn InferenceClient>, ledger: Ledger, media: MediaReference) -> Self {
        Self {
            client,
            ledger,
            media,
        }
    }

    /// A live entry under `key`, if any. Absent, malformed and expired entries read as `None`.
    pub async fn lookup(&self, key: &str) -> CacheResult<Option<CachedContent>> {
        let Some(status) = self.ledger.status(key).await? else {
            return Ok(None);
        };
        if !status.is_completed() {
            return Ok(None);
        }
        match serde_json::from_str::<CachedContent>(&status.output) {
            Ok(cached) if cached.is_live_at(Utc::now()) => Ok(Some(cached)),
            Ok(cached) => {
                debug!(key = %key, expired_at = %cached.expire_time, "content cache expired");
                Ok(None)
            }
            Err(err) => {
                debug!(key = %key, error = %err, "ignoring malformed content cache entry");
                Ok(None)
            }
        }
    }

    pub async fn get_or_create(
        &self,
        writer: &LedgerWriter,
        model: &ModelSpec,
        instruction: &SystemInstruction,
        window: Option<TimeWindow>,
    ) -> CacheResult<CachedContent> {
        let key = cache_key(&model.alias, &instruction.fingerprint(), window);
        if let Some(cached) = self.lookup(&key).await? {
            info!(key = %key, cache = %cached.name, "reusing content cache");
            return Ok(cached);
        }

        let request = CacheRequest {
            model: model.model_name.clone(),
            contents: vec![self.media.clone().clipped(window)],
            system_instruction: instruction.text(),
        };
        let cached = self.client.create_cache(request).await?;
        info!(
            key = %key,
            cache = %cached.name,
            expire_time = %cached.expire_time,
            "created content cache"
        );
        self.persist(writer, &key, &cached).await;
        Ok(cached)
    }

    // The cache is usable even when the record is lost; the next lookup recreates it.
    async fn persist(&self, writer: &LedgerWriter, key: &str, cached: &CachedContent) {
        let output = match serde_json::to_string(cached) {
            Ok(output) => output,
            Err(err) => {
                warn!(key = %key, error = %err, "failed to encode content cache entry");
                return;
            }
        };
        if let Err(err) = writer.record_completed(key, &output).await {
            warn!(key = %key, error = %err, "failed to record content cache entry");
        }
    }
}
