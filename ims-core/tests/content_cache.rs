use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{Duration, Utc};

use ims_core::cache::{cache_key, SystemInstruction};
use ims_core::inference::{CacheRequest, InferenceResult};
use ims_core::{
    CachedContent, ContentCacheManager, GenerateRequest, GeneratedContent, InferenceClient,
    Ledger, MediaReference, MemoryMetadataStore, ModelSpec, ObjectRef, TimeWindow,
};

struct LeasingClient {
    created: Mutex<Vec<CacheRequest>>,
    lease: Duration,
}

impl LeasingClient {
    fn new(lease: Duration) -> Self {
        Self {
            created: Mutex::new(Vec::new()),
            lease,
        }
    }

    fn created(&self) -> usize {
        self.created.lock().unwrap().len()
    }
}

#[async_trait]
impl InferenceClient for LeasingClient {
    async fn create_cache(&self, request: CacheRequest) -> InferenceResult<CachedContent> {
        let mut created = self.created.lock().unwrap();
        created.push(request);
        Ok(CachedContent {
            name: format!("cachedContents/lease-{}", created.len()),
            expire_time: Utc::now() + self.lease,
        })
    }

    async fn generate_content(&self, request: GenerateRequest) -> InferenceResult<GeneratedContent> {
        Ok(GeneratedContent {
            text: request.cached_content.unwrap_or_default(),
            input_tokens: 1,
            output_tokens: 1,
        })
    }

    async fn embed_content(&self, _model: &str, _text: &str) -> InferenceResult<Vec<f64>> {
        Ok(Vec::new())
    }
}

fn manager(client: Arc<LeasingClient>) -> (Ledger, ContentCacheManager) {
    let object = ObjectRef::new("media-in", "show.mp4");
    let ledger = Ledger::new(Arc::new(MemoryMetadataStore::new()), object.clone());
    let manager = ContentCacheManager::new(
        client,
        ledger.clone(),
        MediaReference::new(object.storage_uri(), "video/mp4"),
    );
    (ledger, manager)
}

#[tokio::test]
async fn expired_lease_is_replaced() {
    let client = Arc::new(LeasingClient::new(Duration::seconds(-5)));
    let (ledger, manager) = manager(client.clone());
    let model = ModelSpec::new("creative-flash", "gemini-2.5-flash");
    let instruction = SystemInstruction::from_text("You are an archivist.");

    let first = manager
        .get_or_create(&ledger.writer(), &model, &instruction, None)
        .await
        .unwrap();
    let second = manager
        .get_or_create(&ledger.writer(), &model, &instruction, None)
        .await
        .unwrap();
    assert_ne!(first.name, second.name);
    assert_eq!(client.created(), 2);

    let key = cache_key(&model.alias, &instruction.fingerprint(), None);
    let recorded: CachedContent =
        serde_json::from_str(&ledger.status(&key).await.unwrap().unwrap().output).unwrap();
    assert_eq!(recorded, second);
}

#[tokio::test]
async fn each_window_gets_its_own_lease() {
    let client = Arc::new(LeasingClient::new(Duration::hours(1)));
    let (ledger, manager) = manager(client.clone());
    let model = ModelSpec::new("creative-flash", "gemini-2.5-flash");
    let instruction = SystemInstruction::none();
    let writer = ledger.writer();

    for window in [None, Some(TimeWindow::new(0, 300)), Some(TimeWindow::new(300, 600))] {
        manager
            .get_or_create(&writer, &model, &instruction, window)
            .await
            .unwrap();
        manager
            .get_or_create(&writer, &model, &instruction, window)
            .await
            .unwrap();
    }
    assert_eq!(client.created(), 3);

    let created = client.created.lock().unwrap();
    assert_eq!(created[0].contents[0].window, None);
    assert_eq!(created[2].contents[0].window, Some(TimeWindow::new(300, 600)));
    assert_eq!(created[1].system_instruction, None);
}
