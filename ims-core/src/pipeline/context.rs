use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::cache::ContentCacheManager;
use crate::config::ImsConfig;
use crate::inference::{InferenceClient, MediaReference};
use crate::ledger::Ledger;
use crate::metadata::{MetadataStore, ObjectRef};
use crate::table::TableStore;
use crate::templates::TemplateService;

/// Identity of one run: which object, where it is mounted, and the loaded config.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub object: ObjectRef,
    pub mount_point: PathBuf,
    pub config: Arc<ImsConfig>,
}

impl RunContext {
    pub fn new(object: ObjectRef, config: Arc<ImsConfig>) -> Self {
        let mount_point = PathBuf::from(&config.pipeline.mount_point);
        Self {
            object,
            mount_point,
            config,
        }
    }

    pub fn with_mount_point(mut self, mount_point: impl AsRef<Path>) -> Self {
        self.mount_point = mount_point.as_ref().to_path_buf();
        self
    }

    /// `{mount_point}/{bucket}/{object}`
    pub fn input_path(&self) -> PathBuf {
        self.mount_point
            .join(&self.object.bucket)
            .join(&self.object.object)
    }

    pub fn media_url(&self) -> String {
        format!(
            "{}/{}/{}",
            self.config.pipeline.media_url_prefix.trim_end_matches('/'),
            self.object.bucket,
            self.object.object
        )
    }

    pub fn media_reference(&self) -> MediaReference {
        MediaReference::new(
            self.object.storage_uri(),
            &self.config.pipeline.input_mime_type,
        )
    }
}

/// Everything the analysis stages share: the ledger of the input object and
/// the collaborators injected at startup.
#[derive(Clone)]
pub struct AnalysisContext {
    pub run: Arc<RunContext>,
    pub ledger: Ledger,
    pub inference: Arc<dyn InferenceClient>,
    pub tables: Arc<dyn TableStore>,
    pub caches: ContentCacheManager,
    pub templates: Arc<TemplateService>,
}

impl std::fmt::Debug for AnalysisContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnalysisContext")
            .field("run", &self.run)
            .field("ledger", &self.ledger)
            .finish_non_exhaustive()
    }
}

impl AnalysisContext {
    pub fn new(
        run: RunContext,
        metadata: Arc<dyn MetadataStore>,
        inference: Arc<dyn InferenceClient>,
        tables: Arc<dyn TableStore>,
    ) -> Self {
        let ledger = Ledger::new(metadata, run.object.clone());
        let caches = ContentCacheManager::new(
            inference.clone(),
            ledger.clone(),
            run.media_reference(),
        );
        let templates = Arc::new(TemplateService::new(run.config.templates.clone()));
        Self {
            run: Arc::new(run),
            ledger,
            inference,
            tables,
            caches,
            templates,
        }
    }

    pub fn config(&self) -> &ImsConfig {
        &self.run.config
    }
}
