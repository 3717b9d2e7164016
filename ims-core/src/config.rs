use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::chunk::ChunkingConfig;
use crate::error::{ConfigError, Result};
use crate::fanout::FanOutConfig;
use crate::inference::ModelSpec;
use crate::probe::{ProbeConfig, ProxyConfig};
use crate::table::MAX_ROWS_PER_INSERT;
use crate::templates::TemplatesConfig;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ImsConfig {
    #[serde(default)]
    pub pipeline: PipelineSection,
    pub storage: StorageSection,
    #[serde(default)]
    pub fan_out: FanOutConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub summary: SummarySection,
    pub content_type: ContentTypeSection,
    #[serde(default)]
    pub probe: ProbeConfig,
    #[serde(default)]
    pub proxy: ProxyConfig,
    pub inference: InferenceSection,
    pub models: HashMap<String, ModelSection>,
    pub embedding: EmbeddingSection,
    pub table_store: TableStoreSection,
    #[serde(default)]
    pub categories: BTreeMap<String, CategorySection>,
    pub templates: TemplatesConfig,
}

impl ImsConfig {
    /// Resolves a relative path against `base`, typically the config file's directory.
    pub fn resolve_path<P: AsRef<Path>>(base: &Path, candidate: P) -> PathBuf {
        let path = candidate.as_ref();
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            base.join(path)
        }
    }

    pub fn model(&self, alias: &str) -> Result<ModelSpec> {
        let section = self
            .models
            .get(alias)
            .ok_or_else(|| ConfigError::UnknownModel(alias.to_string()))?;
        Ok(ModelSpec {
            alias: alias.to_string(),
            model_name: section.model_name.clone(),
            system_instruction: section.system_instruction.clone(),
            temperature: section.temperature,
        })
    }

    /// `key - definition; ` for every category, in key order.
    pub fn categories_line(&self) -> String {
        self.categories
            .iter()
            .map(|(key, category)| format!("{key} - {}; ", category.definition))
            .collect()
    }

    pub fn validate(&self) -> Result<()> {
        if self.content_type.types.is_empty() {
            return Err(ConfigError::Invalid("content_type.types is empty".into()));
        }
        if self.content_type.default_type.trim().is_empty() {
            return Err(ConfigError::Invalid("content_type.default_type is empty".into()));
        }
        if self.content_type.window_end_secs <= self.content_type.window_start_secs {
            return Err(ConfigError::Invalid(
                "content_type window must end after it starts".into(),
            ));
        }
        let batch = self.table_store.insert_batch_size;
        if batch == 0 || batch > MAX_ROWS_PER_INSERT {
            return Err(ConfigError::Invalid(format!(
                "table_store.insert_batch_size must be within 1..={MAX_ROWS_PER_INSERT}, got {batch}"
            )));
        }
        if self.summary.max_attempts == 0 {
            return Err(ConfigError::Invalid("summary.max_attempts must be at least 1".into()));
        }
        for alias in [
            &self.content_type.model,
            &self.summary.model,
            &self.summary.segment_model,
        ] {
            self.model(alias)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PipelineSection {
    #[serde(default = "default_mount_point")]
    pub mount_point: String,
    #[serde(default = "default_media_url_prefix")]
    pub media_url_prefix: String,
    #[serde(default = "default_input_mime_type")]
    pub input_mime_type: String,
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            mount_point: default_mount_point(),
            media_url_prefix: default_media_url_prefix(),
            input_mime_type: default_input_mime_type(),
        }
    }
}

fn default_mount_point() -> String {
    "/mnt".into()
}

fn default_media_url_prefix() -> String {
    "https://storage.mtls.cloud.google.com".into()
}

fn default_input_mime_type() -> String {
    "video/mp4".into()
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageSection {
    pub metadata_db: String,
    pub table_db: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SummarySection {
    #[serde(default = "default_model_alias")]
    pub model: String,
    #[serde(default = "default_model_alias")]
    pub segment_model: String,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

impl Default for SummarySection {
    fn default() -> Self {
        Self {
            model: default_model_alias(),
            segment_model: default_model_alias(),
            max_attempts: default_max_attempts(),
        }
    }
}

fn default_model_alias() -> String {
    "creative-flash".into()
}

fn default_max_attempts() -> u32 {
    5
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContentTypeSection {
    #[serde(default = "default_model_alias")]
    pub model: String,
    pub types: Vec<String>,
    pub default_type: String,
    #[serde(default)]
    pub window_start_secs: u64,
    #[serde(default = "default_content_type_window_end")]
    pub window_end_secs: u64,
}

fn default_content_type_window_end() -> u64 {
    30
}

#[derive(Debug, Clone, Deserialize)]
pub struct InferenceSection {
    pub endpoint: String,
    #[serde(default = "default_inference_timeout")]
    pub timeout_secs: u64,
}

fn default_inference_timeout() -> u64 {
    300
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModelSection {
    pub model_name: String,
    #[serde(default)]
    pub system_instruction: Option<String>,
    #[serde(default)]
    pub temperature: Option<f32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddingSection {
    pub model_name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TableStoreSection {
    pub dataset: String,
    pub media_table: String,
    pub embedding_table: String,
    #[serde(default = "default_insert_batch_size")]
    pub insert_batch_size: usize,
}

fn default_insert_batch_size() -> usize {
    MAX_ROWS_PER_INSERT
}

#[derive(Debug, Clone, Deserialize)]
pub struct CategorySection {
    pub definition: String,
}

pub fn load_ims_config<P: AsRef<Path>>(path: P) -> Result<ImsConfig> {
    let config: ImsConfig = load_toml(path)?;
    config.validate()?;
    Ok(config)
}

fn load_toml<T, P>(path: P) -> Result<T>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        source,
        path: path.to_path_buf(),
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        source,
        path: path.to_path_buf(),
    })
}

#[cfg(test)]
pub(crate) fn fixture_path() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("../configs/ims.toml")
}

#[cfg(test)]
pub(crate) fn fixture_config() -> ImsConfig {
    load_ims_config(fixture_path()).expect("fixture config should parse")
}
