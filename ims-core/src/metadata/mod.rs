mod error;
mod memory;
mod sqlite;

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;

use crate::error::ConfigError;

pub use error::{MetadataError, MetadataResult};
pub use memory::MemoryMetadataStore;
pub use sqlite::{SqliteMetadataStore, SqliteMetadataStoreBuilder};

/// `bucket/object` reference to the input media.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectRef {
    pub bucket: String,
    pub object: String,
}

impl ObjectRef {
    pub fn new(bucket: impl Into<String>, object: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            object: object.into(),
        }
    }

    pub fn parse(value: &str) -> Result<Self, ConfigError> {
        let value = value.trim();
        if value.is_empty() {
            return Err(ConfigError::MissingInputFile);
        }
        match value.split_once('/') {
            Some((bucket, object)) if !bucket.is_empty() && !object.is_empty() => {
                Ok(Self::new(bucket, object))
            }
            _ => Err(ConfigError::InvalidObjectRef(value.to_string())),
        }
    }

    pub fn storage_uri(&self) -> String {
        format!("gs://{}/{}", self.bucket, self.object)
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.bucket, self.object)
    }
}

#[async_trait]
pub trait MetadataStore: Send + Sync {
    async fn read_attributes(&self, object: &ObjectRef) -> MetadataResult<HashMap<String, String>>;

    /// Merges `attributes` into the object's map; keys not listed are left untouched.
    async fn update_attributes(
        &self,
        object: &ObjectRef,
        attributes: HashMap<String, String>,
    ) -> MetadataResult<()>;
}
