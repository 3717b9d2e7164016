use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use rusqlite::{params, Connection, OpenFlags};

use crate::sqlite::{open_configured, open_flags};

use super::{MetadataError, MetadataResult, MetadataStore, ObjectRef};

const METADATA_SCHEMA: &str = include_str!("../../../sql/metadata.sql");

#[derive(Debug, Clone)]
pub struct SqliteMetadataStoreBuilder {
    path: Option<PathBuf>,
    read_only: bool,
    create_if_missing: bool,
}

impl Default for SqliteMetadataStoreBuilder {
    fn default() -> Self {
        Self {
            path: None,
            read_only: false,
            create_if_missing: true,
        }
    }
}

impl SqliteMetadataStoreBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn path(mut self, path: impl AsRef<Path>) -> Self {
        self.path = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn read_only(mut self, value: bool) -> Self {
        self.read_only = value;
        self
    }

    pub fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    pub fn build(self) -> MetadataResult<SqliteMetadataStore> {
        let path = self.path.ok_or(MetadataError::MissingStore)?;
        Ok(SqliteMetadataStore {
            path,
            flags: open_flags(self.read_only, self.create_if_missing),
        })
    }
}

/// Attribute maps kept in a local SQLite file, one row per `(bucket, object, key)`.
#[derive(Debug, Clone)]
pub struct SqliteMetadataStore {
    path: PathBuf,
    flags: OpenFlags,
}

impl SqliteMetadataStore {
    pub fn builder() -> SqliteMetadataStoreBuilder {
        SqliteMetadataStoreBuilder::new()
    }

    pub fn new(path: impl AsRef<Path>) -> MetadataResult<Self> {
        SqliteMetadataStoreBuilder::new().path(path).build()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open(&self) -> MetadataResult<Connection> {
        open_configured(&self.path, self.flags).map_err(|source| MetadataError::Open {
            path: self.path.clone(),
            source,
        })
    }

    pub fn initialize(&self) -> MetadataResult<()> {
        let conn = self.open()?;
        conn.execute_batch(METADATA_SCHEMA)?;
        Ok(())
    }

    fn read_sync(&self, object: &ObjectRef) -> MetadataResult<HashMap<String, String>> {
        let conn = self.open()?;
        let mut stmt =
            conn.prepare("SELECT key, value FROM object_metadata WHERE bucket = ?1 AND object = ?2")?;
        let rows = stmt
            .query_map(params![&object.bucket, &object.object], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<rusqlite::Result<HashMap<_, _>>>()?;
        Ok(rows)
    }

    fn update_sync(
        &self,
        object: &ObjectRef,
        attributes: &HashMap<String, String>,
    ) -> MetadataResult<()> {
        let mut conn = self.open()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO object_metadata (bucket, object, key, value)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(bucket, object, key) DO UPDATE SET
                    value = excluded.value,
                    updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')",
            )?;
            for (key, value) in attributes {
                stmt.execute(params![&object.bucket, &object.object, key, value])?;
            }
        }
        tx.commit()?;
        Ok(())
    }
}

#[async_trait]
impl MetadataStore for SqliteMetadataStore {
    async fn read_attributes(&self, object: &ObjectRef) -> MetadataResult<HashMap<String, String>> {
        let store = self.clone();
        let object = object.clone();
        tokio::task::spawn_blocking(move || store.read_sync(&object)).await?
    }

    async fn update_attributes(
        &self,
        object: &ObjectRef,
        attributes: HashMap<String, String>,
    ) -> MetadataResult<()> {
        if attributes.is_empty() {
            return Ok(());
        }
        let store = self.clone();
        let object = object.clone();
        tokio::task::spawn_blocking(move || store.update_sync(&object, &attributes)).await?
    }
}
