use std::path::{Path, PathBuf};

use async_trait::async_trait;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use serde_json::Value;

use crate::sqlite::{open_configured, open_flags};

use super::{TableError, TableResult, TableRow, TableStore, MAX_ROWS_PER_INSERT};

const TABLE_SCHEMA: &str = include_str!("../../../sql/tables.sql");

#[derive(Debug, Clone)]
pub struct SqliteTableStoreBuilder {
    path: Option<PathBuf>,
    read_only: bool,
    create_if_missing: bool,
}

impl Default for SqliteTableStoreBuilder {
    fn default() -> Self {
        Self {
            path: None,
            read_only: false,
            create_if_missing: true,
        }
    }
}

impl SqliteTableStoreBuilder {
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

    pub fn build(self) -> TableResult<SqliteTableStore> {
        let path = self.path.ok_or(TableError::MissingStore)?;
        Ok(SqliteTableStore {
            path,
            flags: open_flags(self.read_only, self.create_if_missing),
        })
    }
}

#[derive(Debug, Clone)]
pub struct SqliteTableStore {
    path: PathBuf,
    flags: OpenFlags,
}

impl SqliteTableStore {
    pub fn builder() -> SqliteTableStoreBuilder {
        SqliteTableStoreBuilder::new()
    }

    pub fn new(path: impl AsRef<Path>) -> TableResult<Self> {
        SqliteTableStoreBuilder::new().path(path).build()
    }

    fn open(&self) -> TableResult<Connection> {
        open_configured(&self.path, self.flags).map_err(|source| TableError::Open {
            path: self.path.clone(),
            source,
        })
    }

    pub fn initialize(&self) -> TableResult<()> {
        let conn = self.open()?;
        conn.execute_batch(TABLE_SCHEMA)?;
        Ok(())
    }

    pub fn count(&self, dataset: &str, table: &str) -> TableResult<usize> {
        let conn = self.open()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM table_rows WHERE dataset = ?1 AND table_name = ?2",
            params![dataset, table],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    fn insert_sync(&self, dataset: &str, table: &str, rows: &[TableRow]) -> TableResult<()> {
        let mut conn = self.open()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO table_rows (dataset, table_name, id, payload)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(dataset, table_name, id) DO UPDATE SET
                    payload = excluded.payload,
                    inserted_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')",
            )?;
            for row in rows {
                let payload = serde_json::to_string(&row.payload)?;
                stmt.execute(params![dataset, table, &row.id, payload])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn fetch_sync(&self, dataset: &str, table: &str, id: &str) -> TableResult<Option<Value>> {
        let conn = self.open()?;
        let payload: Option<String> = conn
            .query_row(
                "SELECT payload FROM table_rows WHERE dataset = ?1 AND table_name = ?2 AND id = ?3",
                params![dataset, table, id],
                |row| row.get(0),
            )
            .optional()?;
        payload
            .map(|raw| serde_json::from_str(&raw).map_err(TableError::from))
            .transpose()
    }
}

#[async_trait]
impl TableStore for SqliteTableStore {
    async fn insert(&self, dataset: &str, table: &str, rows: Vec<TableRow>) -> TableResult<()> {
        if rows.len() > MAX_ROWS_PER_INSERT {
            return Err(TableError::TooManyRows {
                count: rows.len(),
                max: MAX_ROWS_PER_INSERT,
            });
        }
        if rows.is_empty() {
            return Ok(());
        }
        let store = self.clone();
        let (dataset, table) = (dataset.to_string(), table.to_string());
        tokio::task::spawn_blocking(move || store.insert_sync(&dataset, &table, &rows)).await?
    }

    async fn fetch(&self, dataset: &str, table: &str, id: &str) -> TableResult<Option<Value>> {
        let store = self.clone();
        let (dataset, table, id) = (dataset.to_string(), table.to_string(), id.to_string());
        tokio::task::spawn_blocking(move || store.fetch_sync(&dataset, &table, &id)).await?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn temp_store(dir: &Path) -> SqliteTableStore {
        let store = SqliteTableStore::new(dir.join("tables.sqlite")).unwrap();
        store.initialize().unwrap();
        store
    }

    #[tokio::test]
    async fn insert_upserts_on_id() {
        let dir = TempDir::new().unwrap();
        let store = temp_store(dir.path());
        let row = |title: &str| TableRow {
            id: "m1".into(),
            payload: json!({"id": "m1", "title": title}),
        };
        store.insert("media_ds", "media", vec![row("draft")]).await.unwrap();
        store.insert("media_ds", "media", vec![row("final")]).await.unwrap();

        assert_eq!(store.count("media_ds", "media").unwrap(), 1);
        let fetched = store.fetch("media_ds", "media", "m1").await.unwrap().unwrap();
        assert_eq!(fetched["title"], "final");
        assert!(store.fetch("media_ds", "media", "nope").await.unwrap().is_none());
        assert!(store.fetch("other_ds", "media", "m1").await.unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_inserts_all_land() {
        let dir = TempDir::new().unwrap();
        let store = temp_store(dir.path());

        let mut writers = tokio::task::JoinSet::new();
        for batch in 0..8 {
            let store = store.clone();
            writers.spawn(async move {
                let rows = (0..10)
                    .map(|i| TableRow {
                        id: format!("{batch}-{i}"),
                        payload: json!({"batch": batch, "n": i}),
                    })
                    .collect();
                store.insert("ds", "embeddings", rows).await
            });
        }
        while let Some(result) = writers.join_next().await {
            result.unwrap().unwrap();
        }

        assert_eq!(store.count("ds", "embeddings").unwrap(), 80);
        let row = store.fetch("ds", "embeddings", "7-9").await.unwrap().unwrap();
        assert_eq!(row["n"], 9);
    }

    #[tokio::test]
    async fn rejects_oversized_inserts() {
        let dir = TempDir::new().unwrap();
        let store = temp_store(dir.path());
        let rows = (0..=MAX_ROWS_PER_INSERT)
            .map(|i| TableRow {
                id: i.to_string(),
                payload: json!({}),
            })
            .collect();
        let err = store.insert("ds", "embeddings", rows).await.unwrap_err();
        assert!(matches!(err, TableError::TooManyRows { count: 101, max: 100 }));
        assert_eq!(store.count("ds", "embeddings").unwrap(), 0);
    }
}
