//! Step status ledger stored in the input object's attribute map.
//!
//! Every resumability guarantee of the pipeline comes from here: a step id
//! with a `completed` entry is never executed again for the same object.
//! Readers are lenient about the data (missing or malformed entries are
//! simply left out of the result) but strict about the store: a failed read
//! is an error, because treating it as "nothing completed yet" would rerun
//! work that already happened.

mod error;
mod models;
mod runner;
mod writer;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tracing::debug;

use crate::metadata::{MetadataStore, ObjectRef};

pub use error::{LedgerError, LedgerResult};
pub use models::{StepState, StepStatus, STEP_COMPLETED};
pub use runner::{StepOutcome, StepRunner};
pub use writer::LedgerWriter;
pub(crate) use writer::StagedRecord;

#[derive(Clone)]
pub struct Ledger {
    store: Arc<dyn MetadataStore>,
    object: ObjectRef,
}

impl std::fmt::Debug for Ledger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ledger")
            .field("object", &self.object)
            .finish_non_exhaustive()
    }
}

impl Ledger {
    pub fn new(store: Arc<dyn MetadataStore>, object: ObjectRef) -> Self {
        Self { store, object }
    }

    pub fn object(&self) -> &ObjectRef {
        &self.object
    }

    pub fn runner(&self) -> StepRunner {
        StepRunner::new(self.clone())
    }

    pub fn writer(&self) -> LedgerWriter {
        LedgerWriter::direct(self.clone())
    }

    /// Every decodable entry on the object, ordered by key.
    pub async fn entries(&self) -> LedgerResult<BTreeMap<String, StepStatus>> {
        let attributes = self.store.read_attributes(&self.object).await?;
        Ok(attributes
            .iter()
            .filter_map(|(key, raw)| decode(key, raw).map(|status| (key.clone(), status)))
            .collect())
    }

    pub async fn status(&self, step_id: &str) -> LedgerResult<Option<StepStatus>> {
        let attributes = self.store.read_attributes(&self.object).await?;
        Ok(attributes
            .get(step_id)
            .and_then(|raw| decode(step_id, raw)))
    }

    pub async fn is_completed(&self, step_id: &str) -> LedgerResult<bool> {
        Ok(self
            .status(step_id)
            .await?
            .map(|status| status.is_completed())
            .unwrap_or(false))
    }

    /// One store read, many lookups. Ids without a decodable entry are omitted.
    pub async fn steps_status<S: AsRef<str>>(
        &self,
        step_ids: &[S],
    ) -> LedgerResult<HashMap<String, StepState>> {
        self.steps_field(step_ids, |status| Some(status.state()))
            .await
    }

    /// Outputs of the listed steps that are completed.
    pub async fn steps_output<S: AsRef<str>>(
        &self,
        step_ids: &[S],
    ) -> LedgerResult<HashMap<String, String>> {
        self.steps_field(step_ids, |status| {
            status.is_completed().then(|| status.output.clone())
        })
        .await
    }

    async fn steps_field<S, T, F>(
        &self,
        step_ids: &[S],
        extract: F,
    ) -> LedgerResult<HashMap<String, T>>
    where
        S: AsRef<str>,
        F: Fn(&StepStatus) -> Option<T>,
    {
        let attributes = self.store.read_attributes(&self.object).await?;
        let mut fields = HashMap::with_capacity(step_ids.len());
        for step_id in step_ids {
            let step_id = step_id.as_ref();
            let Some(status) = attributes.get(step_id).and_then(|raw| decode(step_id, raw))
            else {
                continue;
            };
            if let Some(value) = extract(&status) {
                fields.insert(step_id.to_string(), value);
            }
        }
        Ok(fields)
    }

    pub async fn record_completed(&self, step_id: &str, output: &str) -> LedgerResult<()> {
        let encoded = encode(&StepStatus::completed(output))?;
        self.store
            .update_attributes(&self.object, HashMap::from([(step_id.to_string(), encoded)]))
            .await?;
        Ok(())
    }

    /// Writes every entry of `batch` in a single metadata update.
    pub async fn record_batch(&self, batch: &HashMap<String, StepStatus>) -> LedgerResult<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let mut attributes = HashMap::with_capacity(batch.len());
        for (step_id, status) in batch {
            attributes.insert(step_id.clone(), encode(status)?);
        }
        self.store
            .update_attributes(&self.object, attributes)
            .await?;
        Ok(())
    }
}

fn encode(status: &StepStatus) -> LedgerResult<String> {
    Ok(serde_json::to_string(status)?)
}

fn decode(step_id: &str, raw: &str) -> Option<StepStatus> {
    match serde_json::from_str::<StepStatus>(raw) {
        Ok(status) => Some(status),
        Err(err) => {
            debug!(step = %step_id, error = %err, "ignoring malformed ledger entry");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::MemoryMetadataStore;

    fn ledger() -> (MemoryMetadataStore, Ledger) {
        let store = MemoryMetadataStore::new();
        let ledger = Ledger::new(Arc::new(store.clone()), ObjectRef::new("b", "clip.mp4"));
        (store, ledger)
    }

    #[tokio::test]
    async fn batched_reads_skip_missing_and_malformed_entries() {
        let (store, ledger) = ledger();
        ledger.record_completed("a", "out-a").await.unwrap();
        store.insert_raw(ledger.object(), "b", "{not json");
        store.insert_raw(ledger.object(), "c", r#"{"output":"half","status":"running"}"#);

        let ids = ["a", "b", "c", "d"];
        let statuses = ledger.steps_status(&ids).await.unwrap();
        assert_eq!(statuses.len(), 2);
        assert_eq!(statuses["a"], StepState::Completed);
        assert_eq!(statuses["c"], StepState::Pending);

        let outputs = ledger.steps_output(&ids).await.unwrap();
        assert_eq!(outputs.len(), 1);
        assert_eq!(outputs["a"], "out-a");
        assert_eq!(store.read_count(), 2);
    }

    #[tokio::test]
    async fn batch_write_is_one_store_update() {
        let (store, ledger) = ledger();
        let batch = HashMap::from([
            ("s1".to_string(), StepStatus::completed("1")),
            ("s2".to_string(), StepStatus::completed("2")),
        ]);
        ledger.record_batch(&batch).await.unwrap();
        assert_eq!(store.write_count(), 1);
        assert!(ledger.is_completed("s1").await.unwrap());
        assert!(ledger.is_completed("s2").await.unwrap());
        assert!(!ledger.is_completed("s3").await.unwrap());
    }

    #[tokio::test]
    async fn stored_value_uses_ledger_layout() {
        let (store, ledger) = ledger();
        ledger.record_completed("ims_content_length", "3601").await.unwrap();
        let raw = store.snapshot(ledger.object());
        assert_eq!(
            raw["ims_content_length"],
            r#"{"output":"3601","status":"completed"}"#
        );
    }
}
