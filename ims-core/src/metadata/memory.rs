use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::{MetadataError, MetadataResult, MetadataStore, ObjectRef};

/// In-process store used by tests and dry runs. Can be told to reject writes.
#[derive(Debug, Clone, Default)]
pub struct MemoryMetadataStore {
    inner: Arc<MemoryInner>,
}

#[derive(Debug, Default)]
struct MemoryInner {
    objects: Mutex<HashMap<ObjectRef, HashMap<String, String>>>,
    reads: AtomicUsize,
    writes: AtomicUsize,
    failing_writes: AtomicUsize,
}

impl MemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes a raw attribute, bypassing failure injection and counters.
    pub fn insert_raw(&self, object: &ObjectRef, key: impl Into<String>, value: impl Into<String>) {
        let mut objects = self.lock();
        objects
            .entry(object.clone())
            .or_default()
            .insert(key.into(), value.into());
    }

    pub fn snapshot(&self, object: &ObjectRef) -> HashMap<String, String> {
        self.lock().get(object).cloned().unwrap_or_default()
    }

    /// Successful `update_attributes` calls so far.
    pub fn write_count(&self) -> usize {
        self.inner.writes.load(Ordering::SeqCst)
    }

    pub fn read_count(&self) -> usize {
        self.inner.reads.load(Ordering::SeqCst)
    }

    /// The next `count` writes return an error and leave the map unchanged.
    pub fn fail_next_writes(&self, count: usize) {
        self.inner.failing_writes.store(count, Ordering::SeqCst);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<ObjectRef, HashMap<String, String>>> {
        match self.inner.objects.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn take_injected_failure(&self) -> bool {
        self.inner
            .failing_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |remaining| {
                remaining.checked_sub(1)
            })
            .is_ok()
    }
}

#[async_trait]
impl MetadataStore for MemoryMetadataStore {
    async fn read_attributes(&self, object: &ObjectRef) -> MetadataResult<HashMap<String, String>> {
        self.inner.reads.fetch_add(1, Ordering::SeqCst);
        Ok(self.snapshot(object))
    }

    async fn update_attributes(
        &self,
        object: &ObjectRef,
        attributes: HashMap<String, String>,
    ) -> MetadataResult<()> {
        if self.take_injected_failure() {
            return Err(MetadataError::Rejected {
                object: object.to_string(),
                reason: "injected write failure".into(),
            });
        }
        let mut objects = self.lock();
        objects.entry(object.clone()).or_default().extend(attributes);
        self.inner.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
