//! Test doubles for the store seam and small pipeline helpers.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::time::Duration;

use meshstation::metrics::{IngestMetrics, Snapshot};
use meshstation::storage::{KeyValueStore, Keyspace, MemoryStore, StoreError, StoreWrite};

/// In-memory store that logs every successful write and can fail chosen write attempts.
#[derive(Default)]
pub struct RecordingStore {
    inner: MemoryStore,
    writes: Mutex<Vec<StoreWrite>>,
    attempts: AtomicUsize,
    failing_attempts: Mutex<HashSet<usize>>,
}

#[allow(dead_code)]
impl RecordingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the given write attempts (1-based, counting retries).
    pub fn failing_on(attempts: &[usize]) -> Self {
        let store = Self::default();
        store
            .failing_attempts
            .lock()
            .unwrap()
            .extend(attempts.iter().copied());
        store
    }

    pub fn writes(&self) -> Vec<StoreWrite> {
        self.writes.lock().unwrap().clone()
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    fn write(&self, write: StoreWrite) -> Result<(), StoreError> {
        let n = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if self.failing_attempts.lock().unwrap().contains(&n) {
            return Err(StoreError::Unavailable(format!("injected failure on attempt {n}")));
        }
        write.apply(&self.inner)?;
        self.writes.lock().unwrap().push(write);
        Ok(())
    }
}

impl KeyValueStore for RecordingStore {
    fn append(&self, keyspace: Keyspace, value: &str) -> Result<(), StoreError> {
        self.write(StoreWrite::Append {
            keyspace,
            value: value.to_string(),
        })
    }

    fn upsert_field(&self, keyspace: Keyspace, field: &str, value: &str) -> Result<(), StoreError> {
        self.write(StoreWrite::Upsert {
            keyspace,
            field: field.to_string(),
            value: value.to_string(),
        })
    }

    fn read_range(&self, keyspace: Keyspace, start: usize, count: usize) -> Result<Vec<String>, StoreError> {
        self.inner.read_range(keyspace, start, count)
    }

    fn read_hash(&self, keyspace: Keyspace) -> Result<BTreeMap<String, String>, StoreError> {
        self.inner.read_hash(keyspace)
    }

    fn read_field(&self, keyspace: Keyspace, field: &str) -> Result<Option<String>, StoreError> {
        self.inner.read_field(keyspace, field)
    }

    fn size(&self, keyspace: Keyspace) -> Result<usize, StoreError> {
        self.inner.size(keyspace)
    }

    fn retain(&self, keyspace: Keyspace, keep: &mut dyn FnMut(&str) -> bool) -> Result<usize, StoreError> {
        self.inner.retain(keyspace, keep)
    }

    fn remove_field(&self, keyspace: Keyspace, field: &str) -> Result<bool, StoreError> {
        self.inner.remove_field(keyspace, field)
    }
}

/// Store whose first write blocks until the test opens the gate (or drops the opener).
pub struct GatedStore {
    pub inner: RecordingStore,
    gate: Mutex<Option<mpsc::Receiver<()>>>,
    entered: Arc<tokio::sync::Notify>,
}

#[allow(dead_code)]
impl GatedStore {
    pub fn new() -> (Self, mpsc::Sender<()>, Arc<tokio::sync::Notify>) {
        let (tx, rx) = mpsc::channel();
        let entered = Arc::new(tokio::sync::Notify::new());
        let store = Self {
            inner: RecordingStore::new(),
            gate: Mutex::new(Some(rx)),
            entered: entered.clone(),
        };
        (store, tx, entered)
    }

    fn wait_at_gate(&self) {
        let gate = self.gate.lock().unwrap().take();
        if let Some(rx) = gate {
            self.entered.notify_one();
            let _ = rx.recv();
        }
    }
}

impl KeyValueStore for GatedStore {
    fn append(&self, keyspace: Keyspace, value: &str) -> Result<(), StoreError> {
        self.wait_at_gate();
        self.inner.append(keyspace, value)
    }

    fn upsert_field(&self, keyspace: Keyspace, field: &str, value: &str) -> Result<(), StoreError> {
        self.wait_at_gate();
        self.inner.upsert_field(keyspace, field, value)
    }

    fn read_range(&self, keyspace: Keyspace, start: usize, count: usize) -> Result<Vec<String>, StoreError> {
        self.inner.read_range(keyspace, start, count)
    }

    fn read_hash(&self, keyspace: Keyspace) -> Result<BTreeMap<String, String>, StoreError> {
        self.inner.read_hash(keyspace)
    }

    fn read_field(&self, keyspace: Keyspace, field: &str) -> Result<Option<String>, StoreError> {
        self.inner.read_field(keyspace, field)
    }

    fn size(&self, keyspace: Keyspace) -> Result<usize, StoreError> {
        self.inner.size(keyspace)
    }

    fn retain(&self, keyspace: Keyspace, keep: &mut dyn FnMut(&str) -> bool) -> Result<usize, StoreError> {
        self.inner.retain(keyspace, keep)
    }

    fn remove_field(&self, keyspace: Keyspace, field: &str) -> Result<bool, StoreError> {
        self.inner.remove_field(keyspace, field)
    }
}

/// Poll `metrics` until `done` holds, panicking after two seconds.
#[allow(dead_code)]
pub async fn wait_until(metrics: &IngestMetrics, done: impl Fn(&Snapshot) -> bool) -> Snapshot {
    for _ in 0..200 {
        let snap = metrics.snapshot();
        if done(&snap) {
            return snap;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached, metrics={:?}", metrics.snapshot());
}
