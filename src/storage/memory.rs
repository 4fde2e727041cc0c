use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use super::{KeyValueStore, Keyspace, Shape, StoreError, DEFAULT_KEY_PREFIX};

#[derive(Debug, Default)]
struct Inner {
    // Oldest first; reads walk from the back.
    lists: HashMap<Keyspace, Vec<String>>,
    hashes: HashMap<Keyspace, BTreeMap<String, String>>,
}

/// Volatile in-process store with the same semantics as [`super::SledStore`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("memory store mutex poisoned")
    }
}

impl KeyValueStore for MemoryStore {
    fn append(&self, keyspace: Keyspace, value: &str) -> Result<(), StoreError> {
        keyspace.expect_shape(DEFAULT_KEY_PREFIX, Shape::List)?;
        self.lock()
            .lists
            .entry(keyspace)
            .or_default()
            .push(value.to_string());
        Ok(())
    }

    fn upsert_field(
        &self,
        keyspace: Keyspace,
        field: &str,
        value: &str,
    ) -> Result<(), StoreError> {
        keyspace.expect_shape(DEFAULT_KEY_PREFIX, Shape::Hash)?;
        self.lock()
            .hashes
            .entry(keyspace)
            .or_default()
            .insert(field.to_string(), value.to_string());
        Ok(())
    }

    fn read_range(
        &self,
        keyspace: Keyspace,
        start: usize,
        count: usize,
    ) -> Result<Vec<String>, StoreError> {
        keyspace.expect_shape(DEFAULT_KEY_PREFIX, Shape::List)?;
        let guard = self.lock();
        Ok(guard
            .lists
            .get(&keyspace)
            .map(|list| list.iter().rev().skip(start).take(count).cloned().collect())
            .unwrap_or_default())
    }

    fn read_hash(&self, keyspace: Keyspace) -> Result<BTreeMap<String, String>, StoreError> {
        keyspace.expect_shape(DEFAULT_KEY_PREFIX, Shape::Hash)?;
        Ok(self.lock().hashes.get(&keyspace).cloned().unwrap_or_default())
    }

    fn read_field(&self, keyspace: Keyspace, field: &str) -> Result<Option<String>, StoreError> {
        keyspace.expect_shape(DEFAULT_KEY_PREFIX, Shape::Hash)?;
        Ok(self
            .lock()
            .hashes
            .get(&keyspace)
            .and_then(|h| h.get(field).cloned()))
    }

    fn size(&self, keyspace: Keyspace) -> Result<usize, StoreError> {
        let guard = self.lock();
        Ok(match keyspace.shape() {
            Shape::List => guard.lists.get(&keyspace).map_or(0, Vec::len),
            Shape::Hash => guard.hashes.get(&keyspace).map_or(0, BTreeMap::len),
        })
    }

    fn retain(
        &self,
        keyspace: Keyspace,
        keep: &mut dyn FnMut(&str) -> bool,
    ) -> Result<usize, StoreError> {
        keyspace.expect_shape(DEFAULT_KEY_PREFIX, Shape::List)?;
        let mut guard = self.lock();
        let Some(list) = guard.lists.get_mut(&keyspace) else {
            return Ok(0);
        };
        let before = list.len();
        list.retain(|entry| keep(entry));
        Ok(before - list.len())
    }

    fn remove_field(&self, keyspace: Keyspace, field: &str) -> Result<bool, StoreError> {
        keyspace.expect_shape(DEFAULT_KEY_PREFIX, Shape::Hash)?;
        Ok(self
            .lock()
            .hashes
            .get_mut(&keyspace)
            .is_some_and(|h| h.remove(field).is_some()))
    }
}
