use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use sled::IVec;

use super::{KeyValueStore, Keyspace, Shape, StoreError, DEFAULT_KEY_PREFIX};
use crate::logutil::TARGET_STORE;

/// Helper builder so tests can easily create throwaway stores with custom paths.
pub struct SledStoreBuilder {
    path: PathBuf,
    prefix: String,
    flush_every_write: bool,
}

impl SledStoreBuilder {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            prefix: DEFAULT_KEY_PREFIX.to_string(),
            flush_every_write: true,
        }
    }

    pub fn key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Leave durability to sled's background flusher instead of flushing after each write.
    pub fn lazy_flush(mut self) -> Self {
        self.flush_every_write = false;
        self
    }

    pub fn open(self) -> Result<SledStore, StoreError> {
        SledStore::open_with_options(self.path, self.prefix, self.flush_every_write)
    }
}

/// Sled-backed keyspaces. Each keyspace is its own tree named by its full key.
///
/// List entries are keyed by big-endian ids from [`sled::Db::generate_id`], so key order
/// is insertion order and reverse iteration yields newest first. Hash fields are keyed
/// by the field's UTF-8 bytes.
pub struct SledStore {
    db: sled::Db,
    prefix: String,
    trees: HashMap<Keyspace, sled::Tree>,
    flush_every_write: bool,
}

impl SledStore {
    /// Open (or create) the store rooted at `path` with the default key prefix.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        Self::open_with_options(path, DEFAULT_KEY_PREFIX.to_string(), true)
    }

    fn open_with_options<P: AsRef<Path>>(
        path: P,
        prefix: String,
        flush_every_write: bool,
    ) -> Result<Self, StoreError> {
        let path_ref = path.as_ref();
        std::fs::create_dir_all(path_ref)?;
        let db = sled::open(path_ref)?;
        let mut trees = HashMap::new();
        for ks in Keyspace::ALL {
            trees.insert(ks, db.open_tree(ks.key(&prefix))?);
        }
        log::debug!(target: TARGET_STORE, "opened sled store at {} (prefix {})", path_ref.display(), prefix);
        Ok(Self {
            db,
            prefix,
            trees,
            flush_every_write,
        })
    }

    pub fn key_prefix(&self) -> &str {
        &self.prefix
    }

    fn tree(&self, keyspace: Keyspace, shape: Shape) -> Result<&sled::Tree, StoreError> {
        keyspace.expect_shape(&self.prefix, shape)?;
        self.trees
            .get(&keyspace)
            .ok_or_else(|| StoreError::Unavailable(format!("tree {} not open", keyspace.key(&self.prefix))))
    }

    fn decode(&self, keyspace: Keyspace, bytes: IVec) -> Result<String, StoreError> {
        String::from_utf8(bytes.to_vec()).map_err(|_| StoreError::Utf8 {
            keyspace: keyspace.key(&self.prefix),
        })
    }

    fn after_write(&self, tree: &sled::Tree) -> Result<(), StoreError> {
        if self.flush_every_write {
            tree.flush()?;
        }
        Ok(())
    }
}

impl KeyValueStore for SledStore {
    fn append(&self, keyspace: Keyspace, value: &str) -> Result<(), StoreError> {
        let tree = self.tree(keyspace, Shape::List)?;
        let id = self.db.generate_id()?;
        tree.insert(id.to_be_bytes(), value.as_bytes())?;
        self.after_write(tree)?;
        log::debug!(target: TARGET_STORE, "append {} ({} bytes)", keyspace.key(&self.prefix), value.len());
        Ok(())
    }

    fn upsert_field(
        &self,
        keyspace: Keyspace,
        field: &str,
        value: &str,
    ) -> Result<(), StoreError> {
        let tree = self.tree(keyspace, Shape::Hash)?;
        tree.insert(field.as_bytes(), value.as_bytes())?;
        self.after_write(tree)?;
        log::debug!(target: TARGET_STORE, "hset {} {}", keyspace.key(&self.prefix), field);
        Ok(())
    }

    fn read_range(
        &self,
        keyspace: Keyspace,
        start: usize,
        count: usize,
    ) -> Result<Vec<String>, StoreError> {
        let tree = self.tree(keyspace, Shape::List)?;
        let mut out = Vec::new();
        for item in tree.iter().rev().skip(start).take(count) {
            let (_, value) = item?;
            out.push(self.decode(keyspace, value)?);
        }
        Ok(out)
    }

    fn read_hash(&self, keyspace: Keyspace) -> Result<BTreeMap<String, String>, StoreError> {
        let tree = self.tree(keyspace, Shape::Hash)?;
        let mut out = BTreeMap::new();
        for item in tree.iter() {
            let (field, value) = item?;
            out.insert(self.decode(keyspace, field)?, self.decode(keyspace, value)?);
        }
        Ok(out)
    }

    fn read_field(&self, keyspace: Keyspace, field: &str) -> Result<Option<String>, StoreError> {
        let tree = self.tree(keyspace, Shape::Hash)?;
        match tree.get(field.as_bytes())? {
            Some(value) => Ok(Some(self.decode(keyspace, value)?)),
            None => Ok(None),
        }
    }

    fn size(&self, keyspace: Keyspace) -> Result<usize, StoreError> {
        let tree = self.tree(keyspace, keyspace.shape())?;
        Ok(tree.len())
    }

    fn retain(
        &self,
        keyspace: Keyspace,
        keep: &mut dyn FnMut(&str) -> bool,
    ) -> Result<usize, StoreError> {
        let tree = self.tree(keyspace, Shape::List)?;
        let mut doomed = Vec::new();
        for item in tree.iter() {
            let (key, value) = item?;
            // Entries that are not even UTF-8 can never be kept.
            let keep_it = match std::str::from_utf8(&value) {
                Ok(text) => keep(text),
                Err(_) => false,
            };
            if !keep_it {
                doomed.push(key);
            }
        }
        for key in &doomed {
            tree.remove(key)?;
        }
        tree.flush()?;
        if !doomed.is_empty() {
            log::debug!(target: TARGET_STORE, "removed {} entries from {}", doomed.len(), keyspace.key(&self.prefix));
        }
        Ok(doomed.len())
    }

    fn remove_field(&self, keyspace: Keyspace, field: &str) -> Result<bool, StoreError> {
        let tree = self.tree(keyspace, Shape::Hash)?;
        let existed = tree.remove(field.as_bytes())?.is_some();
        self.after_write(tree)?;
        Ok(existed)
    }

    fn flush(&self) -> Result<(), StoreError> {
        self.db.flush()?;
        Ok(())
    }
}
