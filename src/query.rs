//! Read-only views over the keyspaces for display collaborators.
//!
//! Nothing here takes part in ingestion; readers run concurrently with the dispatcher
//! against the same store handle. Entries that no longer decode (hand edits, older
//! formats) are skipped with a warning instead of failing the whole view.

use std::sync::Arc;

use serde::de::DeserializeOwned;

use crate::logutil::escape_log;
use crate::nodes::{NodeIdentity, NodeTracker};
use crate::record::{DeviceTelemetry, EnvironmentTelemetry, Message, NetworkTelemetry, NodeInfo};
use crate::storage::{KeyValueStore, Keyspace, StoreError};

#[derive(Clone)]
pub struct QueryService {
    store: Arc<dyn KeyValueStore>,
    tracker: NodeTracker,
}

impl QueryService {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        let tracker = NodeTracker::new(store.clone());
        Self { store, tracker }
    }

    pub fn messages(&self, limit: usize) -> Result<Vec<Message>, StoreError> {
        self.recent(Keyspace::Messages, limit)
    }

    pub fn nodes(&self) -> Result<Vec<NodeIdentity>, StoreError> {
        self.tracker.all()
    }

    pub fn device_telemetry(&self, limit: usize) -> Result<Vec<DeviceTelemetry>, StoreError> {
        self.recent(Keyspace::DeviceTelemetry, limit)
    }

    pub fn network_telemetry(&self, limit: usize) -> Result<Vec<NetworkTelemetry>, StoreError> {
        self.recent(Keyspace::NetworkTelemetry, limit)
    }

    pub fn environment_telemetry(
        &self,
        limit: usize,
    ) -> Result<Vec<EnvironmentTelemetry>, StoreError> {
        self.recent(Keyspace::EnvironmentTelemetry, limit)
    }

    /// Node announcement history.
    pub fn node_log(&self, limit: usize) -> Result<Vec<NodeInfo>, StoreError> {
        self.recent(Keyspace::NodeLog, limit)
    }

    pub fn resolve_name(&self, station_id: &str) -> String {
        self.tracker.resolve_name(station_id)
    }

    /// Entry count per keyspace, in layout order.
    pub fn sizes(&self) -> Result<Vec<(Keyspace, usize)>, StoreError> {
        Keyspace::ALL
            .iter()
            .map(|ks| Ok((*ks, self.store.size(*ks)?)))
            .collect()
    }

    // Reads `limit` raw entries, so a corrupt entry shortens the page rather than
    // pulling in an older one.
    fn recent<T: DeserializeOwned>(
        &self,
        keyspace: Keyspace,
        limit: usize,
    ) -> Result<Vec<T>, StoreError> {
        let raw = self.store.read_range(keyspace, 0, limit)?;
        Ok(raw
            .into_iter()
            .filter_map(|entry| match serde_json::from_str::<T>(&entry) {
                Ok(v) => Some(v),
                Err(e) => {
                    log::warn!(
                        "skipping undecodable entry in {}: {} ({})",
                        keyspace,
                        e,
                        escape_log(&entry)
                    );
                    None
                }
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    #[test]
    fn corrupt_entries_are_skipped() {
        let store = Arc::new(MemoryStore::new());
        store
            .append(
                Keyspace::Messages,
                r#"{"timestamp":"2024-01-01T00:00:00Z","station_id":"!1","to_id":"^all","message":"ok"}"#,
            )
            .unwrap();
        store.append(Keyspace::Messages, "{broken").unwrap();
        let q = QueryService::new(store);
        let msgs = q.messages(10).unwrap();
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].text, "ok");
    }

    #[test]
    fn sizes_cover_every_keyspace() {
        let q = QueryService::new(Arc::new(MemoryStore::new()));
        let sizes = q.sizes().unwrap();
        assert_eq!(sizes.len(), Keyspace::ALL.len());
        assert!(sizes.iter().all(|(_, n)| *n == 0));
    }
}
