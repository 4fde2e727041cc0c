//! Node identity tracking.
//!
//! The freshest known display name and last-seen time per station, kept in two hash
//! keyspaces (`nodes` and `nodes:timestamps`). Last write wins by arrival order. Every
//! lookup is a live store read, so a name written by the dispatcher is visible as soon
//! as its write returns.

use std::cmp::Ordering;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::ingest::normalize::parse_timestamp;
use crate::record::{format_timestamp, BROADCAST_ID};
use crate::storage::{KeyValueStore, Keyspace, StoreError, StoreWrite};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeIdentity {
    pub station_id: String,
    pub name: String,
    /// Missing when the name write landed but the timestamp write did not.
    pub last_seen: Option<String>,
}

#[derive(Clone)]
pub struct NodeTracker {
    store: Arc<dyn KeyValueStore>,
}

impl NodeTracker {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// The two writes of an identity update, name first.
    pub fn writes(station_id: &str, name: &str, seen_at: &str) -> [StoreWrite; 2] {
        [
            StoreWrite::Upsert {
                keyspace: Keyspace::Nodes,
                field: station_id.to_string(),
                value: name.to_string(),
            },
            StoreWrite::Upsert {
                keyspace: Keyspace::NodeTimestamps,
                field: station_id.to_string(),
                value: seen_at.to_string(),
            },
        ]
    }

    pub fn upsert(&self, station_id: &str, name: &str, seen_at: &str) -> Result<(), StoreError> {
        for write in Self::writes(station_id, name, seen_at) {
            write.apply(self.store.as_ref())?;
        }
        Ok(())
    }

    pub fn lookup(&self, station_id: &str) -> Result<Option<NodeIdentity>, StoreError> {
        let Some(name) = self.store.read_field(Keyspace::Nodes, station_id)? else {
            return Ok(None);
        };
        let last_seen = self.store.read_field(Keyspace::NodeTimestamps, station_id)?;
        Ok(Some(NodeIdentity {
            station_id: station_id.to_string(),
            name,
            last_seen,
        }))
    }

    /// Every known node, most recently seen first.
    pub fn all(&self) -> Result<Vec<NodeIdentity>, StoreError> {
        let names = self.store.read_hash(Keyspace::Nodes)?;
        let mut seen = self.store.read_hash(Keyspace::NodeTimestamps)?;
        let mut nodes: Vec<NodeIdentity> = names
            .into_iter()
            .map(|(station_id, name)| {
                let last_seen = seen.remove(&station_id);
                NodeIdentity {
                    station_id,
                    name,
                    last_seen,
                }
            })
            .collect();
        nodes.sort_by(|a, b| by_recency(a.last_seen.as_deref(), b.last_seen.as_deref()));
        Ok(nodes)
    }

    /// Display name for `station_id`, or the id itself when unknown.
    pub fn resolve_name(&self, station_id: &str) -> String {
        match self.store.read_field(Keyspace::Nodes, station_id) {
            Ok(Some(name)) => name,
            Ok(None) => station_id.to_string(),
            Err(e) => {
                log::warn!("node name lookup for {} failed: {}", station_id, e);
                station_id.to_string()
            }
        }
    }

    /// Register the broadcast sentinel so message tables can name the recipient.
    pub fn seed_broadcast(&self, now: DateTime<Utc>) -> Result<(), StoreError> {
        self.upsert(BROADCAST_ID, BROADCAST_ID, &format_timestamp(now))
    }

    /// Register the station's own node under its configured name.
    pub fn seed_local(
        &self,
        station_id: &str,
        name: &str,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.upsert(station_id, name, &format_timestamp(now))
    }
}

// Newest first; entries without a parseable time sort last.
fn by_recency(a: Option<&str>, b: Option<&str>) -> Ordering {
    let a = a.and_then(parse_timestamp);
    let b = b.and_then(parse_timestamp);
    match (a, b) {
        (Some(a), Some(b)) => b.cmp(&a),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}
