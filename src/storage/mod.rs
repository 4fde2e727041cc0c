//! # Storage Module - Keyspace Persistence
//!
//! Every record kind lands in its own named keyspace in a key-value store. Keyspace
//! names are `<prefix>:<name>`; the default prefix is `meshtastic`:
//!
//! ```text
//! meshtastic:messages               list  serialized Message
//! meshtastic:nodes                  hash  station_id -> display_name
//! meshtastic:nodes:timestamps       hash  station_id -> last_seen
//! meshtastic:nodes:log              list  serialized NodeInfo
//! meshtastic:telemetry:device       list  serialized DeviceTelemetry
//! meshtastic:telemetry:network      list  serialized NetworkTelemetry
//! meshtastic:telemetry:environment  list  serialized EnvironmentTelemetry
//! ```
//!
//! Lists are append-only from the pipeline's point of view and always read newest first.
//! Each write primitive is a single atomic operation on one keyspace. Nothing here spans
//! keyspaces; multi-write steps are sequenced by the dispatcher.
//!
//! Two backends implement [`KeyValueStore`]:
//!
//! - [`SledStore`]: durable, one sled tree per keyspace.
//! - [`MemoryStore`]: process-local, used by tests and `--store :memory:` dry runs.

pub mod memory;
pub mod sled_store;

pub use memory::MemoryStore;
pub use sled_store::{SledStore, SledStoreBuilder};

use std::collections::BTreeMap;
use std::fmt;

use thiserror::Error;

use crate::record::RecordKind;

/// Default prefix for every keyspace name.
pub const DEFAULT_KEY_PREFIX: &str = "meshtastic";

/// Errors raised by a store backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// Directory creation and other filesystem trouble.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("stored value in {keyspace} is not valid utf-8")]
    Utf8 { keyspace: String },

    #[error("keyspace {keyspace} is a {actual}, not a {expected}")]
    WrongShape {
        keyspace: String,
        expected: Shape,
        actual: Shape,
    },

    /// Backend unavailable or refusing writes.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Shape {
    List,
    Hash,
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Shape::List => "list",
            Shape::Hash => "hash",
        })
    }
}

/// The named collections the base station writes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Keyspace {
    Messages,
    Nodes,
    NodeTimestamps,
    NodeLog,
    DeviceTelemetry,
    NetworkTelemetry,
    EnvironmentTelemetry,
}

impl Keyspace {
    pub const ALL: [Keyspace; 7] = [
        Keyspace::Messages,
        Keyspace::Nodes,
        Keyspace::NodeTimestamps,
        Keyspace::NodeLog,
        Keyspace::DeviceTelemetry,
        Keyspace::NetworkTelemetry,
        Keyspace::EnvironmentTelemetry,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Keyspace::Messages => "messages",
            Keyspace::Nodes => "nodes",
            Keyspace::NodeTimestamps => "nodes:timestamps",
            Keyspace::NodeLog => "nodes:log",
            Keyspace::DeviceTelemetry => "telemetry:device",
            Keyspace::NetworkTelemetry => "telemetry:network",
            Keyspace::EnvironmentTelemetry => "telemetry:environment",
        }
    }

    pub fn shape(self) -> Shape {
        match self {
            Keyspace::Nodes | Keyspace::NodeTimestamps => Shape::Hash,
            _ => Shape::List,
        }
    }

    /// Full key name under `prefix`, e.g. `meshtastic:telemetry:device`.
    pub fn key(self, prefix: &str) -> String {
        format!("{}:{}", prefix, self.name())
    }

    /// List keyspace receiving serialized records of `kind`.
    pub fn for_record(kind: RecordKind) -> Keyspace {
        match kind {
            RecordKind::Message => Keyspace::Messages,
            RecordKind::NodeInfo => Keyspace::NodeLog,
            RecordKind::DeviceTelemetry => Keyspace::DeviceTelemetry,
            RecordKind::NetworkTelemetry => Keyspace::NetworkTelemetry,
            RecordKind::EnvironmentTelemetry => Keyspace::EnvironmentTelemetry,
        }
    }

    pub(crate) fn expect_shape(self, prefix: &str, expected: Shape) -> Result<(), StoreError> {
        if self.shape() == expected {
            Ok(())
        } else {
            Err(StoreError::WrongShape {
                keyspace: self.key(prefix),
                expected,
                actual: self.shape(),
            })
        }
    }
}

impl fmt::Display for Keyspace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Narrow interface to the backing key-value service.
///
/// Calls are blocking; async callers go through `tokio::task::spawn_blocking`. The
/// handle is shared as `Arc<dyn KeyValueStore>` without client-side locking, so
/// implementations must be safe for concurrent readers and one writer.
pub trait KeyValueStore: Send + Sync {
    /// Push one value onto the newest end of a list keyspace.
    fn append(&self, keyspace: Keyspace, value: &str) -> Result<(), StoreError>;

    /// Set one field of a hash keyspace, replacing any previous value.
    fn upsert_field(&self, keyspace: Keyspace, field: &str, value: &str)
        -> Result<(), StoreError>;

    /// Up to `count` list entries starting `start` positions from the newest.
    fn read_range(
        &self,
        keyspace: Keyspace,
        start: usize,
        count: usize,
    ) -> Result<Vec<String>, StoreError>;

    fn read_all(&self, keyspace: Keyspace) -> Result<Vec<String>, StoreError> {
        self.read_range(keyspace, 0, usize::MAX)
    }

    fn read_hash(&self, keyspace: Keyspace) -> Result<BTreeMap<String, String>, StoreError>;

    fn read_field(&self, keyspace: Keyspace, field: &str) -> Result<Option<String>, StoreError>;

    /// Number of entries in a list or fields in a hash.
    fn size(&self, keyspace: Keyspace) -> Result<usize, StoreError>;

    fn list_len(&self, keyspace: Keyspace) -> Result<usize, StoreError> {
        self.size(keyspace)
    }

    /// Drop every list entry for which `keep` returns false; returns how many were removed.
    /// Administrative only, never called by the ingestion pipeline.
    fn retain(
        &self,
        keyspace: Keyspace,
        keep: &mut dyn FnMut(&str) -> bool,
    ) -> Result<usize, StoreError>;

    /// Administrative removal of a hash field; returns whether it existed.
    fn remove_field(&self, keyspace: Keyspace, field: &str) -> Result<bool, StoreError>;

    /// Make previous writes durable. No-op for volatile backends.
    fn flush(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

/// One write primitive, kept as data so a failed write can be replayed on its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreWrite {
    Append {
        keyspace: Keyspace,
        value: String,
    },
    Upsert {
        keyspace: Keyspace,
        field: String,
        value: String,
    },
}

impl StoreWrite {
    pub fn keyspace(&self) -> Keyspace {
        match self {
            StoreWrite::Append { keyspace, .. } | StoreWrite::Upsert { keyspace, .. } => *keyspace,
        }
    }

    pub fn apply(&self, store: &dyn KeyValueStore) -> Result<(), StoreError> {
        match self {
            StoreWrite::Append { keyspace, value } => store.append(*keyspace, value),
            StoreWrite::Upsert {
                keyspace,
                field,
                value,
            } => store.upsert_field(*keyspace, field, value),
        }
    }
}
