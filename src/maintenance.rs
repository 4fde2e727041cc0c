//! Out-of-band housekeeping: data retention and corrupted-entry cleanup.
//!
//! These are the only callers of the store's administrative operations. They are run
//! from the `cleanup` subcommand, never from the ingestion pipeline.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::de::DeserializeOwned;

use crate::ingest::normalize::parse_timestamp;
use crate::record::{
    DeviceTelemetry, EnvironmentTelemetry, Message, NetworkTelemetry, NodeInfo, BROADCAST_ID,
};
use crate::storage::{KeyValueStore, Keyspace, Shape, StoreError};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CleanupReport {
    pub removed: BTreeMap<Keyspace, usize>,
}

impl CleanupReport {
    pub fn total(&self) -> usize {
        self.removed.values().sum()
    }

    fn add(&mut self, keyspace: Keyspace, n: usize) {
        if n > 0 {
            *self.removed.entry(keyspace).or_default() += n;
        }
    }
}

/// Remove list entries and node identities last seen more than `days` before `now`.
/// Entries without a readable timestamp are left for [`cleanup_corrupted`].
pub fn cleanup_older_than(
    store: &dyn KeyValueStore,
    days: u32,
    now: DateTime<Utc>,
) -> Result<CleanupReport, StoreError> {
    let Some(cutoff) = Duration::try_days(i64::from(days)).and_then(|d| now.checked_sub_signed(d))
    else {
        log::info!("retention of {} days reaches past the earliest representable time; nothing to remove", days);
        return Ok(CleanupReport::default());
    };
    let mut report = CleanupReport::default();
    for ks in Keyspace::ALL.into_iter().filter(|k| k.shape() == Shape::List) {
        let removed = store.retain(ks, &mut |entry| match entry_time(entry) {
            Some(ts) => ts >= cutoff,
            None => true,
        })?;
        report.add(ks, removed);
    }

    for (station_id, seen) in store.read_hash(Keyspace::NodeTimestamps)? {
        if station_id == BROADCAST_ID {
            continue;
        }
        if parse_timestamp(&seen).is_some_and(|ts| ts < cutoff) {
            if store.remove_field(Keyspace::Nodes, &station_id)? {
                report.add(Keyspace::Nodes, 1);
            }
            if store.remove_field(Keyspace::NodeTimestamps, &station_id)? {
                report.add(Keyspace::NodeTimestamps, 1);
            }
        }
    }
    log::info!(
        "retention cleanup ({} days) removed {} entries",
        days,
        report.total()
    );
    Ok(report)
}

/// Remove entries that no longer decode as their record type, and node timestamps
/// that are not timestamps.
pub fn cleanup_corrupted(store: &dyn KeyValueStore) -> Result<CleanupReport, StoreError> {
    let mut report = CleanupReport::default();
    report.add(Keyspace::Messages, purge_undecodable::<Message>(store, Keyspace::Messages)?);
    report.add(Keyspace::NodeLog, purge_undecodable::<NodeInfo>(store, Keyspace::NodeLog)?);
    report.add(
        Keyspace::DeviceTelemetry,
        purge_undecodable::<DeviceTelemetry>(store, Keyspace::DeviceTelemetry)?,
    );
    report.add(
        Keyspace::NetworkTelemetry,
        purge_undecodable::<NetworkTelemetry>(store, Keyspace::NetworkTelemetry)?,
    );
    report.add(
        Keyspace::EnvironmentTelemetry,
        purge_undecodable::<EnvironmentTelemetry>(store, Keyspace::EnvironmentTelemetry)?,
    );

    for (station_id, seen) in store.read_hash(Keyspace::NodeTimestamps)? {
        if parse_timestamp(&seen).is_none() && store.remove_field(Keyspace::NodeTimestamps, &station_id)? {
            log::warn!("removed unreadable last-seen {:?} for {}", seen, station_id);
            report.add(Keyspace::NodeTimestamps, 1);
        }
    }
    for (station_id, name) in store.read_hash(Keyspace::Nodes)? {
        if name.trim().is_empty() && store.remove_field(Keyspace::Nodes, &station_id)? {
            report.add(Keyspace::Nodes, 1);
        }
    }
    log::info!("corrupted-entry cleanup removed {} entries", report.total());
    Ok(report)
}

fn purge_undecodable<T: DeserializeOwned>(
    store: &dyn KeyValueStore,
    keyspace: Keyspace,
) -> Result<usize, StoreError> {
    store.retain(keyspace, &mut |entry| {
        serde_json::from_str::<T>(entry).is_ok() && entry_time(entry).is_some()
    })
}

fn entry_time(entry: &str) -> Option<DateTime<Utc>> {
    let value: serde_json::Value = serde_json::from_str(entry).ok()?;
    value
        .get("timestamp")
        .or_else(|| value.get("last_seen"))
        .and_then(|v| v.as_str())
        .and_then(parse_timestamp)
}
