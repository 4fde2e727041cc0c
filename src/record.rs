//! # Canonical Records
//!
//! Normalized shapes for everything the base station persists. A [`Record`] is built
//! once by the normalizer, handed to the store once, and never mutated afterwards.
//!
//! The serialized form of each record is the durable compatibility surface: one compact
//! JSON object per list entry, fields in declaration order, timestamps rendered as
//! `YYYY-MM-DDTHH:MM:SSZ`. Field order here is therefore load-bearing.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Broadcast recipient sentinel used by Meshtastic.
pub const BROADCAST_ID: &str = "^all";

/// Render a timestamp in the persisted ISO-8601 UTC form.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Explicit discriminant for [`Record`]; decided once during normalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    Message,
    NodeInfo,
    DeviceTelemetry,
    NetworkTelemetry,
    EnvironmentTelemetry,
}

impl RecordKind {
    pub const ALL: [RecordKind; 5] = [
        RecordKind::Message,
        RecordKind::NodeInfo,
        RecordKind::DeviceTelemetry,
        RecordKind::NetworkTelemetry,
        RecordKind::EnvironmentTelemetry,
    ];

    pub fn label(self) -> &'static str {
        match self {
            RecordKind::Message => "message",
            RecordKind::NodeInfo => "nodeinfo",
            RecordKind::DeviceTelemetry => "device_telemetry",
            RecordKind::NetworkTelemetry => "network_telemetry",
            RecordKind::EnvironmentTelemetry => "environment_telemetry",
        }
    }
}

impl std::fmt::Display for RecordKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// A text message seen on the mesh.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub timestamp: String,
    pub station_id: String,
    pub to_id: String,
    /// Stored under `message` so existing inspection tooling keeps working.
    #[serde(rename = "message")]
    pub text: String,
}

/// A node announcement (NODEINFO_APP).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub station_id: String,
    pub display_name: String,
    pub last_seen: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceTelemetry {
    pub station_id: String,
    pub timestamp: String,
    pub battery_percent: Option<u8>,
    pub voltage: Option<f64>,
    pub channel_utilization: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkTelemetry {
    pub station_id: String,
    pub timestamp: String,
    pub online_nodes: u32,
    pub total_nodes: u32,
    pub packets_tx: u64,
    pub packets_rx: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentTelemetry {
    pub station_id: String,
    pub timestamp: String,
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub pressure: Option<f64>,
}

/// One normalized packet, tagged by kind.
#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    Message(Message),
    NodeInfo(NodeInfo),
    DeviceTelemetry(DeviceTelemetry),
    NetworkTelemetry(NetworkTelemetry),
    EnvironmentTelemetry(EnvironmentTelemetry),
}

impl Record {
    pub fn kind(&self) -> RecordKind {
        match self {
            Record::Message(_) => RecordKind::Message,
            Record::NodeInfo(_) => RecordKind::NodeInfo,
            Record::DeviceTelemetry(_) => RecordKind::DeviceTelemetry,
            Record::NetworkTelemetry(_) => RecordKind::NetworkTelemetry,
            Record::EnvironmentTelemetry(_) => RecordKind::EnvironmentTelemetry,
        }
    }

    pub fn station_id(&self) -> &str {
        match self {
            Record::Message(m) => &m.station_id,
            Record::NodeInfo(n) => &n.station_id,
            Record::DeviceTelemetry(t) => &t.station_id,
            Record::NetworkTelemetry(t) => &t.station_id,
            Record::EnvironmentTelemetry(t) => &t.station_id,
        }
    }

    /// Event time of the record (`last_seen` for node announcements).
    pub fn timestamp(&self) -> &str {
        match self {
            Record::Message(m) => &m.timestamp,
            Record::NodeInfo(n) => &n.last_seen,
            Record::DeviceTelemetry(t) => &t.timestamp,
            Record::NetworkTelemetry(t) => &t.timestamp,
            Record::EnvironmentTelemetry(t) => &t.timestamp,
        }
    }

    /// Compact JSON used as the stored list entry.
    pub fn to_json(&self) -> serde_json::Result<String> {
        match self {
            Record::Message(m) => serde_json::to_string(m),
            Record::NodeInfo(n) => serde_json::to_string(n),
            Record::DeviceTelemetry(t) => serde_json::to_string(t),
            Record::NetworkTelemetry(t) => serde_json::to_string(t),
            Record::EnvironmentTelemetry(t) => serde_json::to_string(t),
        }
    }
}
