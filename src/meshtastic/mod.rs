//! # Meshtastic Packet Model
//!
//! Serde model of the decoded packets a Meshtastic device driver hands to its callbacks.
//! The radio wire protocol itself is out of scope: by the time a packet reaches this
//! crate it has already been parsed into the familiar dictionary shape
//! (`fromId`, `toId`, `decoded.portnum`, `decoded.telemetry.deviceMetrics`, ...).
//!
//! ```json
//! {"fromId":"!ab12cd34","toId":"^all","id":1234,"rxTime":1704067200,
//!  "decoded":{"portnum":"TEXT_MESSAGE_APP","text":"hello"}}
//! ```
//!
//! Only the fields the normalizer consumes are modeled; everything else is ignored on
//! deserialization. Short aliases (`station_id`, `to_id`, `timestamp`) are accepted so
//! hand-written fixtures and replays stay readable.

pub mod source;

use crate::logutil::escape_log;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Application port carried in `decoded.portnum`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum PortNum {
    TextMessageApp,
    NodeinfoApp,
    TelemetryApp,
    PositionApp,
    RoutingApp,
    Other(String),
}

impl From<String> for PortNum {
    fn from(s: String) -> Self {
        match s.as_str() {
            "TEXT_MESSAGE_APP" => PortNum::TextMessageApp,
            "NODEINFO_APP" => PortNum::NodeinfoApp,
            "TELEMETRY_APP" => PortNum::TelemetryApp,
            "POSITION_APP" => PortNum::PositionApp,
            "ROUTING_APP" => PortNum::RoutingApp,
            _ => PortNum::Other(s),
        }
    }
}

impl From<PortNum> for String {
    fn from(p: PortNum) -> Self {
        match p {
            PortNum::TextMessageApp => "TEXT_MESSAGE_APP".to_string(),
            PortNum::NodeinfoApp => "NODEINFO_APP".to_string(),
            PortNum::TelemetryApp => "TELEMETRY_APP".to_string(),
            PortNum::PositionApp => "POSITION_APP".to_string(),
            PortNum::RoutingApp => "ROUTING_APP".to_string(),
            PortNum::Other(s) => s,
        }
    }
}

/// `decoded.user` of a NODEINFO_APP packet.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub long_name: Option<String>,
    #[serde(default)]
    pub short_name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceMetrics {
    #[serde(default)]
    pub battery_level: Option<i64>,
    #[serde(default)]
    pub voltage: Option<f64>,
    #[serde(default)]
    pub channel_utilization: Option<f64>,
    #[serde(default)]
    pub air_util_tx: Option<f64>,
    #[serde(default)]
    pub uptime_seconds: Option<i64>,
}

impl DeviceMetrics {
    pub fn has_recognized_fields(&self) -> bool {
        self.battery_level.is_some() || self.voltage.is_some() || self.channel_utilization.is_some()
    }
}

/// `decoded.telemetry.localStats`: the node's view of the mesh.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalStats {
    #[serde(default)]
    pub num_online_nodes: Option<i64>,
    #[serde(default)]
    pub num_total_nodes: Option<i64>,
    #[serde(default)]
    pub num_packets_tx: Option<i64>,
    #[serde(default)]
    pub num_packets_rx: Option<i64>,
    #[serde(default)]
    pub num_packets_rx_bad: Option<i64>,
    #[serde(default)]
    pub uptime_seconds: Option<i64>,
}

impl LocalStats {
    pub fn has_recognized_fields(&self) -> bool {
        self.num_online_nodes.is_some()
            || self.num_total_nodes.is_some()
            || self.num_packets_tx.is_some()
            || self.num_packets_rx.is_some()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentMetrics {
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub relative_humidity: Option<f64>,
    #[serde(default)]
    pub barometric_pressure: Option<f64>,
    #[serde(default)]
    pub gas_resistance: Option<f64>,
    #[serde(default)]
    pub iaq: Option<i64>,
}

impl EnvironmentMetrics {
    pub fn has_recognized_fields(&self) -> bool {
        self.temperature.is_some()
            || self.relative_humidity.is_some()
            || self.barometric_pressure.is_some()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Telemetry {
    #[serde(default)]
    pub time: Option<i64>,
    #[serde(default)]
    pub device_metrics: Option<DeviceMetrics>,
    #[serde(default)]
    pub local_stats: Option<LocalStats>,
    #[serde(default)]
    pub environment_metrics: Option<EnvironmentMetrics>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Decoded {
    #[serde(default)]
    pub portnum: Option<PortNum>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub user: Option<User>,
    #[serde(default)]
    pub telemetry: Option<Telemetry>,
}

/// A decoded packet as delivered by the device driver.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawPacket {
    #[serde(default, rename = "fromId", alias = "station_id")]
    pub from_id: Option<String>,
    #[serde(default)]
    pub from: Option<u32>,
    #[serde(default, rename = "toId", alias = "to_id")]
    pub to_id: Option<String>,
    #[serde(default)]
    pub to: Option<u32>,
    /// Packet id assigned by the sender; zero or absent when unknown.
    #[serde(default)]
    pub id: Option<u32>,
    #[serde(default, alias = "timestamp")]
    pub ts: Option<String>,
    #[serde(default, rename = "rxTime")]
    pub rx_time: Option<i64>,
    #[serde(default)]
    pub decoded: Option<Decoded>,
}

impl RawPacket {
    pub fn text_message(from_id: &str, to_id: &str, text: &str) -> Self {
        RawPacket {
            from_id: Some(from_id.to_string()),
            to_id: Some(to_id.to_string()),
            decoded: Some(Decoded {
                portnum: Some(PortNum::TextMessageApp),
                text: Some(text.to_string()),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    pub fn node_announcement(from_id: &str, long_name: &str, short_name: &str) -> Self {
        RawPacket {
            from_id: Some(from_id.to_string()),
            decoded: Some(Decoded {
                portnum: Some(PortNum::NodeinfoApp),
                user: Some(User {
                    id: Some(from_id.to_string()),
                    long_name: Some(long_name.to_string()),
                    short_name: Some(short_name.to_string()),
                }),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    pub fn telemetry(from_id: &str, telemetry: Telemetry) -> Self {
        RawPacket {
            from_id: Some(from_id.to_string()),
            decoded: Some(Decoded {
                portnum: Some(PortNum::TelemetryApp),
                telemetry: Some(telemetry),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    pub fn with_timestamp(mut self, ts: &str) -> Self {
        self.ts = Some(ts.to_string());
        self
    }

    pub fn with_id(mut self, id: u32) -> Self {
        self.id = Some(id);
        self
    }

    /// Sender id: `fromId` when present, otherwise the numeric `from` in `!xxxxxxxx` form.
    pub fn station_id(&self) -> Option<String> {
        match self.from_id.as_deref().map(str::trim) {
            Some(id) if !id.is_empty() => Some(id.to_string()),
            _ => self.from.map(node_id_hex),
        }
    }

    pub fn portnum(&self) -> Option<&PortNum> {
        self.decoded.as_ref().and_then(|d| d.portnum.as_ref())
    }

    /// Short single-line description for `packet` target logging.
    pub fn summary(&self) -> String {
        let from = self.station_id().unwrap_or_else(|| "?".to_string());
        let port = self
            .portnum()
            .map(|p| String::from(p.clone()))
            .unwrap_or_else(|| "UNKNOWN".to_string());
        let mut out = format!("from={} port={}", from, port);
        if let Some(text) = self.decoded.as_ref().and_then(|d| d.text.as_deref()) {
            out.push_str(&format!(" text=\"{}\"", truncate_for_log(text, 80)));
        }
        out
    }
}

/// Render a numeric node number as a Meshtastic node id (`!` + 8 hex digits).
pub fn node_id_hex(num: u32) -> String {
    format!("!{:08x}", num)
}

/// A raw packet plus the instant the producer callback received it.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub packet: RawPacket,
    pub received_at: DateTime<Utc>,
}

impl Envelope {
    pub fn new(packet: RawPacket) -> Self {
        Self::received_at(packet, Utc::now())
    }

    pub fn received_at(packet: RawPacket, received_at: DateTime<Utc>) -> Self {
        Self {
            packet,
            received_at,
        }
    }
}

// UTF-8 safe truncation for log display. Ensures we do not slice inside a multi-byte char.
pub(crate) fn truncate_for_log(input: &str, max_bytes: usize) -> String {
    if input.len() <= max_bytes {
        return escape_log(input);
    }
    let cut_target = max_bytes.saturating_sub(3);
    let mut cut = cut_target;
    while cut > 0 && !input.is_char_boundary(cut) {
        cut -= 1;
    }
    let mut out = escape_log(&input[..cut]);
    out.push_str("...");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_meshtastic_text_packet() {
        let json = r#"{"from":2870136116,"fromId":"!ab12cd34","to":4294967295,"toId":"^all",
            "id":99,"rxTime":1704067200,"rxSnr":6.5,
            "decoded":{"portnum":"TEXT_MESSAGE_APP","payload":"aGVsbG8=","text":"hello"}}"#;
        let pkt: RawPacket = serde_json::from_str(json).unwrap();
        assert_eq!(pkt.station_id().as_deref(), Some("!ab12cd34"));
        assert_eq!(pkt.portnum(), Some(&PortNum::TextMessageApp));
        assert_eq!(pkt.id, Some(99));
        assert_eq!(pkt.rx_time, Some(1_704_067_200));
    }

    #[test]
    fn accepts_short_aliases() {
        let json = r#"{"station_id":"!ab12cd34","to_id":"^all","timestamp":"2024-01-01T00:00:00Z",
            "decoded":{"text":"hi"}}"#;
        let pkt: RawPacket = serde_json::from_str(json).unwrap();
        assert_eq!(pkt.from_id.as_deref(), Some("!ab12cd34"));
        assert_eq!(pkt.to_id.as_deref(), Some("^all"));
        assert_eq!(pkt.ts.as_deref(), Some("2024-01-01T00:00:00Z"));
    }

    #[test]
    fn unknown_portnum_is_preserved() {
        let json = r#"{"fromId":"!00000001","decoded":{"portnum":"RANGE_TEST_APP"}}"#;
        let pkt: RawPacket = serde_json::from_str(json).unwrap();
        assert_eq!(pkt.portnum(), Some(&PortNum::Other("RANGE_TEST_APP".into())));
    }

    #[test]
    fn station_id_falls_back_to_node_number() {
        let pkt = RawPacket {
            from: Some(0xab12cd34),
            ..Default::default()
        };
        assert_eq!(pkt.station_id().as_deref(), Some("!ab12cd34"));
        let blank = RawPacket {
            from_id: Some("  ".into()),
            ..Default::default()
        };
        assert_eq!(blank.station_id(), None);
    }

    #[test]
    fn truncate_does_not_split_multibyte_chars() {
        let s = "12345\u{2014}7890";
        assert_eq!(truncate_for_log(s, 10), "12345...");
        assert_eq!(truncate_for_log("hello", 10), "hello");
    }
}
