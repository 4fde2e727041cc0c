//! Packet normalization.
//!
//! [`normalize`] turns one [`Envelope`] into exactly one of: a canonical [`Record`]
//! (with any range corrections applied on the way), a skip, or a validation failure.
//! It performs no I/O and never reads the clock; the producer-side `received_at` stamp
//! stands in for "now" when a packet carries no time of its own.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use std::fmt;
use thiserror::Error;

use crate::meshtastic::{
    node_id_hex, DeviceMetrics, Envelope, EnvironmentMetrics, LocalStats, PortNum, RawPacket,
};
use crate::record::{
    format_timestamp, DeviceTelemetry, EnvironmentTelemetry, Message, NetworkTelemetry, NodeInfo,
    Record, BROADCAST_ID,
};

/// Node number Meshtastic uses for broadcast destinations.
const BROADCAST_NUM: u32 = 0xFFFF_FFFF;

/// Outcome of normalizing one envelope.
#[derive(Debug, Clone, PartialEq)]
pub enum Normalized {
    Record {
        record: Record,
        corrections: Vec<RangeCorrection>,
    },
    Skip(SkipReason),
    Fail(NormalizeError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// Port we do not persist (position, routing, admin, ...).
    UnsupportedPort(String),
    /// Telemetry envelope without any metric we recognize.
    EmptyTelemetry,
    /// Nothing decoded: encrypted for someone else, or a bare ack.
    NoPayload,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::UnsupportedPort(p) => write!(f, "unsupported port {}", p),
            SkipReason::EmptyTelemetry => f.write_str("telemetry without recognized metrics"),
            SkipReason::NoPayload => f.write_str("no decoded payload"),
        }
    }
}

/// Packets that cannot become a record at all.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NormalizeError {
    #[error("packet has no station id")]
    MissingStationId,
    #[error("text message from {station_id} has no text")]
    MissingText { station_id: String },
    #[error("unparseable timestamp {value:?}")]
    InvalidTimestamp { value: String },
}

/// One out-of-range value that was coerced instead of rejected.
#[derive(Debug, Clone, PartialEq)]
pub struct RangeCorrection {
    pub field: &'static str,
    pub original: String,
    /// `None` when the value was dropped (non-finite input).
    pub stored: Option<String>,
}

impl fmt::Display for RangeCorrection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.stored {
            Some(v) => write!(f, "{} {} clamped to {}", self.field, self.original, v),
            None => write!(f, "{} {} dropped", self.field, self.original),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PayloadKind {
    Text,
    NodeInfo,
    Telemetry,
}

pub fn normalize(envelope: &Envelope) -> Normalized {
    let packet = &envelope.packet;
    let Some(station_id) = packet.station_id() else {
        return Normalized::Fail(NormalizeError::MissingStationId);
    };
    let kind = match payload_kind(packet) {
        Ok(kind) => kind,
        Err(reason) => return Normalized::Skip(reason),
    };
    let timestamp = match resolve_timestamp(packet, envelope.received_at) {
        Ok(ts) => format_timestamp(ts),
        Err(e) => return Normalized::Fail(e),
    };
    let mut corrections = Vec::new();
    let decoded = packet.decoded.clone().unwrap_or_default();

    let record = match kind {
        PayloadKind::Text => {
            let Some(text) = decoded.text else {
                return Normalized::Fail(NormalizeError::MissingText { station_id });
            };
            Record::Message(Message {
                timestamp,
                station_id,
                to_id: recipient(packet),
                text,
            })
        }
        PayloadKind::NodeInfo => {
            let user = decoded.user.unwrap_or_default();
            let display_name = [user.long_name, user.short_name]
                .into_iter()
                .flatten()
                .map(|n| n.trim().to_string())
                .find(|n| !n.is_empty())
                .unwrap_or_else(|| station_id.clone());
            Record::NodeInfo(NodeInfo {
                station_id,
                display_name,
                last_seen: timestamp,
            })
        }
        PayloadKind::Telemetry => {
            let telemetry = decoded.telemetry.unwrap_or_default();
            if let Some(m) = telemetry.device_metrics.filter(DeviceMetrics::has_recognized_fields) {
                Record::DeviceTelemetry(device(station_id, timestamp, &m, &mut corrections))
            } else if let Some(s) = telemetry.local_stats.filter(LocalStats::has_recognized_fields) {
                Record::NetworkTelemetry(network(station_id, timestamp, &s, &mut corrections))
            } else if let Some(e) = telemetry
                .environment_metrics
                .filter(EnvironmentMetrics::has_recognized_fields)
            {
                Record::EnvironmentTelemetry(environment(station_id, timestamp, &e, &mut corrections))
            } else {
                return Normalized::Skip(SkipReason::EmptyTelemetry);
            }
        }
    };
    Normalized::Record {
        record,
        corrections,
    }
}

fn payload_kind(packet: &RawPacket) -> Result<PayloadKind, SkipReason> {
    let Some(decoded) = packet.decoded.as_ref() else {
        return Err(SkipReason::NoPayload);
    };
    match &decoded.portnum {
        Some(PortNum::TextMessageApp) => Ok(PayloadKind::Text),
        Some(PortNum::NodeinfoApp) => Ok(PayloadKind::NodeInfo),
        Some(PortNum::TelemetryApp) => Ok(PayloadKind::Telemetry),
        Some(other) => Err(SkipReason::UnsupportedPort(String::from(other.clone()))),
        None if decoded.text.is_some() => Ok(PayloadKind::Text),
        None if decoded.user.is_some() => Ok(PayloadKind::NodeInfo),
        None if decoded.telemetry.is_some() => Ok(PayloadKind::Telemetry),
        None => Err(SkipReason::NoPayload),
    }
}

fn recipient(packet: &RawPacket) -> String {
    match packet.to_id.as_deref().map(str::trim) {
        Some(id) if !id.is_empty() => id.to_string(),
        _ => match packet.to {
            Some(num) if num != BROADCAST_NUM => node_id_hex(num),
            _ => BROADCAST_ID.to_string(),
        },
    }
}

fn resolve_timestamp(
    packet: &RawPacket,
    received_at: DateTime<Utc>,
) -> Result<DateTime<Utc>, NormalizeError> {
    if let Some(raw) = packet.ts.as_deref() {
        return parse_timestamp(raw).ok_or_else(|| NormalizeError::InvalidTimestamp {
            value: raw.to_string(),
        });
    }
    if let Some(secs) = packet.rx_time.filter(|s| *s > 0) {
        if let Some(ts) = Utc.timestamp_opt(secs, 0).single() {
            return Ok(ts);
        }
    }
    Ok(received_at)
}

/// RFC 3339, or a zone-less ISO-8601 string taken as UTC.
pub(crate) fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| Utc.from_utc_datetime(&naive))
}

fn device(
    station_id: String,
    timestamp: String,
    m: &DeviceMetrics,
    corrections: &mut Vec<RangeCorrection>,
) -> DeviceTelemetry {
    let battery_percent = m.battery_level.map(|raw| {
        let clamped = raw.clamp(0, 100);
        if clamped != raw {
            corrections.push(RangeCorrection {
                field: "battery_percent",
                original: raw.to_string(),
                stored: Some(clamped.to_string()),
            });
        }
        clamped as u8
    });
    DeviceTelemetry {
        station_id,
        timestamp,
        battery_percent,
        voltage: clamp_f64("voltage", m.voltage, 0.0, f64::INFINITY, corrections),
        channel_utilization: clamp_f64(
            "channel_utilization",
            m.channel_utilization,
            0.0,
            100.0,
            corrections,
        ),
    }
}

fn network(
    station_id: String,
    timestamp: String,
    s: &LocalStats,
    corrections: &mut Vec<RangeCorrection>,
) -> NetworkTelemetry {
    let total_nodes = clamp_count("total_nodes", s.num_total_nodes, u32::MAX as i64, corrections) as u32;
    let mut online_nodes =
        clamp_count("online_nodes", s.num_online_nodes, u32::MAX as i64, corrections) as u32;
    if online_nodes > total_nodes {
        corrections.push(RangeCorrection {
            field: "online_nodes",
            original: online_nodes.to_string(),
            stored: Some(total_nodes.to_string()),
        });
        online_nodes = total_nodes;
    }
    NetworkTelemetry {
        station_id,
        timestamp,
        online_nodes,
        total_nodes,
        packets_tx: clamp_count("packets_tx", s.num_packets_tx, i64::MAX, corrections) as u64,
        packets_rx: clamp_count("packets_rx", s.num_packets_rx, i64::MAX, corrections) as u64,
    }
}

fn environment(
    station_id: String,
    timestamp: String,
    e: &EnvironmentMetrics,
    corrections: &mut Vec<RangeCorrection>,
) -> EnvironmentTelemetry {
    EnvironmentTelemetry {
        station_id,
        timestamp,
        temperature: clamp_f64(
            "temperature",
            e.temperature,
            f64::NEG_INFINITY,
            f64::INFINITY,
            corrections,
        ),
        humidity: clamp_f64("humidity", e.relative_humidity, 0.0, 100.0, corrections),
        pressure: clamp_f64(
            "pressure",
            e.barometric_pressure,
            f64::NEG_INFINITY,
            f64::INFINITY,
            corrections,
        ),
    }
}

fn clamp_f64(
    field: &'static str,
    value: Option<f64>,
    min: f64,
    max: f64,
    corrections: &mut Vec<RangeCorrection>,
) -> Option<f64> {
    let raw = value?;
    if !raw.is_finite() {
        corrections.push(RangeCorrection {
            field,
            original: raw.to_string(),
            stored: None,
        });
        return None;
    }
    let clamped = raw.clamp(min, max);
    if clamped != raw {
        corrections.push(RangeCorrection {
            field,
            original: raw.to_string(),
            stored: Some(clamped.to_string()),
        });
    }
    Some(clamped)
}

// Absent counters are stored as zero; they are mandatory in the network record.
fn clamp_count(
    field: &'static str,
    value: Option<i64>,
    max: i64,
    corrections: &mut Vec<RangeCorrection>,
) -> i64 {
    let raw = value.unwrap_or(0);
    let clamped = raw.clamp(0, max);
    if clamped != raw {
        corrections.push(RangeCorrection {
            field,
            original: raw.to_string(),
            stored: Some(clamped.to_string()),
        });
    }
    clamped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meshtastic::{Decoded, Telemetry, User};

    fn at(packet: RawPacket) -> Envelope {
        Envelope::received_at(packet, Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap())
    }

    fn record_of(n: Normalized) -> (Record, Vec<RangeCorrection>) {
        match n {
            Normalized::Record {
                record,
                corrections,
            } => (record, corrections),
            other => panic!("expected record, got {:?}", other),
        }
    }

    #[test]
    fn text_message_becomes_message_record() {
        let env = at(RawPacket::text_message("!ab12cd34", BROADCAST_ID, "hello")
            .with_timestamp("2024-01-01T00:00:00Z"));
        let (record, corrections) = record_of(normalize(&env));
        assert!(corrections.is_empty());
        assert_eq!(
            record.to_json().unwrap(),
            r#"{"timestamp":"2024-01-01T00:00:00Z","station_id":"!ab12cd34","to_id":"^all","message":"hello"}"#
        );
    }

    #[test]
    fn normalization_is_repeatable() {
        let env = Envelope::new(RawPacket::telemetry(
            "!00000001",
            Telemetry {
                device_metrics: Some(DeviceMetrics {
                    battery_level: Some(150),
                    ..Default::default()
                }),
                ..Default::default()
            },
        ));
        assert_eq!(normalize(&env), normalize(&env));
    }

    #[test]
    fn missing_station_id_fails() {
        let mut pkt = RawPacket::text_message("", BROADCAST_ID, "hi");
        pkt.from_id = None;
        assert_eq!(
            normalize(&at(pkt)),
            Normalized::Fail(NormalizeError::MissingStationId)
        );
    }

    #[test]
    fn battery_over_100_is_clamped() {
        let env = at(RawPacket::telemetry(
            "!00000001",
            Telemetry {
                device_metrics: Some(DeviceMetrics {
                    battery_level: Some(150),
                    voltage: Some(4.1),
                    ..Default::default()
                }),
                ..Default::default()
            },
        ));
        let (record, corrections) = record_of(normalize(&env));
        let Record::DeviceTelemetry(t) = record else {
            panic!("expected device telemetry");
        };
        assert_eq!(t.battery_percent, Some(100));
        assert_eq!(t.voltage, Some(4.1));
        assert_eq!(t.channel_utilization, None);
        assert_eq!(corrections.len(), 1);
        assert_eq!(corrections[0].to_string(), "battery_percent 150 clamped to 100");
    }

    #[test]
    fn online_nodes_never_exceed_total() {
        let env = at(RawPacket::telemetry(
            "!00000001",
            Telemetry {
                local_stats: Some(LocalStats {
                    num_online_nodes: Some(9),
                    num_total_nodes: Some(4),
                    num_packets_tx: Some(-3),
                    num_packets_rx: Some(12),
                    ..Default::default()
                }),
                ..Default::default()
            },
        ));
        let (record, corrections) = record_of(normalize(&env));
        let Record::NetworkTelemetry(t) = record else {
            panic!("expected network telemetry");
        };
        assert_eq!((t.online_nodes, t.total_nodes), (4, 4));
        assert_eq!((t.packets_tx, t.packets_rx), (0, 12));
        assert_eq!(corrections.len(), 2);
    }

    #[test]
    fn non_finite_environment_values_become_absent() {
        let env = at(RawPacket::telemetry(
            "!00000001",
            Telemetry {
                environment_metrics: Some(EnvironmentMetrics {
                    temperature: Some(f64::NAN),
                    relative_humidity: Some(104.0),
                    barometric_pressure: Some(1013.2),
                    ..Default::default()
                }),
                ..Default::default()
            },
        ));
        let (record, _) = record_of(normalize(&env));
        let Record::EnvironmentTelemetry(t) = record else {
            panic!("expected environment telemetry");
        };
        assert_eq!(t.temperature, None);
        assert_eq!(t.humidity, Some(100.0));
        assert_eq!(t.pressure, Some(1013.2));
    }

    #[test]
    fn device_metrics_win_over_local_stats() {
        let env = at(RawPacket::telemetry(
            "!00000001",
            Telemetry {
                device_metrics: Some(DeviceMetrics {
                    voltage: Some(3.9),
                    ..Default::default()
                }),
                local_stats: Some(LocalStats {
                    num_online_nodes: Some(1),
                    ..Default::default()
                }),
                ..Default::default()
            },
        ));
        let (record, _) = record_of(normalize(&env));
        assert!(matches!(record, Record::DeviceTelemetry(_)));
    }

    #[test]
    fn heartbeat_telemetry_is_skipped() {
        let env = at(RawPacket::telemetry(
            "!00000001",
            Telemetry {
                device_metrics: Some(DeviceMetrics {
                    uptime_seconds: Some(10),
                    ..Default::default()
                }),
                ..Default::default()
            },
        ));
        assert_eq!(normalize(&env), Normalized::Skip(SkipReason::EmptyTelemetry));
    }

    #[test]
    fn other_ports_are_skipped() {
        let pkt = RawPacket {
            from_id: Some("!00000001".into()),
            decoded: Some(Decoded {
                portnum: Some(PortNum::PositionApp),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert_eq!(
            normalize(&at(pkt)),
            Normalized::Skip(SkipReason::UnsupportedPort("POSITION_APP".into()))
        );
    }

    #[test]
    fn port_is_inferred_from_payload() {
        let pkt = RawPacket {
            from: Some(1),
            decoded: Some(Decoded {
                user: Some(User {
                    short_name: Some("AB".into()),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        };
        let (record, _) = record_of(normalize(&at(pkt)));
        assert_eq!(
            record,
            Record::NodeInfo(NodeInfo {
                station_id: "!00000001".into(),
                display_name: "AB".into(),
                last_seen: "2024-01-01T12:00:00Z".into(),
            })
        );
    }

    #[test]
    fn nameless_node_falls_back_to_station_id() {
        let mut pkt = RawPacket::node_announcement("!0000beef", "", "  ");
        pkt.rx_time = Some(1_704_067_200);
        let (record, _) = record_of(normalize(&at(pkt)));
        let Record::NodeInfo(info) = record else {
            panic!("expected node info");
        };
        assert_eq!(info.display_name, "!0000beef");
        assert_eq!(info.last_seen, "2024-01-01T00:00:00Z");
    }

    #[test]
    fn bad_timestamp_fails_and_numeric_recipient_is_rendered() {
        let bad = RawPacket::text_message("!1", BROADCAST_ID, "x").with_timestamp("yesterday");
        assert!(matches!(
            normalize(&at(bad)),
            Normalized::Fail(NormalizeError::InvalidTimestamp { .. })
        ));

        let mut direct = RawPacket::text_message("!1", "", "x");
        direct.to_id = None;
        direct.to = Some(0x0a0b0c0d);
        let (record, _) = record_of(normalize(&at(direct)));
        let Record::Message(m) = record else {
            panic!("expected message");
        };
        assert_eq!(m.to_id, "!0a0b0c0d");
    }

    #[test]
    fn text_port_without_text_fails() {
        let pkt = RawPacket {
            from_id: Some("!00000001".into()),
            decoded: Some(Decoded {
                portnum: Some(PortNum::TextMessageApp),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(matches!(
            normalize(&at(pkt)),
            Normalized::Fail(NormalizeError::MissingText { .. })
        ));
    }
}
