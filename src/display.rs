//! Plain console tables for `show` and `run --show-previous`.
//!
//! Renderers take query results (newest first) and print them oldest first so the
//! latest entry ends up just above the prompt.

use std::fmt::Write;

use crate::nodes::NodeIdentity;
use crate::query::QueryService;
use crate::record::{DeviceTelemetry, EnvironmentTelemetry, Message, NetworkTelemetry, NodeInfo};
use crate::storage::StoreError;

/// Row limits per table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplayLimits {
    pub messages: usize,
    pub device_telemetry: usize,
    pub network_telemetry: usize,
    pub environment_telemetry: usize,
}

struct Table {
    title: &'static str,
    empty: &'static str,
    headers: Vec<&'static str>,
    rows: Vec<Vec<String>>,
}

impl Table {
    fn new(title: &'static str, empty: &'static str, headers: &[&'static str]) -> Self {
        Self {
            title,
            empty,
            headers: headers.to_vec(),
            rows: Vec::new(),
        }
    }

    fn row(&mut self, cells: Vec<String>) {
        self.rows.push(cells);
    }

    fn render(&self) -> String {
        let mut out = format!("\n=== {} ===\n", self.title);
        if self.rows.is_empty() {
            let _ = writeln!(out, "[{}]", self.empty);
            return out;
        }
        let widths: Vec<usize> = self
            .headers
            .iter()
            .enumerate()
            .map(|(i, h)| {
                self.rows
                    .iter()
                    .filter_map(|r| r.get(i))
                    .map(|c| c.chars().count())
                    .chain(std::iter::once(h.chars().count()))
                    .max()
                    .unwrap_or(0)
            })
            .collect();
        let header = self.line(&self.headers.iter().map(|h| h.to_string()).collect::<Vec<_>>(), &widths);
        let _ = writeln!(out, "{}", header);
        let _ = writeln!(out, "{}", "-".repeat(header.chars().count()));
        for row in &self.rows {
            let _ = writeln!(out, "{}", self.line(row, &widths));
        }
        out
    }

    // Last column is not padded so long message text does not drag trailing spaces.
    fn line(&self, cells: &[String], widths: &[usize]) -> String {
        let last = cells.len().saturating_sub(1);
        cells
            .iter()
            .zip(widths)
            .enumerate()
            .map(|(i, (c, w))| {
                if i == last {
                    c.clone()
                } else {
                    format!("{:<width$}", c, width = *w)
                }
            })
            .collect::<Vec<_>>()
            .join(" | ")
    }
}

fn opt<T: std::fmt::Display>(v: Option<T>, suffix: &str) -> String {
    v.map(|v| format!("{}{}", v, suffix))
        .unwrap_or_else(|| "-".to_string())
}

fn opt_f(v: Option<f64>, suffix: &str) -> String {
    v.map(|v| format!("{:.2}{}", v, suffix))
        .unwrap_or_else(|| "-".to_string())
}

pub fn render_nodes(nodes: &[NodeIdentity]) -> String {
    let mut t = Table::new(
        "Previously Saved Nodes",
        "No nodes found",
        &["Last Seen", "Node ID", "Name"],
    );
    for n in nodes.iter().rev() {
        t.row(vec![
            n.last_seen.clone().unwrap_or_else(|| "-".to_string()),
            n.station_id.clone(),
            n.name.clone(),
        ]);
    }
    t.render()
}

pub fn render_node_log(entries: &[NodeInfo]) -> String {
    let mut t = Table::new(
        "Node Announcements",
        "No node announcements found",
        &["Seen", "Node ID", "Name"],
    );
    for n in entries.iter().rev() {
        t.row(vec![
            n.last_seen.clone(),
            n.station_id.clone(),
            n.display_name.clone(),
        ]);
    }
    t.render()
}

/// `resolve` maps station ids to display names for the From/To columns.
pub fn render_messages(messages: &[Message], resolve: impl Fn(&str) -> String) -> String {
    let mut t = Table::new(
        "Previously Saved Messages",
        "No messages found",
        &["Timestamp", "From", "To", "Message"],
    );
    for m in messages.iter().rev() {
        t.row(vec![
            m.timestamp.clone(),
            resolve(&m.station_id),
            resolve(&m.to_id),
            crate::logutil::escape_log(&m.text),
        ]);
    }
    t.render()
}

pub fn render_device_telemetry(rows: &[DeviceTelemetry]) -> String {
    let mut t = Table::new(
        "Device Telemetry",
        "No device telemetry found",
        &["Timestamp", "Node ID", "Battery", "Voltage", "Ch Util"],
    );
    for r in rows.iter().rev() {
        t.row(vec![
            r.timestamp.clone(),
            r.station_id.clone(),
            opt(r.battery_percent, "%"),
            opt_f(r.voltage, "V"),
            opt_f(r.channel_utilization, "%"),
        ]);
    }
    t.render()
}

pub fn render_network_telemetry(rows: &[NetworkTelemetry]) -> String {
    let mut t = Table::new(
        "Network Telemetry",
        "No network telemetry found",
        &["Timestamp", "Node ID", "Nodes", "TX", "RX"],
    );
    for r in rows.iter().rev() {
        t.row(vec![
            r.timestamp.clone(),
            r.station_id.clone(),
            format!("{}/{}", r.online_nodes, r.total_nodes),
            r.packets_tx.to_string(),
            r.packets_rx.to_string(),
        ]);
    }
    t.render()
}

pub fn render_environment_telemetry(rows: &[EnvironmentTelemetry]) -> String {
    let mut t = Table::new(
        "Environment Telemetry",
        "No environment telemetry found",
        &["Timestamp", "Node ID", "Temperature", "Humidity", "Pressure"],
    );
    for r in rows.iter().rev() {
        t.row(vec![
            r.timestamp.clone(),
            r.station_id.clone(),
            opt_f(r.temperature, "°C"),
            opt_f(r.humidity, "%"),
            opt_f(r.pressure, " hPa"),
        ]);
    }
    t.render()
}

pub fn nodes(q: &QueryService) -> Result<String, StoreError> {
    Ok(render_nodes(&q.nodes()?))
}

pub fn node_log(q: &QueryService, limit: usize) -> Result<String, StoreError> {
    Ok(render_node_log(&q.node_log(limit)?))
}

pub fn messages(q: &QueryService, limit: usize) -> Result<String, StoreError> {
    let msgs = q.messages(limit)?;
    Ok(render_messages(&msgs, |id| q.resolve_name(id)))
}

pub fn telemetry(q: &QueryService, limits: &DisplayLimits) -> Result<String, StoreError> {
    let mut out = render_device_telemetry(&q.device_telemetry(limits.device_telemetry)?);
    out.push_str(&render_network_telemetry(
        &q.network_telemetry(limits.network_telemetry)?,
    ));
    out.push_str(&render_environment_telemetry(
        &q.environment_telemetry(limits.environment_telemetry)?,
    ));
    Ok(out)
}
