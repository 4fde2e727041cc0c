//! Logging utilities.
//!
//! * [`escape_log`] keeps multi-line packet text on a single log line.
//! * [`LogSelection`] decides which records reach the output. Besides the usual levels
//!   it knows three categories, each emitted at `debug` under its own log target:
//!   `packet` (raw packets at the producer), `data` (normalized records and clamps)
//!   and `store` (store operations).

use log::{Level, LevelFilter, Record};
use std::str::FromStr;

/// Log target for raw packets as they arrive from the device driver.
pub const TARGET_PACKET: &str = "packet";
/// Log target for normalized records and range corrections.
pub const TARGET_DATA: &str = "data";
/// Log target for store adapter operations.
pub const TARGET_STORE: &str = "store";

/// Escape a string for single-line logging:
/// - `\n` => `\\n`
/// - `\r` => `\\r`
/// - `\t` => `\\t`
/// - backslash => `\\\\`
///   Truncates very long strings (over `max_preview`) with an ellipsis to cap log noise.
pub fn escape_log(s: &str) -> String {
    const MAX_PREVIEW: usize = 300;
    let mut out = String::with_capacity(s.len().min(MAX_PREVIEW) + 8);
    for (count, ch) in s.chars().enumerate() {
        if count >= MAX_PREVIEW {
            out.push('…');
            break;
        }
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => {
                use std::fmt::Write;
                let _ = write!(&mut out, "\\x{:02X}", c as u32);
            }
            c => out.push(c),
        }
    }
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    Packet,
    Data,
    Store,
}

impl Category {
    pub fn target(self) -> &'static str {
        match self {
            Category::Packet => TARGET_PACKET,
            Category::Data => TARGET_DATA,
            Category::Store => TARGET_STORE,
        }
    }

    fn from_target(target: &str) -> Option<Self> {
        match target {
            TARGET_PACKET => Some(Category::Packet),
            TARGET_DATA => Some(Category::Data),
            TARGET_STORE => Some(Category::Store),
            _ => None,
        }
    }
}

/// Which log records to emit, parsed from a comma list such as `info,packet`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSelection {
    levels: Vec<Level>,
    categories: Vec<Category>,
    threshold: bool,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("invalid log level or category: {0}")]
pub struct InvalidLogSpec(pub String);

impl LogSelection {
    pub fn parse(spec: &str, threshold: bool) -> Result<Self, InvalidLogSpec> {
        let mut levels = Vec::new();
        let mut categories = Vec::new();
        for raw in spec.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            match raw.to_ascii_lowercase().as_str() {
                "packet" => categories.push(Category::Packet),
                "data" => categories.push(Category::Data),
                "store" | "redis" => categories.push(Category::Store),
                "critical" => levels.push(Level::Error),
                "warning" => levels.push(Level::Warn),
                other => {
                    let level =
                        Level::from_str(other).map_err(|_| InvalidLogSpec(raw.to_string()))?;
                    levels.push(level);
                }
            }
        }
        if levels.is_empty() && categories.is_empty() {
            levels.push(Level::Info);
        }
        Ok(Self {
            levels,
            categories,
            threshold,
        })
    }

    /// Raise verbosity as `-v`/`-vv` do: switch to threshold mode at debug/trace.
    pub fn with_verbosity(mut self, verbosity: u8) -> Self {
        let level = match verbosity {
            0 => return self,
            1 => Level::Debug,
            _ => Level::Trace,
        };
        self.levels.push(level);
        self.threshold = true;
        self
    }

    /// Most verbose level that must reach the formatter; used as the logger's max level.
    pub fn max_level(&self) -> LevelFilter {
        let lvl = self.levels.iter().max().copied();
        let mut filter = lvl.map(|l| l.to_level_filter()).unwrap_or(LevelFilter::Off);
        if !self.categories.is_empty() && filter < LevelFilter::Debug {
            filter = LevelFilter::Debug;
        }
        filter
    }

    pub fn allows(&self, level: Level, target: &str) -> bool {
        if let Some(cat) = Category::from_target(target) {
            if self.categories.contains(&cat) {
                return true;
            }
        }
        if self.threshold {
            self.levels.iter().max().is_some_and(|max| level <= *max)
        } else if Category::from_target(target).is_some() {
            false
        } else {
            self.levels.contains(&level)
        }
    }

    pub fn allows_record(&self, record: &Record) -> bool {
        self.allows(record.level(), record.target())
    }
}
