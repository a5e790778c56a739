//! # NMAS - Core Library
//!
//! Network Monitoring & Alert System.
//!
//! NMAS receives syslog-style datagrams, stores them as events, periodically
//! scans the event stream for credential-stuffing bursts and port scans, and
//! fans deduplicated alerts out to a log file, a JSON export, mail and a
//! webhook.
//!
//! ## Pipeline
//! - **Ingest.** `ingest::IngestListener` turns datagrams into stored events.
//! - **Store.** `store::EventStore` owns the `logs` and `alerts` tables.
//! - **Detect.** `detection::DetectionEngine` aggregates trailing windows into alerts.
//! - **Notify.** `notify::Notifier` delivers the alerts a run inserted.

pub mod detection;
pub mod ingest;
pub mod notify;
pub mod pipeline;
pub mod simulate;
pub mod store;

use chrono::{Duration, NaiveDateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Unified error type for NMAS.
#[derive(Error, Debug)]
pub enum NmasError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error(
        "Cannot bind UDP listener on {addr}: {source}. Make sure no other process \
         holds the port, use a port above 1024 or run with elevated privileges, \
         or change [listener] bind_host/port in the config file"
    )]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Notification failed: {0}")]
    Notify(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML deserialization error: {0}")]
    TomlDe(#[from] toml::de::Error),
}

pub type NmasResult<T> = Result<T, NmasError>;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Top-level configuration for NMAS.
///
/// Loaded from `nmas.toml` in the working directory or a path supplied via
/// CLI flag. Every section falls back to its defaults when omitted, so a file
/// only needs to name what it changes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NmasConfig {
    /// General daemon settings.
    pub general: GeneralConfig,

    /// UDP listener settings.
    pub listener: ListenerConfig,

    /// Detection windows and thresholds.
    pub detection: DetectionConfig,

    /// Alert log and JSON export.
    pub logging: LoggingConfig,

    /// Outbound mail channel.
    pub email: EmailConfig,

    /// Outbound webhook channel.
    pub webhook: WebhookConfig,

    /// Synthetic event injection.
    pub simulate: SimulateConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Directory for the database and alert artifacts.
    pub data_dir: PathBuf,

    /// SQLite database holding events and alerts. Defaults to
    /// `<data_dir>/events.db`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database_path: Option<PathBuf>,

    /// How often (in seconds) `start` runs a detection pass.
    pub eval_interval_secs: u64,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./nmas-data"),
            database_path: None,
            eval_interval_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Interface to bind (e.g., "0.0.0.0" for all interfaces).
    pub bind_host: String,

    /// UDP port to receive syslog datagrams on.
    pub port: u16,

    /// Upper bound on a single receive wait. Shutdown is noticed within this interval.
    pub recv_timeout_ms: u64,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_host: "0.0.0.0".to_string(),
            port: 5514,
            recv_timeout_ms: 1000,
        }
    }
}

impl ListenerConfig {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.bind_host, self.port)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DetectionConfig {
    /// Trailing window for failed-login bursts.
    pub login_window_secs: u64,

    /// Failed logins per (source, username) that raise an alert (inclusive).
    pub login_threshold: u64,

    /// Trailing window for port scans.
    pub scan_window_secs: u64,

    /// Distinct destination ports per source that raise an alert (inclusive).
    pub scan_threshold: u64,
}

/// Longest accepted detection window (30 days).
pub const MAX_WINDOW_SECS: u64 = 30 * 24 * 60 * 60;

impl DetectionConfig {
    /// Reject windows longer than `MAX_WINDOW_SECS`.
    pub fn validate(&self) -> NmasResult<()> {
        for (key, secs) in [
            ("login_window_secs", self.login_window_secs),
            ("scan_window_secs", self.scan_window_secs),
        ] {
            if secs > MAX_WINDOW_SECS {
                return Err(NmasError::Config(format!(
                    "[detection] {} = {} exceeds the maximum of {}s",
                    key, secs, MAX_WINDOW_SECS
                )));
            }
        }
        Ok(())
    }
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            login_window_secs: 180,
            login_threshold: 5,
            scan_window_secs: 60,
            scan_threshold: 12,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Enables both the alert log and the JSON export.
    pub enabled: bool,

    /// Append-only text log, one line per alert. Defaults to
    /// `<data_dir>/alerts.log`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alert_log_path: Option<PathBuf>,

    /// JSON array of every alert exported so far. Defaults to
    /// `<data_dir>/alerts.json`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alert_json_path: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            alert_log_path: None,
            alert_json_path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmailConfig {
    pub enabled: bool,

    /// SMTP relay host.
    pub host: String,

    /// SMTP relay port.
    pub port: u16,

    /// Envelope and header sender.
    pub sender: String,

    /// Recipients of the per-run summary.
    pub to: Vec<String>,

    /// Connect and command timeout for the relay.
    pub timeout_secs: u64,
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: "localhost".to_string(),
            port: 1025,
            sender: "noreply@nmas.local".to_string(),
            to: vec!["admin@nmas.local".to_string()],
            timeout_secs: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    pub enabled: bool,

    /// Destination for the JSON `{"text": ...}` payload (Slack, Discord, etc.).
    pub url: Option<String>,

    /// Whole-request timeout.
    pub timeout_secs: u64,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: None,
            timeout_secs: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulateConfig {
    /// Whether synthetic events may be injected.
    pub enabled: bool,
}

impl Default for SimulateConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl NmasConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> NmasResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: NmasConfig = toml::from_str(&content)?;
        config.detection.validate()?;
        Ok(config)
    }

    /// `[general].database_path`, or `<data_dir>/events.db`.
    pub fn database_path(&self) -> PathBuf {
        self.general
            .database_path
            .clone()
            .unwrap_or_else(|| self.general.data_dir.join("events.db"))
    }

    /// `[logging].alert_log_path`, or `<data_dir>/alerts.log`.
    pub fn alert_log_path(&self) -> PathBuf {
        self.logging
            .alert_log_path
            .clone()
            .unwrap_or_else(|| self.general.data_dir.join("alerts.log"))
    }

    /// `[logging].alert_json_path`, or `<data_dir>/alerts.json`.
    pub fn alert_json_path(&self) -> PathBuf {
        self.logging
            .alert_json_path
            .clone()
            .unwrap_or_else(|| self.general.data_dir.join("alerts.json"))
    }

    /// Load `path` if it exists, otherwise fall back to defaults.
    ///
    /// A file that exists but fails to parse is a startup error, not a reason
    /// to silently run with defaults.
    pub fn load_or_default(path: &Path) -> NmasResult<Self> {
        if path.exists() {
            log::info!("Loading configuration from: {}", path.display());
            Self::from_file(path)
        } else {
            log::info!("No config file at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    /// Write the default configuration to a TOML file.
    pub fn write_default(path: &Path) -> NmasResult<()> {
        let config = Self::default();
        let content =
            toml::to_string_pretty(&config).map_err(|e| NmasError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Timestamps
// ---------------------------------------------------------------------------

/// Storage and wire format for every timestamp in the pipeline (UTC, seconds).
pub const TS_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Current UTC wall-clock time truncated to whole seconds.
pub fn now_utc() -> NaiveDateTime {
    let now = Utc::now().naive_utc();
    now.with_nanosecond(0).unwrap_or(now)
}

pub fn format_ts(ts: &NaiveDateTime) -> String {
    ts.format(TS_FORMAT).to_string()
}

/// Parse a stored timestamp. Accepts a trailing offset or fraction
/// (`2025-01-01T10:00:00+00:00`) by reading only the first 19 characters.
pub fn parse_ts(s: &str) -> Option<NaiveDateTime> {
    let head = s.get(..19)?;
    NaiveDateTime::parse_from_str(head, TS_FORMAT).ok()
}

/// A trailing time interval `[start, end]`, inclusive on both ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Window {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl Window {
    /// The window `[now - secs, now]`. A span reaching past the earliest
    /// representable time starts at `NaiveDateTime::MIN`.
    pub fn trailing(now: NaiveDateTime, secs: u64) -> Self {
        let start = i64::try_from(secs)
            .ok()
            .and_then(Duration::try_seconds)
            .and_then(|span| now.checked_sub_signed(span))
            .unwrap_or(NaiveDateTime::MIN);
        Self { start, end: now }
    }

    pub fn contains(&self, ts: &NaiveDateTime) -> bool {
        *ts >= self.start && *ts <= self.end
    }
}

// ---------------------------------------------------------------------------
// Core Types
// ---------------------------------------------------------------------------

/// Row identity assigned by the store on insert.
pub type EventId = i64;
pub type AlertId = i64;

/// One observed log line, as stored.
///
/// Immutable once written. `username` and `port` are `None` when the message
/// matched no extraction pattern; an empty string is a present value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,

    /// Receipt time (UTC, second precision).
    pub timestamp: NaiveDateTime,

    /// Sender's network address.
    pub source: String,

    /// Raw message text after lossy decoding.
    pub message: String,

    pub username: Option<String>,

    /// Destination port as matched text, not a validated integer.
    pub port: Option<String>,
}

/// An event not yet written to the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEvent {
    pub timestamp: NaiveDateTime,
    pub source: String,
    pub message: String,
    pub username: Option<String>,
    pub port: Option<String>,
}

/// The closed set of anomalies NMAS raises.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertType {
    /// Repeated failed passwords for one (source, username).
    FailedLoginBurst,

    /// Many distinct destination ports from one source.
    PortScan,
}

impl AlertType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertType::FailedLoginBurst => "FAILED_LOGIN_BURST",
            AlertType::PortScan => "PORT_SCAN",
        }
    }
}

impl fmt::Display for AlertType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AlertType {
    type Err = NmasError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "FAILED_LOGIN_BURST" => Ok(AlertType::FailedLoginBurst),
            "PORT_SCAN" => Ok(AlertType::PortScan),
            other => Err(NmasError::Storage(format!("unknown alert type: {}", other))),
        }
    }
}

/// One detected anomaly for one window.
///
/// `(alert_type, source, window_start, window_end)` is the dedup key and is
/// unique in the store. `id` is `None` until the alert has been inserted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alert {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<AlertId>,

    /// Detection time.
    pub ts: NaiveDateTime,

    #[serde(rename = "type")]
    pub alert_type: AlertType,

    pub source: String,

    /// Present for login bursts, absent for port scans.
    pub username: Option<String>,

    pub window_start: NaiveDateTime,

    pub window_end: NaiveDateTime,

    /// Attempts for a login burst, distinct ports for a port scan.
    pub count: u64,

    pub details: String,
}

impl Alert {
    /// The uniqueness key enforced by the alerts table.
    pub fn dedup_key(&self) -> (AlertType, &str, NaiveDateTime, NaiveDateTime) {
        (self.alert_type, &self.source, self.window_start, self.window_end)
    }

    /// `<ts> | <type> | src=<source> | user=<username> | cnt=<count> | <details>`
    ///
    /// Shared by the alert log, the mail body and the webhook text.
    pub fn summary_line(&self) -> String {
        format!(
            "{} | {} | src={} | user={} | cnt={} | {}",
            format_ts(&self.ts),
            self.alert_type,
            self.source,
            self.username.as_deref().unwrap_or(""),
            self.count,
            self.details,
        )
    }
}

/// Result of attempting to store an alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// Newly stored with this id.
    Inserted(AlertId),

    /// The dedup key was already recorded. Not an error.
    AlreadyExists,
}
