//! # Synthetic Event Injection
//!
//! Writes canned attack traffic straight into the Event Store so the
//! detection pipeline can be exercised without a device sending syslog.
//! Every event of one injection shares the same timestamp and the batch is
//! written in a single transaction.

use chrono::NaiveDateTime;

use crate::store::EventStore;
use crate::{NewEvent, NmasError, NmasResult, SimulateConfig};

pub const DEFAULT_LOGIN_SOURCE: &str = "10.0.0.50";
pub const DEFAULT_USERNAME: &str = "admin";
pub const DEFAULT_LOGIN_COUNT: u32 = 6;
pub const MAX_LOGIN_COUNT: u32 = 50;

pub const DEFAULT_SCAN_SOURCE: &str = "10.0.0.99";
pub const DEFAULT_START_PORT: u32 = 20;
pub const DEFAULT_SCAN_PORTS: u32 = 20;
pub const MAX_SCAN_PORTS: u32 = 60;

const MAX_FIELD_CHARS: usize = 64;

fn ensure_enabled(config: &SimulateConfig) -> NmasResult<()> {
    if config.enabled {
        Ok(())
    } else {
        Err(NmasError::Config(
            "simulation is disabled ([simulate] enabled = false)".into(),
        ))
    }
}

/// Blank input falls back to `default`; anything longer than 64 chars is cut.
fn field_or(value: &str, default: &str) -> String {
    let value = value.trim();
    let value = if value.is_empty() { default } else { value };
    value.chars().take(MAX_FIELD_CHARS).collect()
}

/// Insert `count` (1..=50) failed-password events for `username` from `source`.
/// Returns the number of events written.
pub fn inject_failed_logins(
    store: &EventStore,
    config: &SimulateConfig,
    source: &str,
    username: &str,
    count: u32,
    now: NaiveDateTime,
) -> NmasResult<usize> {
    ensure_enabled(config)?;

    let source = field_or(source, DEFAULT_LOGIN_SOURCE);
    let username = field_or(username, DEFAULT_USERNAME);
    let count = count.clamp(1, MAX_LOGIN_COUNT);

    let batch: Vec<NewEvent> = (0..count)
        .map(|_| NewEvent {
            timestamp: now,
            source: source.clone(),
            message: format!("Failed password for {}", username),
            username: Some(username.clone()),
            port: None,
        })
        .collect();

    let ids = store.append_events(&batch)?;
    log::info!(
        "[SIMULATE] Injected {} failed login(s) for user={} from {}",
        ids.len(),
        username,
        source
    );
    Ok(ids.len())
}

/// Insert one connection-attempt event per port, `n` (1..=60) consecutive
/// ports from `start_port` (1..=65535). Ports past 65535 are not generated,
/// so a start near the top yields fewer than `n` events.
pub fn inject_port_scan(
    store: &EventStore,
    config: &SimulateConfig,
    source: &str,
    start_port: u32,
    n: u32,
    now: NaiveDateTime,
) -> NmasResult<usize> {
    ensure_enabled(config)?;

    let source = field_or(source, DEFAULT_SCAN_SOURCE);
    let start = start_port.clamp(1, u16::MAX as u32);
    let n = n.clamp(1, MAX_SCAN_PORTS);

    let batch: Vec<NewEvent> = (start..start + n)
        .take_while(|port| *port <= u16::MAX as u32)
        .map(|port| NewEvent {
            timestamp: now,
            source: source.clone(),
            message: format!("Connection attempt port {}", port),
            username: None,
            port: Some(port.to_string()),
        })
        .collect();

    let ids = store.append_events(&batch)?;
    log::info!(
        "[SIMULATE] Injected {} port probe(s) from {} starting at port {}",
        ids.len(),
        source,
        start
    );
    Ok(ids.len())
}
