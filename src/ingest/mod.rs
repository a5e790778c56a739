//! # Ingest Listener
//!
//! Receives syslog datagrams over UDP and appends one event per datagram to
//! the event store.
//!
//! The loop is single-threaded and processes one datagram at a time. Each
//! receive waits at most `recv_timeout_ms`, so a shutdown flag set from a
//! signal handler is noticed within one interval. Nothing a sender can put in
//! a datagram stops the loop: bytes are decoded lossily and unmatched fields
//! are stored as NULL. A failed store write drops that one event (logged with
//! everything needed to replay it by hand) and the loop carries on.
//!
//! Copyright (c) 2026 CIPS Corps. All rights reserved.

pub mod parser;

use std::io::ErrorKind;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::store::EventStore;
use crate::{format_ts, now_utc, EventId, ListenerConfig, NmasError, NmasResult};

/// Largest datagram read per receive. Longer payloads are truncated by the OS.
pub const MAX_DATAGRAM: usize = 4096;

/// Counters reported when the loop exits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestStats {
    pub received: u64,
    pub stored: u64,
    pub failed: u64,
}

pub struct IngestListener {
    socket: UdpSocket,
    store: EventStore,
    shutdown: Arc<AtomicBool>,
}

impl IngestListener {
    /// Bind the configured address.
    ///
    /// Bind failure is fatal and comes back as `NmasError::Bind`, whose
    /// message tells the operator what to change.
    pub fn bind(
        config: &ListenerConfig,
        store: EventStore,
        shutdown: Arc<AtomicBool>,
    ) -> NmasResult<Self> {
        let addr = config.bind_address();
        let socket = UdpSocket::bind(&addr).map_err(|source| NmasError::Bind {
            addr: addr.clone(),
            source,
        })?;
        socket.set_read_timeout(Some(Duration::from_millis(config.recv_timeout_ms.max(1))))?;

        log::info!("[LISTENER] Bound on {}", socket.local_addr()?);
        Ok(Self {
            socket,
            store,
            shutdown,
        })
    }

    pub fn local_addr(&self) -> NmasResult<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub fn store(&self) -> &EventStore {
        &self.store
    }

    /// Receive until the shutdown flag is set.
    pub fn run(&self) -> IngestStats {
        let mut stats = IngestStats::default();
        let mut buf = [0u8; MAX_DATAGRAM];

        log::info!("[LISTENER] Listening for syslog messages (Ctrl+C to stop)");

        while !self.shutdown.load(Ordering::SeqCst) {
            let (len, peer) = match self.socket.recv_from(&mut buf) {
                Ok(r) => r,
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                    continue;
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    log::warn!("[LISTENER] Receive error: {}", e);
                    continue;
                }
            };

            stats.received += 1;
            match self.handle_datagram(&buf[..len], peer) {
                Some(_) => stats.stored += 1,
                None => stats.failed += 1,
            }
        }

        log::info!(
            "[LISTENER] Stopped: {} received, {} stored, {} failed",
            stats.received,
            stats.stored,
            stats.failed,
        );
        stats
    }

    /// Decode, extract and store one datagram. Returns `None` only when the
    /// store write failed.
    pub fn handle_datagram(&self, payload: &[u8], peer: SocketAddr) -> Option<EventId> {
        let message = String::from_utf8_lossy(payload);
        let ts = now_utc();
        let source = peer.ip().to_string();
        let fields = parser::extract_fields(&message);

        match self.store.append_event(
            &ts,
            &source,
            &message,
            fields.username.as_deref(),
            fields.port.as_deref(),
        ) {
            Ok(id) => {
                log::debug!(
                    "[INSERT] {} {} user={} port={} :: {}",
                    format_ts(&ts),
                    source,
                    fields.username.as_deref().unwrap_or("-"),
                    fields.port.as_deref().unwrap_or("-"),
                    message.trim_end(),
                );
                Some(id)
            }
            Err(e) => {
                log::error!(
                    "[LISTENER] Dropped event (store write failed: {}) ts={} src={} user={:?} port={:?} msg={:?}",
                    e,
                    format_ts(&ts),
                    source,
                    fields.username,
                    fields.port,
                    message,
                );
                None
            }
        }
    }
}

/// The address other hosts should send to: the local side of a UDP
/// "connection" toward a public address. No packet leaves the host.
/// Falls back to loopback when there is no route.
pub fn primary_ip() -> IpAddr {
    let fallback = IpAddr::V4(Ipv4Addr::LOCALHOST);
    let socket = match UdpSocket::bind("0.0.0.0:0") {
        Ok(s) => s,
        Err(_) => return fallback,
    };
    if socket.connect("8.8.8.8:80").is_err() {
        return fallback;
    }
    socket.local_addr().map(|a| a.ip()).unwrap_or(fallback)
}
