//! # Event Store
//!
//! SQLite persistence for events (`logs`) and deduplicated alerts (`alerts`).
//!
//! Each component opens its own `EventStore` on the same database file. WAL
//! journaling lets the listener keep writing while a detection pass reads,
//! and the unique index on `(type, source, window_start, window_end)` is the
//! only thing standing between two overlapping detection passes and a
//! duplicate alert. A second insert of the same key fails inside SQLite and
//! comes back as `InsertOutcome::AlreadyExists`.

pub mod schema;

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};

use crate::{
    format_ts, parse_ts, Alert, AlertId, Event, EventId, InsertOutcome, NewEvent, NmasError,
    NmasResult, Window,
};

/// How long a writer waits on a locked database before giving up.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Row predicate applied by `query_events`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventFilter {
    All,

    /// Has a username and the message starts with "Failed password"
    /// (ASCII case-insensitive, as SQLite `LIKE` is).
    FailedLogin,

    /// Has a destination port.
    HasPort,
}

impl EventFilter {
    fn sql_clause(&self) -> &'static str {
        match self {
            EventFilter::All => "1 = 1",
            EventFilter::FailedLogin => "username IS NOT NULL AND message LIKE 'Failed password%'",
            EventFilter::HasPort => "port IS NOT NULL",
        }
    }
}

pub struct EventStore {
    conn: Mutex<Connection>,
}

impl EventStore {
    /// Open (or create) the database at `path`, creating parent directories
    /// and bringing the schema up to date.
    pub fn open(path: &Path) -> NmasResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        schema::migrate(&conn)?;
        log::debug!("[STORE] Opened {} (journal_mode={})", path.display(), mode);
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open a private in-memory database (for testing).
    pub fn open_in_memory() -> NmasResult<Self> {
        let conn = Connection::open_in_memory()?;
        schema::migrate(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> NmasResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| NmasError::Storage("connection mutex poisoned".into()))
    }

    /// Append one event and return its id.
    pub fn append_event(
        &self,
        timestamp: &chrono::NaiveDateTime,
        source: &str,
        message: &str,
        username: Option<&str>,
        port: Option<&str>,
    ) -> NmasResult<EventId> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO logs (timestamp, source, message, username, port)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![format_ts(timestamp), source, message, username, port],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Append a batch of events in one transaction. All or nothing.
    pub fn append_events(&self, events: &[NewEvent]) -> NmasResult<Vec<EventId>> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let mut ids = Vec::with_capacity(events.len());
        {
            let mut stmt = tx.prepare(
                "INSERT INTO logs (timestamp, source, message, username, port)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for e in events {
                stmt.execute(params![
                    format_ts(&e.timestamp),
                    e.source,
                    e.message,
                    e.username,
                    e.port,
                ])?;
                ids.push(tx.last_insert_rowid());
            }
        }
        tx.commit()?;
        Ok(ids)
    }

    /// Events with `window.start <= timestamp <= window.end` matching `filter`,
    /// in insertion order.
    ///
    /// Only the leading `YYYY-MM-DDTHH:MM:SS` of a stored timestamp is compared
    /// against the upper bound, so a row written with an offset or fraction
    /// suffix at exactly `window.end` still counts.
    pub fn query_events(&self, window: &Window, filter: EventFilter) -> NmasResult<Vec<Event>> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT id, timestamp, source, message, username, port
             FROM logs
             WHERE timestamp >= ?1 AND substr(timestamp, 1, 19) <= ?2 AND {}
             ORDER BY id",
            filter.sql_clause()
        );
        let mut stmt = conn.prepare(&sql)?;
        let events = stmt
            .query_map(
                params![format_ts(&window.start), format_ts(&window.end)],
                row_to_event,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(events)
    }

    /// Store `alert` unless its dedup key is already present.
    ///
    /// The uniqueness check happens inside the insert itself, so there is no
    /// read-then-write gap for a concurrent pass to slip through.
    pub fn insert_alert(&self, alert: &Alert) -> NmasResult<InsertOutcome> {
        let conn = self.lock()?;
        let result = conn.execute(
            "INSERT INTO alerts (ts, type, source, username, window_start, window_end, count, details)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                format_ts(&alert.ts),
                alert.alert_type.as_str(),
                alert.source,
                alert.username,
                format_ts(&alert.window_start),
                format_ts(&alert.window_end),
                alert.count as i64,
                alert.details,
            ],
        );

        match result {
            Ok(_) => Ok(InsertOutcome::Inserted(conn.last_insert_rowid())),
            Err(e) if is_unique_violation(&e) => Ok(InsertOutcome::AlreadyExists),
            Err(e) => Err(NmasError::Sqlite(e)),
        }
    }

    pub fn get_alert(&self, id: AlertId) -> NmasResult<Option<Alert>> {
        let conn = self.lock()?;
        let alert = conn
            .query_row(
                "SELECT id, ts, type, source, username, window_start, window_end, count, details
                 FROM alerts WHERE id = ?1",
                params![id],
                row_to_alert,
            )
            .optional()?;
        Ok(alert)
    }

    pub fn count_events(&self) -> NmasResult<u64> {
        let conn = self.lock()?;
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM logs", [], |row| row.get(0))?;
        Ok(n as u64)
    }

    pub fn count_alerts(&self) -> NmasResult<u64> {
        let conn = self.lock()?;
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM alerts", [], |row| row.get(0))?;
        Ok(n as u64)
    }
}

fn is_unique_violation(e: &rusqlite::Error) -> bool {
    match e {
        rusqlite::Error::SqliteFailure(err, _) => {
            err.code == ErrorCode::ConstraintViolation
                && err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
        }
        _ => false,
    }
}

fn conversion_error(col: usize, what: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        col,
        rusqlite::types::Type::Text,
        Box::new(NmasError::Storage(what)),
    )
}

fn ts_column(row: &Row, col: usize) -> rusqlite::Result<chrono::NaiveDateTime> {
    let raw: String = row.get(col)?;
    parse_ts(&raw).ok_or_else(|| conversion_error(col, format!("bad timestamp: {}", raw)))
}

fn row_to_event(row: &Row) -> rusqlite::Result<Event> {
    Ok(Event {
        id: row.get(0)?,
        timestamp: ts_column(row, 1)?,
        source: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
        message: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
        username: row.get(4)?,
        port: row.get(5)?,
    })
}

fn row_to_alert(row: &Row) -> rusqlite::Result<Alert> {
    let type_str: String = row.get(2)?;
    let alert_type = type_str
        .parse()
        .map_err(|e: NmasError| conversion_error(2, e.to_string()))?;
    Ok(Alert {
        id: Some(row.get(0)?),
        ts: ts_column(row, 1)?,
        alert_type,
        source: row.get(3)?,
        username: row.get(4)?,
        window_start: ts_column(row, 5)?,
        window_end: ts_column(row, 6)?,
        count: row.get::<_, i64>(7)? as u64,
        details: row.get(8)?,
    })
}
