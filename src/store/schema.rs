//! Schema creation and additive migration for the event store.
//!
//! Safe to run on every open: tables and the dedup index are created only when
//! missing, and older `logs` tables that predate the extraction columns are
//! upgraded in place with `ALTER TABLE ... ADD COLUMN`.

use rusqlite::Connection;

use crate::NmasResult;

/// Optional `logs` columns added after the first release, with their SQL types.
const LOGS_ADDED_COLUMNS: &[(&str, &str)] = &[("username", "TEXT"), ("port", "TEXT")];

pub(crate) fn migrate(conn: &Connection) -> NmasResult<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS logs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            timestamp TEXT,
            source TEXT,
            message TEXT
        );
        "#,
    )?;

    let existing = table_columns(conn, "logs")?;
    for (name, sql_type) in LOGS_ADDED_COLUMNS {
        if !existing.iter().any(|c| c == name) {
            conn.execute_batch(&format!("ALTER TABLE logs ADD COLUMN {} {};", name, sql_type))?;
            log::info!("[STORE] Upgraded table 'logs': added column '{}'", name);
        }
    }

    conn.execute_batch(
        r#"
        CREATE INDEX IF NOT EXISTS idx_logs_timestamp ON logs(timestamp);

        CREATE TABLE IF NOT EXISTS alerts (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            ts TEXT,
            type TEXT,
            source TEXT,
            username TEXT,
            window_start TEXT,
            window_end TEXT,
            count INTEGER,
            details TEXT
        );

        CREATE UNIQUE INDEX IF NOT EXISTS ux_alert_dedupe
            ON alerts(type, source, window_start, window_end);
        "#,
    )?;

    Ok(())
}

/// Column names of `table`, in declaration order.
pub(crate) fn table_columns(conn: &Connection, table: &str) -> NmasResult<Vec<String>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table))?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_schema_has_all_columns() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();
        assert_eq!(
            table_columns(&conn, "logs").unwrap(),
            vec!["id", "timestamp", "source", "message", "username", "port"]
        );
        assert_eq!(table_columns(&conn, "alerts").unwrap().len(), 9);
    }

    #[test]
    fn test_migrate_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();
        migrate(&conn).unwrap();
        assert_eq!(table_columns(&conn, "logs").unwrap().len(), 6);
    }

    #[test]
    fn test_legacy_logs_table_is_upgraded_without_data_loss() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE logs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT, source TEXT, message TEXT
            );
            INSERT INTO logs (timestamp, source, message)
                VALUES ('2025-01-01T00:00:00', '10.1.1.1', 'legacy line');",
        )
        .unwrap();

        migrate(&conn).unwrap();

        let cols = table_columns(&conn, "logs").unwrap();
        assert!(cols.contains(&"username".to_string()));
        assert!(cols.contains(&"port".to_string()));

        let (msg, user): (String, Option<String>) = conn
            .query_row("SELECT message, username FROM logs", [], |r| {
                Ok((r.get(0)?, r.get(1)?))
            })
            .unwrap();
        assert_eq!(msg, "legacy line");
        assert_eq!(user, None);
    }
}
