//! # Detection Engine
//!
//! Turns stored events into deduplicated alerts. Each run is a complete,
//! independent pass evaluated at a caller-supplied `now`:
//!
//! 1. Query the trailing login window for failed-password events and group
//!    them by `(source, username)` (see `login_burst`).
//! 2. Query the trailing scan window for port-bearing events and count
//!    distinct ports per source (see `port_scan`).
//! 3. Insert every candidate. A dedup-key collision means the window was
//!    already recorded and counts as zero new alerts. A candidate whose insert
//!    fails for any other reason is logged and skipped; the rest of the pass
//!    goes on, so what was stored still reaches the notifiers.
//!
//! The engine holds no state between runs. Re-running with the same `now`
//! reproduces the same window bounds, which collide on the dedup key, so a
//! repeated or overlapping pass never produces a second row for one window.

pub mod login_burst;
pub mod port_scan;

use chrono::NaiveDateTime;

use crate::store::{EventFilter, EventStore};
use crate::{format_ts, Alert, DetectionConfig, InsertOutcome, NmasResult, Window};

/// Outcome of one detection pass.
#[derive(Debug, Clone, Default)]
pub struct DetectionRun {
    /// Every alert the windows qualified for, new or not.
    pub candidates: Vec<Alert>,

    /// The candidates that were newly stored, with their ids.
    pub inserted: Vec<Alert>,

    /// Candidates whose insert failed with a storage error.
    pub failed: usize,
}

impl DetectionRun {
    pub fn new_alert_count(&self) -> usize {
        self.inserted.len()
    }
}

pub struct DetectionEngine {
    config: DetectionConfig,
}

impl DetectionEngine {
    pub fn new(config: &DetectionConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    pub fn config(&self) -> &DetectionConfig {
        &self.config
    }

    /// Compute alert candidates for `now` without storing anything.
    ///
    /// Login bursts come first, then port scans; within each type the order
    /// is by source (and username), so identical data gives identical output.
    pub fn candidates(&self, store: &EventStore, now: NaiveDateTime) -> NmasResult<Vec<Alert>> {
        let login_window = Window::trailing(now, self.config.login_window_secs);
        let failed = store.query_events(&login_window, EventFilter::FailedLogin)?;
        let mut alerts = login_burst::detect(
            &failed,
            &login_window,
            self.config.login_window_secs,
            self.config.login_threshold,
        );

        let scan_window = Window::trailing(now, self.config.scan_window_secs);
        let probes = store.query_events(&scan_window, EventFilter::HasPort)?;
        alerts.extend(port_scan::detect(
            &probes,
            &scan_window,
            self.config.scan_window_secs,
            self.config.scan_threshold,
        ));

        Ok(alerts)
    }

    /// Compute candidates for `now` and insert them.
    pub fn run(&self, store: &EventStore, now: NaiveDateTime) -> NmasResult<DetectionRun> {
        let candidates = self.candidates(store, now)?;
        let mut inserted = Vec::new();
        let mut failed = 0;

        for candidate in &candidates {
            match store.insert_alert(candidate) {
                Ok(InsertOutcome::Inserted(id)) => {
                    inserted.push(Alert {
                        id: Some(id),
                        ..candidate.clone()
                    });
                }
                Ok(InsertOutcome::AlreadyExists) => {
                    log::debug!(
                        "[DETECT] Already recorded: {} src={} window {}..{}",
                        candidate.alert_type,
                        candidate.source,
                        format_ts(&candidate.window_start),
                        format_ts(&candidate.window_end),
                    );
                }
                Err(e) => {
                    failed += 1;
                    log::error!(
                        "[DETECT] Could not store alert ({}): {}",
                        e,
                        candidate.summary_line(),
                    );
                }
            }
        }

        log::info!(
            "[DETECT] Run @ {}: {} candidate(s), {} new, {} failed",
            format_ts(&now),
            candidates.len(),
            inserted.len(),
            failed,
        );

        Ok(DetectionRun {
            candidates,
            inserted,
            failed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{now_utc, AlertType};
    use chrono::Duration;

    fn seed_login_burst(store: &EventStore, now: NaiveDateTime, source: &str, user: &str, n: i64) {
        for i in 0..n {
            let ts = now - Duration::seconds(10 * (n - 1 - i));
            let msg = format!("Failed password for {} from {} port 22 ssh2", user, source);
            store.append_event(&ts, source, &msg, Some(user), Some("22")).unwrap();
        }
    }

    #[test]
    fn test_login_burst_end_to_end() {
        let store = EventStore::open_in_memory().unwrap();
        let now = now_utc();
        seed_login_burst(&store, now, "10.0.0.50", "admin", 5);

        let run = DetectionEngine::new(&DetectionConfig::default()).run(&store, now).unwrap();
        assert_eq!(run.new_alert_count(), 1);
        let alert = &run.inserted[0];
        assert_eq!(alert.alert_type, AlertType::FailedLoginBurst);
        assert_eq!(alert.source, "10.0.0.50");
        assert!(alert.count >= 5);
        assert!(alert.id.is_some());
    }

    #[test]
    fn test_events_outside_window_are_ignored() {
        let store = EventStore::open_in_memory().unwrap();
        let now = now_utc();
        // Four inside the 180s window, one just outside it.
        seed_login_burst(&store, now, "10.0.0.50", "admin", 4);
        store
            .append_event(
                &(now - Duration::seconds(181)),
                "10.0.0.50",
                "Failed password for admin",
                Some("admin"),
                None,
            )
            .unwrap();

        let run = DetectionEngine::new(&DetectionConfig::default()).run(&store, now).unwrap();
        assert!(run.candidates.is_empty());
    }

    #[test]
    fn test_second_run_same_now_inserts_nothing() {
        let store = EventStore::open_in_memory().unwrap();
        let now = now_utc();
        seed_login_burst(&store, now, "10.0.0.50", "admin", 6);
        for p in 20..32 {
            store
                .append_event(&now, "10.0.0.99", &format!("port {}", p), None, Some(p.to_string().as_str()))
                .unwrap();
        }

        let engine = DetectionEngine::new(&DetectionConfig::default());
        let first = engine.run(&store, now).unwrap();
        assert_eq!(first.new_alert_count(), 2);

        let second = engine.run(&store, now).unwrap();
        assert_eq!(second.candidates.len(), 2);
        assert_eq!(second.new_alert_count(), 0);
        assert_eq!(store.count_alerts().unwrap(), 2);
    }

    #[test]
    fn test_candidates_are_deterministic() {
        let store = EventStore::open_in_memory().unwrap();
        let now = now_utc();
        seed_login_burst(&store, now, "10.0.0.60", "root", 5);
        seed_login_burst(&store, now, "10.0.0.50", "admin", 5);

        let engine = DetectionEngine::new(&DetectionConfig::default());
        let a = engine.candidates(&store, now).unwrap();
        let b = engine.candidates(&store, now).unwrap();
        assert_eq!(a, b);
        assert_eq!(a[0].source, "10.0.0.50");
        assert_eq!(a[1].source, "10.0.0.60");
    }

    #[test]
    fn test_custom_thresholds_apply() {
        let store = EventStore::open_in_memory().unwrap();
        let now = now_utc();
        seed_login_burst(&store, now, "10.0.0.50", "admin", 3);

        let config = DetectionConfig {
            login_threshold: 3,
            ..DetectionConfig::default()
        };
        let run = DetectionEngine::new(&config).run(&store, now).unwrap();
        assert_eq!(run.new_alert_count(), 1);
        assert_eq!(run.inserted[0].count, 3);
    }

    #[test]
    fn test_failed_insert_skips_only_that_candidate() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.db");
        let store = EventStore::open(&path).unwrap();
        let now = now_utc();
        seed_login_burst(&store, now, "10.0.0.1", "admin", 5);
        seed_login_burst(&store, now, "10.0.0.2", "admin", 5);
        seed_login_burst(&store, now, "10.0.0.3", "admin", 5);

        let raw = rusqlite::Connection::open(&path).unwrap();
        raw.execute_batch(
            "CREATE TRIGGER reject_source BEFORE INSERT ON alerts
             WHEN NEW.source = '10.0.0.2'
             BEGIN SELECT RAISE(ABORT, 'rejected'); END;",
        )
        .unwrap();

        let run = DetectionEngine::new(&DetectionConfig::default()).run(&store, now).unwrap();
        assert_eq!(run.candidates.len(), 3);
        assert_eq!(run.failed, 1);
        let sources: Vec<_> = run.inserted.iter().map(|a| a.source.as_str()).collect();
        assert_eq!(sources, vec!["10.0.0.1", "10.0.0.3"]);
        assert_eq!(store.count_alerts().unwrap(), 2);
    }

    #[test]
    fn test_empty_store_is_not_an_error() {
        let store = EventStore::open_in_memory().unwrap();
        let run = DetectionEngine::new(&DetectionConfig::default())
            .run(&store, now_utc())
            .unwrap();
        assert!(run.candidates.is_empty());
        assert!(run.inserted.is_empty());
    }
}
