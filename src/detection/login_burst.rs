//! # Failed-Login Burst Detector
//!
//! Credential stuffing and password guessing show up as the same source
//! failing against the same account again and again. Over the trailing login
//! window, failed-password events are grouped by `(source, username)` and
//! every group with at least `threshold` members becomes one alert.
//!
//! Input events must already be restricted to the window and to
//! `EventFilter::FailedLogin`. The store does both in SQL.

use std::collections::BTreeMap;

use crate::{Alert, AlertType, Event, Window};

/// One alert per `(source, username)` group with `count >= threshold`,
/// ordered by source then username.
pub fn detect(events: &[Event], window: &Window, window_secs: u64, threshold: u64) -> Vec<Alert> {
    let mut groups: BTreeMap<(&str, &str), u64> = BTreeMap::new();
    for event in events {
        let Some(username) = event.username.as_deref() else {
            continue;
        };
        *groups.entry((event.source.as_str(), username)).or_insert(0) += 1;
    }

    groups
        .into_iter()
        .filter(|(_, count)| *count >= threshold)
        .map(|((source, username), count)| Alert {
            id: None,
            ts: window.end,
            alert_type: AlertType::FailedLoginBurst,
            source: source.to_string(),
            username: Some(username.to_string()),
            window_start: window.start,
            window_end: window.end,
            count,
            details: format!(
                "{} failed logins for user={} within {}s",
                count, username, window_secs
            ),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::now_utc;

    fn failed(id: i64, source: &str, user: Option<&str>) -> Event {
        Event {
            id,
            timestamp: now_utc(),
            source: source.into(),
            message: format!("Failed password for {}", user.unwrap_or("")),
            username: user.map(String::from),
            port: None,
        }
    }

    fn window() -> Window {
        Window::trailing(now_utc(), 180)
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let w = window();
        let events: Vec<_> = (0..5).map(|i| failed(i, "10.0.0.50", Some("admin"))).collect();
        let alerts = detect(&events, &w, 180, 5);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].count, 5);
        assert_eq!(alerts[0].username.as_deref(), Some("admin"));
        assert_eq!(alerts[0].window_start, w.start);
        assert_eq!(alerts[0].window_end, w.end);
        assert_eq!(alerts[0].ts, w.end);
        assert_eq!(alerts[0].details, "5 failed logins for user=admin within 180s");
    }

    #[test]
    fn test_below_threshold_emits_nothing() {
        let events: Vec<_> = (0..4).map(|i| failed(i, "10.0.0.50", Some("admin"))).collect();
        assert!(detect(&events, &window(), 180, 5).is_empty());
    }

    #[test]
    fn test_groups_split_by_source_and_user() {
        let mut events = Vec::new();
        for i in 0..5 {
            events.push(failed(i, "10.0.0.50", Some("admin")));
            events.push(failed(100 + i, "10.0.0.50", Some("root")));
            events.push(failed(200 + i, "10.0.0.51", Some("admin")));
        }
        // Spread across users: 3 + 2 never reaches 5 for either.
        for i in 0..3 {
            events.push(failed(300 + i, "10.0.0.52", Some("alice")));
        }
        for i in 0..2 {
            events.push(failed(400 + i, "10.0.0.52", Some("bob")));
        }

        let alerts = detect(&events, &window(), 180, 5);
        let keys: Vec<_> = alerts
            .iter()
            .map(|a| (a.source.as_str(), a.username.as_deref().unwrap()))
            .collect();
        assert_eq!(
            keys,
            vec![("10.0.0.50", "admin"), ("10.0.0.50", "root"), ("10.0.0.51", "admin")]
        );
    }

    #[test]
    fn test_empty_username_is_its_own_group() {
        let events: Vec<_> = (0..5).map(|i| failed(i, "10.0.0.9", Some(""))).collect();
        let alerts = detect(&events, &window(), 180, 5);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].username.as_deref(), Some(""));
    }

    #[test]
    fn test_null_username_is_ignored() {
        let events: Vec<_> = (0..10).map(|i| failed(i, "10.0.0.9", None)).collect();
        assert!(detect(&events, &window(), 180, 5).is_empty());
    }

    #[test]
    fn test_no_events_no_alerts() {
        assert!(detect(&[], &window(), 180, 5).is_empty());
    }
}
