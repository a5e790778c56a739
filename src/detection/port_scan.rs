//! # Port Scan Detector
//!
//! Reconnaissance touches many different destination ports from one source
//! in a short time. Over the trailing scan window, port-bearing events are
//! grouped by source and the number of *distinct* ports is counted; repeated
//! hits on the same port add nothing. A source reaching `threshold` distinct
//! ports becomes one alert.
//!
//! Ports are compared as the text that was matched, so "080" and "80" are
//! different values. Input events must already be restricted to the window
//! and to `EventFilter::HasPort`.

use std::collections::{BTreeMap, BTreeSet};

use crate::{Alert, AlertType, Event, Window};

/// One alert per source with `distinct ports >= threshold`, ordered by source.
pub fn detect(events: &[Event], window: &Window, window_secs: u64, threshold: u64) -> Vec<Alert> {
    let mut ports_by_source: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
    for event in events {
        let Some(port) = event.port.as_deref() else {
            continue;
        };
        ports_by_source
            .entry(event.source.as_str())
            .or_default()
            .insert(port);
    }

    ports_by_source
        .into_iter()
        .map(|(source, ports)| (source, ports.len() as u64))
        .filter(|(_, distinct)| *distinct >= threshold)
        .map(|(source, distinct)| Alert {
            id: None,
            ts: window.end,
            alert_type: AlertType::PortScan,
            source: source.to_string(),
            username: None,
            window_start: window.start,
            window_end: window.end,
            count: distinct,
            details: format!(
                "{} distinct destination ports within {}s",
                distinct, window_secs
            ),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::now_utc;

    fn probe(id: i64, source: &str, port: u32) -> Event {
        Event {
            id,
            timestamp: now_utc(),
            source: source.into(),
            message: format!("Connection attempt port {}", port),
            username: None,
            port: Some(port.to_string()),
        }
    }

    fn window() -> Window {
        Window::trailing(now_utc(), 60)
    }

    #[test]
    fn test_twelve_distinct_ports_alert() {
        let events: Vec<_> = (20..32).map(|p| probe(p as i64, "10.0.0.99", p)).collect();
        let alerts = detect(&events, &window(), 60, 12);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].alert_type, AlertType::PortScan);
        assert_eq!(alerts[0].count, 12);
        assert_eq!(alerts[0].username, None);
        assert_eq!(alerts[0].details, "12 distinct destination ports within 60s");
    }

    #[test]
    fn test_repeated_ports_do_not_count() {
        // 11 distinct ports, each hit three times.
        let mut events = Vec::new();
        for round in 0..3 {
            for p in 20..31 {
                events.push(probe(round * 100 + p as i64, "10.0.0.99", p));
            }
        }
        assert!(detect(&events, &window(), 60, 12).is_empty());

        events.push(probe(999, "10.0.0.99", 31));
        let alerts = detect(&events, &window(), 60, 12);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].count, 12);
    }

    #[test]
    fn test_sources_are_counted_separately() {
        let mut events = Vec::new();
        for p in 0..6 {
            events.push(probe(p, "10.0.0.1", 1000 + p as u32));
            events.push(probe(100 + p, "10.0.0.2", 1000 + p as u32));
        }
        assert!(detect(&events, &window(), 60, 12).is_empty());
    }

    #[test]
    fn test_output_is_ordered_by_source() {
        let mut events = Vec::new();
        for p in 0..12u32 {
            events.push(probe(p as i64, "10.0.0.9", p + 1));
            events.push(probe(100 + p as i64, "10.0.0.10", p + 1));
        }
        let sources: Vec<_> = detect(&events, &window(), 60, 12)
            .into_iter()
            .map(|a| a.source)
            .collect();
        assert_eq!(sources, vec!["10.0.0.10".to_string(), "10.0.0.9".to_string()]);
    }
}
