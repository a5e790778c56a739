//! # Webhook Channel
//!
//! POSTs one `{"text": "<line>\n<line>..."}` payload per run via `ureq`.
//! The shape is understood by Slack and Discord incoming webhooks and by
//! most generic HTTP receivers.

use std::time::Duration;

use crate::{Alert, NmasError, NmasResult};

/// `{"text": <summary lines joined by newline>}`
pub fn payload_for(alerts: &[Alert]) -> serde_json::Value {
    let text = alerts
        .iter()
        .map(Alert::summary_line)
        .collect::<Vec<_>>()
        .join("\n");
    serde_json::json!({ "text": text })
}

/// POST the summary for `alerts` to `url`. Returns the number of alerts covered.
pub fn post_webhook(url: &str, timeout: Duration, alerts: &[Alert]) -> NmasResult<usize> {
    if alerts.is_empty() {
        return Ok(0);
    }

    if !url.starts_with("https://") && !url.starts_with("http://") {
        return Err(NmasError::Notify(format!(
            "Webhook URL must start with http:// or https://, got: {}",
            url
        )));
    }

    let body = serde_json::to_string(&payload_for(alerts))?;
    let agent = ureq::AgentBuilder::new().timeout(timeout).build();
    let response = agent
        .post(url)
        .set("Content-Type", "application/json")
        .send_string(&body)
        .map_err(|e| NmasError::Notify(format!("POST to {} failed: {}", url, e)))?;

    log::info!(
        "[WEBHOOK] POST to {} succeeded (status {}): {} alert(s)",
        url,
        response.status(),
        alerts.len(),
    );
    Ok(alerts.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{now_utc, AlertType};

    fn scan_alert() -> Alert {
        let now = now_utc();
        Alert {
            id: Some(3),
            ts: now,
            alert_type: AlertType::PortScan,
            source: "10.0.0.99".into(),
            username: None,
            window_start: now - chrono::Duration::seconds(60),
            window_end: now,
            count: 12,
            details: "12 distinct destination ports within 60s".into(),
        }
    }

    #[test]
    fn test_payload_is_text_object() {
        let a = scan_alert();
        let payload = payload_for(&[a.clone(), a.clone()]);
        let text = payload["text"].as_str().unwrap();
        assert_eq!(text, format!("{}\n{}", a.summary_line(), a.summary_line()));
        assert_eq!(payload.as_object().unwrap().len(), 1);
    }

    #[test]
    fn test_rejects_bad_scheme() {
        let t = Duration::from_secs(1);
        assert!(post_webhook("ftp://bad.example.com", t, &[scan_alert()]).is_err());
        assert!(post_webhook("not-a-url", t, &[scan_alert()]).is_err());
    }

    #[test]
    fn test_empty_batch_skips_validation_and_network() {
        assert_eq!(post_webhook("not-a-url", Duration::from_secs(1), &[]).unwrap(), 0);
    }

    #[test]
    fn test_unreachable_endpoint_is_an_error() {
        let result = post_webhook("http://127.0.0.1:1/hook", Duration::from_secs(1), &[scan_alert()]);
        assert!(matches!(result, Err(NmasError::Notify(_))));
    }
}
