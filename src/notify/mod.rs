//! # Notification Fan-out
//!
//! Copyright (c) 2026 CIPS Corps. All rights reserved.
//!
//! Delivers the alerts a detection run newly inserted. Channels run in a
//! fixed order (log file, JSON export, mail, webhook) and each is attempted
//! regardless of how the others fared: a dead SMTP relay never stops the
//! webhook, and a full disk never stops the mail.
//!
//! An empty batch short-circuits every channel. Nothing is written, sent or
//! posted when a run found nothing new.

pub mod alerter;
pub mod mailer;
pub mod webhook;

use std::fmt;
use std::time::Duration;

use crate::{Alert, NmasConfig, NmasResult};

/// What happened on one channel during one dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelStatus {
    /// Disabled in config, or nothing to deliver.
    Skipped,
    /// Number of alerts covered.
    Delivered(usize),
    Failed(String),
}

impl ChannelStatus {
    fn from_result(channel: &str, result: NmasResult<usize>) -> Self {
        match result {
            Ok(0) => ChannelStatus::Skipped,
            Ok(n) => ChannelStatus::Delivered(n),
            Err(e) => {
                log::error!("[NOTIFY] {} channel failed: {}", channel, e);
                ChannelStatus::Failed(e.to_string())
            }
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, ChannelStatus::Failed(_))
    }
}

impl fmt::Display for ChannelStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelStatus::Skipped => write!(f, "skipped"),
            ChannelStatus::Delivered(n) => write!(f, "delivered {}", n),
            ChannelStatus::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}

/// Per-channel outcome of one dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReport {
    pub log: ChannelStatus,
    pub export: ChannelStatus,
    pub email: ChannelStatus,
    pub webhook: ChannelStatus,
}

impl DeliveryReport {
    fn skipped() -> Self {
        Self {
            log: ChannelStatus::Skipped,
            export: ChannelStatus::Skipped,
            email: ChannelStatus::Skipped,
            webhook: ChannelStatus::Skipped,
        }
    }

    pub fn any_failed(&self) -> bool {
        [&self.log, &self.export, &self.email, &self.webhook]
            .iter()
            .any(|s| s.is_failed())
    }
}

impl fmt::Display for DeliveryReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "log: {}, export: {}, email: {}, webhook: {}",
            self.log, self.export, self.email, self.webhook
        )
    }
}

/// Routes alert batches to the channels enabled in config.
pub struct Notifier {
    config: NmasConfig,
}

impl Notifier {
    pub fn new(config: &NmasConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    /// Deliver `alerts` on every enabled channel. Never fails as a whole;
    /// channel errors are logged and reported in the returned report.
    pub fn dispatch(&self, alerts: &[Alert]) -> DeliveryReport {
        if alerts.is_empty() {
            return DeliveryReport::skipped();
        }

        let (log, export) = if self.config.logging.enabled {
            (
                ChannelStatus::from_result(
                    "log",
                    alerter::log_alerts(&self.config.alert_log_path(), alerts),
                ),
                ChannelStatus::from_result(
                    "export",
                    alerter::export_json(&self.config.alert_json_path(), alerts),
                ),
            )
        } else {
            (ChannelStatus::Skipped, ChannelStatus::Skipped)
        };

        let email = if self.config.email.enabled {
            ChannelStatus::from_result("email", mailer::send_email(&self.config.email, alerts))
        } else {
            ChannelStatus::Skipped
        };

        let hook = &self.config.webhook;
        let webhook = match (hook.enabled, hook.url.as_deref()) {
            (true, Some(url)) => ChannelStatus::from_result(
                "webhook",
                webhook::post_webhook(url, Duration::from_secs(hook.timeout_secs), alerts),
            ),
            (true, None) => {
                log::warn!("[NOTIFY] Webhook enabled but no url configured, skipping");
                ChannelStatus::Skipped
            }
            (false, _) => ChannelStatus::Skipped,
        };

        let report = DeliveryReport {
            log,
            export,
            email,
            webhook,
        };
        log::info!("[NOTIFY] {} alert(s): {}", alerts.len(), report);
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{now_utc, AlertType};

    fn alert() -> Alert {
        let now = now_utc();
        Alert {
            id: Some(1),
            ts: now,
            alert_type: AlertType::FailedLoginBurst,
            source: "10.0.0.50".into(),
            username: Some("admin".into()),
            window_start: now - chrono::Duration::seconds(180),
            window_end: now,
            count: 5,
            details: "5 failed logins for user=admin within 180s".into(),
        }
    }

    fn config_in(dir: &std::path::Path) -> NmasConfig {
        let mut config = NmasConfig::default();
        config.general.data_dir = dir.to_path_buf();
        config
    }

    #[test]
    fn test_empty_batch_skips_everything() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config_in(dir.path());
        config.email.enabled = true;
        config.webhook.enabled = true;
        config.webhook.url = Some("http://127.0.0.1:1/hook".into());

        let report = Notifier::new(&config).dispatch(&[]);
        assert_eq!(report, DeliveryReport::skipped());
        assert!(!dir.path().join("alerts.log").exists());
    }

    #[test]
    fn test_default_config_writes_local_files_only() {
        let dir = tempfile::tempdir().unwrap();
        let report = Notifier::new(&config_in(dir.path())).dispatch(&[alert()]);

        assert_eq!(report.log, ChannelStatus::Delivered(1));
        assert_eq!(report.export, ChannelStatus::Delivered(1));
        assert_eq!(report.email, ChannelStatus::Skipped);
        assert_eq!(report.webhook, ChannelStatus::Skipped);
        assert!(!report.any_failed());
    }

    #[test]
    fn test_logging_disabled_gates_both_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config_in(dir.path());
        config.logging.enabled = false;

        let report = Notifier::new(&config).dispatch(&[alert()]);
        assert_eq!(report.log, ChannelStatus::Skipped);
        assert_eq!(report.export, ChannelStatus::Skipped);
        assert!(!dir.path().join("alerts.log").exists());
        assert!(!dir.path().join("alerts.json").exists());
    }

    #[test]
    fn test_failing_channels_do_not_block_others() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config_in(dir.path());
        config.email.enabled = true;
        config.email.host = "127.0.0.1".into();
        config.email.port = 1;
        config.email.timeout_secs = 1;
        config.webhook.enabled = true;
        config.webhook.url = Some("ftp://not-http".into());

        let report = Notifier::new(&config).dispatch(&[alert()]);
        assert!(report.email.is_failed());
        assert!(report.webhook.is_failed());
        assert_eq!(report.log, ChannelStatus::Delivered(1));
        assert_eq!(report.export, ChannelStatus::Delivered(1));
        assert!(report.any_failed());
    }

    #[test]
    fn test_webhook_without_url_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config_in(dir.path());
        config.webhook.enabled = true;
        config.webhook.url = None;

        let report = Notifier::new(&config).dispatch(&[alert()]);
        assert_eq!(report.webhook, ChannelStatus::Skipped);
    }
}
