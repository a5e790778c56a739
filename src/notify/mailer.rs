//! # Mail Channel
//!
//! One plain-text message per detection run, sent through an SMTP relay with
//! `lettre`. The subject carries the alert count and the body has one
//! `Alert::summary_line` per alert.
//!
//! The relay connection is unencrypted, which suits a local smarthost or a
//! development sink (e.g., `localhost:1025`). Connect and command timeouts
//! come from `[email].timeout_secs` so an unreachable relay cannot stall the run.

use std::time::Duration;

use lettre::message::{header::ContentType, Mailbox};
use lettre::{Message, SmtpTransport, Transport};

use crate::{Alert, EmailConfig, NmasError, NmasResult};

/// `[NMAS] <n> new alert(s)`
pub fn subject_for(alerts: &[Alert]) -> String {
    format!("[NMAS] {} new alert(s)", alerts.len())
}

pub fn body_for(alerts: &[Alert]) -> String {
    alerts
        .iter()
        .map(Alert::summary_line)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Build the summary message without sending it.
pub fn compose(config: &EmailConfig, alerts: &[Alert]) -> NmasResult<Message> {
    let from: Mailbox = config
        .sender
        .parse()
        .map_err(|e| NmasError::Notify(format!("invalid sender {:?}: {}", config.sender, e)))?;

    let mut builder = Message::builder()
        .from(from)
        .subject(subject_for(alerts))
        .header(ContentType::TEXT_PLAIN);

    if config.to.is_empty() {
        return Err(NmasError::Notify("no email recipients configured".into()));
    }
    for rcpt in &config.to {
        let to: Mailbox = rcpt
            .parse()
            .map_err(|e| NmasError::Notify(format!("invalid recipient {:?}: {}", rcpt, e)))?;
        builder = builder.to(to);
    }

    builder
        .body(body_for(alerts))
        .map_err(|e| NmasError::Notify(format!("cannot build message: {}", e)))
}

/// Send one summary message for `alerts`. Returns the number of alerts covered.
pub fn send_email(config: &EmailConfig, alerts: &[Alert]) -> NmasResult<usize> {
    if alerts.is_empty() {
        return Ok(0);
    }

    let message = compose(config, alerts)?;
    let mailer = SmtpTransport::builder_dangerous(config.host.as_str())
        .port(config.port)
        .timeout(Some(Duration::from_secs(config.timeout_secs)))
        .build();

    mailer.send(&message).map_err(|e| {
        NmasError::Notify(format!(
            "SMTP relay {}:{} rejected or unreachable: {}",
            config.host, config.port, e
        ))
    })?;

    log::info!(
        "[EMAIL] Sent summary of {} alert(s) to {}",
        alerts.len(),
        config.to.join(", "),
    );
    Ok(alerts.len())
}
