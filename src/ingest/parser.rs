//! Field extraction for received syslog lines.
//!
//! Pulls the username out of sshd "Failed password" lines and the destination
//! port out of either a generic "port N" phrase or a firewall `DPT=N` token.
//! Nothing here rejects a line: unmatched fields are `None`.
//!
//! Copyright (c) 2026 CIPS Corps. All rights reserved.

use regex::Regex;
use std::sync::LazyLock;

/// "Failed password for [invalid user] <user>"
static RE_FAILED_LOGIN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)failed password for (?:invalid user )?([A-Za-z0-9_\-.$]+)").expect("regex")
});

/// "... port 22 ..." (sshd, generic daemons)
static RE_PORT_GENERIC: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bport\s+(\d{1,5})\b").expect("regex"));

/// "... DPT=3306 ..." (iptables / ufw)
static RE_PORT_FIREWALL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bDPT=(\d{1,5})\b").expect("regex"));

/// Structured fields pulled out of one message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractedFields {
    pub username: Option<String>,
    pub port: Option<String>,
}

pub fn extract_fields(message: &str) -> ExtractedFields {
    ExtractedFields {
        username: extract_username(message),
        port: extract_port(message),
    }
}

pub fn extract_username(message: &str) -> Option<String> {
    RE_FAILED_LOGIN
        .captures(message)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

/// Generic "port N" wins over `DPT=N` when both appear.
pub fn extract_port(message: &str) -> Option<String> {
    RE_PORT_GENERIC
        .captures(message)
        .or_else(|| RE_PORT_FIREWALL.captures(message))
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sshd_failed_password() {
        let f = extract_fields(
            "<38>Jan 15 10:30:00 host sshd[123]: Failed password for admin from 10.0.0.50 port 51122 ssh2",
        );
        assert_eq!(f.username.as_deref(), Some("admin"));
        assert_eq!(f.port.as_deref(), Some("51122"));
    }

    #[test]
    fn test_invalid_user_prefix_is_skipped() {
        let f = extract_fields("Failed password for invalid user oracle from 1.2.3.4 port 22 ssh2");
        assert_eq!(f.username.as_deref(), Some("oracle"));
    }

    #[test]
    fn test_username_match_is_case_insensitive() {
        assert_eq!(
            extract_username("FAILED PASSWORD FOR Root from 1.2.3.4").as_deref(),
            Some("Root")
        );
    }

    #[test]
    fn test_username_charset() {
        assert_eq!(
            extract_username("Failed password for svc.backup$ from 1.2.3.4").as_deref(),
            Some("svc.backup$")
        );
    }

    #[test]
    fn test_firewall_dpt() {
        let f = extract_fields("[UFW BLOCK] IN=eth0 SRC=45.33.22.11 DST=10.0.0.1 PROTO=TCP DPT=3306");
        assert_eq!(f.username, None);
        assert_eq!(f.port.as_deref(), Some("3306"));
    }

    #[test]
    fn test_generic_port_preferred_over_dpt() {
        assert_eq!(extract_port("DPT=80 then port 443").as_deref(), Some("443"));
    }

    #[test]
    fn test_lowercase_dpt_is_not_a_port() {
        assert_eq!(extract_port("dpt=80"), None);
    }

    #[test]
    fn test_port_longer_than_five_digits_is_ignored() {
        assert_eq!(extract_port("port 123456"), None);
    }

    #[test]
    fn test_unmatched_line_yields_nothing() {
        assert_eq!(extract_fields("systemd[1]: Started some service."), ExtractedFields::default());
        assert_eq!(extract_fields(""), ExtractedFields::default());
    }
}
