//! Origin classification and the PIN gate in front of the controls.
//!
//! This is a UI deterrent, not a security boundary. The PIN is a plain string
//! compare with no lockout, and unlimited retries are allowed.

use serde::Serialize;
use thiserror::Error;

/// Hostnames treated as the appliance's own network.
pub const LOCAL_HOSTS: [&str; 3] = ["localhost", "127.0.0.1", "192.168.0.100"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OriginClass {
    Local,
    Public,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AccessError {
    #[error("invalid PIN")]
    InvalidPin,
}

pub fn classify_origin(hostname: &str) -> OriginClass {
    let host = strip_port(hostname.trim());
    if LOCAL_HOSTS.iter().any(|h| h.eq_ignore_ascii_case(host)) {
        OriginClass::Local
    } else {
        OriginClass::Public
    }
}

fn strip_port(host: &str) -> &str {
    // Bracketed IPv6 is never in the allow-list, so only the simple host:port form matters.
    match host.rsplit_once(':') {
        Some((name, port)) if !name.contains(':') && port.chars().all(|c| c.is_ascii_digit()) => name,
        _ => host,
    }
}

pub fn check_pin(candidate: &str, configured: &str) -> bool {
    candidate == configured
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AccessGate {
    is_restricted_origin: bool,
    is_unlocked: bool,
}

impl AccessGate {
    pub fn for_origin(origin: OriginClass) -> Self {
        let restricted = origin == OriginClass::Public;
        Self { is_restricted_origin: restricted, is_unlocked: !restricted }
    }

    pub fn is_restricted_origin(&self) -> bool {
        self.is_restricted_origin
    }

    pub fn is_unlocked(&self) -> bool {
        self.is_unlocked
    }

    pub fn controls_reachable(&self) -> bool {
        !self.is_restricted_origin || self.is_unlocked
    }

    /// Unlocks on an exact match. A wrong PIN leaves the flag as it was.
    pub fn try_unlock(&mut self, candidate: &str, configured: &str) -> Result<(), AccessError> {
        if check_pin(candidate, configured) {
            self.is_unlocked = true;
            Ok(())
        } else {
            Err(AccessError::InvalidPin)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lan_addresses_are_local() {
        assert_eq!(classify_origin("192.168.0.100"), OriginClass::Local);
        assert_eq!(classify_origin("localhost"), OriginClass::Local);
        assert_eq!(classify_origin("LOCALHOST:3000"), OriginClass::Local);
        assert_eq!(classify_origin("127.0.0.1:8080"), OriginClass::Local);
    }

    #[test]
    fn everything_else_is_public() {
        assert_eq!(classify_origin("awg03.qbyte.web.id"), OriginClass::Public);
        assert_eq!(classify_origin("192.168.0.101"), OriginClass::Public);
        assert_eq!(classify_origin("[::1]:8080"), OriginClass::Public);
        assert_eq!(classify_origin(""), OriginClass::Public);
    }

    #[test]
    fn pin_is_plain_equality() {
        assert!(check_pin("123456", "123456"));
        assert!(!check_pin("000000", "123456"));
        assert!(!check_pin("12345", "123456"));
    }

    #[test]
    fn local_origin_starts_unlocked() {
        let gate = AccessGate::for_origin(classify_origin("192.168.0.100"));
        assert!(!gate.is_restricted_origin());
        assert!(gate.is_unlocked());
        assert!(gate.controls_reachable());
    }

    #[test]
    fn wrong_pin_keeps_gate_locked() {
        let mut gate = AccessGate::for_origin(OriginClass::Public);
        assert!(!gate.controls_reachable());
        assert_eq!(gate.try_unlock("000000", "123456"), Err(AccessError::InvalidPin));
        assert!(!gate.is_unlocked());
        assert_eq!(gate.try_unlock("123456", "123456"), Ok(()));
        assert!(gate.is_unlocked());
        // never relocks on a later miss
        assert!(gate.try_unlock("999999", "123456").is_err());
        assert!(gate.is_unlocked());
    }
}
