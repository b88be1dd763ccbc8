use std::env;
use std::net::SocketAddr;

use anyhow::Context;
use awg_core::{classify_origin, OriginClass};
use serde::Serialize;

pub const DEFAULT_PIN: &str = "123456";

const UNSET: &str = "-";
const MASK: &str = "******";

/// Informational values shown on the info page. Credentials only leave the
/// server unmasked after a PIN check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SiteInfo {
    pub ssid: String,
    pub wifi_password: String,
    pub router_ip: String,
    pub router_password: String,
    pub server_ip: String,
    pub server_user: String,
    pub server_password: String,
    pub domain: String,
    pub primary_broker: String,
    pub fallback_broker: String,
}

impl SiteInfo {
    pub fn masked(&self) -> Self {
        Self {
            wifi_password: MASK.to_string(),
            router_password: MASK.to_string(),
            server_password: MASK.to_string(),
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone)]
pub struct SiteConfig {
    pub pin: String,
    pub origin_host: String,
    pub http_addr: SocketAddr,
    pub app_dir: String,
    pub info: SiteInfo,
}

impl SiteConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_vars(|key| env::var(key).ok())
    }

    pub fn from_vars<F>(var: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| var(key).filter(|v| !v.trim().is_empty());
        let http_addr = non_empty("AWG_HTTP_ADDR")
            .unwrap_or_else(|| "0.0.0.0:8080".to_string())
            .parse()
            .context("Invalid AWG_HTTP_ADDR")?;
        let shown = |key: &str| non_empty(key).unwrap_or_else(|| UNSET.to_string());
        let secret = |key: &str| non_empty(key).unwrap_or_else(|| MASK.to_string());
        let default_app_dir = concat!(env!("CARGO_MANIFEST_DIR"), "/../../apps/dashboard/dist");

        Ok(Self {
            pin: non_empty("AWG_INFO_PIN").unwrap_or_else(|| DEFAULT_PIN.to_string()),
            origin_host: non_empty("AWG_ORIGIN_HOST").unwrap_or_else(|| "localhost".to_string()),
            http_addr,
            app_dir: non_empty("AWG_APP_DIR").unwrap_or_else(|| default_app_dir.to_string()),
            info: SiteInfo {
                ssid: shown("AWG_SSID"),
                wifi_password: secret("AWG_WIFI_PASS"),
                router_ip: shown("AWG_IP_ROUTER"),
                router_password: secret("AWG_PASS_ROUTER"),
                server_ip: shown("AWG_IP_SERVER"),
                server_user: shown("AWG_USER"),
                server_password: secret("AWG_PASS_UBUNTU"),
                domain: shown("AWG_DOMAIN"),
                primary_broker: shown("AWG_BROKER_URL"),
                fallback_broker: shown("AWG_BROKER2_URL"),
            },
        })
    }

    // Fixed for the lifetime of the process.
    pub fn origin(&self) -> OriginClass {
        classify_origin(&self.origin_host)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = SiteConfig::from_vars(|_| None).unwrap();
        assert_eq!(cfg.pin, DEFAULT_PIN);
        assert_eq!(cfg.origin(), OriginClass::Local);
        assert_eq!(cfg.http_addr.port(), 8080);
        assert_eq!(cfg.info.domain, "-");
        assert_eq!(cfg.info.wifi_password, "******");
    }

    #[test]
    fn public_origin_and_info() {
        let cfg = SiteConfig::from_vars(|key| match key {
            "AWG_ORIGIN_HOST" => Some("awg03.qbyte.web.id".to_string()),
            "AWG_PASS_ROUTER" => Some("secret".to_string()),
            "AWG_IP_ROUTER" => Some("192.168.0.1".to_string()),
            _ => None,
        })
        .unwrap();
        assert_eq!(cfg.origin(), OriginClass::Public);
        assert_eq!(cfg.info.router_password, "secret");
        let masked = cfg.info.masked();
        assert_eq!(masked.router_ip, "192.168.0.1");
        assert_eq!(masked.router_password, "******");
    }

    #[test]
    fn bad_listen_address_fails() {
        assert!(SiteConfig::from_vars(|key| (key == "AWG_HTTP_ADDR").then(|| "nope".to_string())).is_err());
    }
}
