use hostname::get as get_hostname;
use std::env;
use std::fmt;
use std::time::Duration;

use thiserror::Error;
use url::Url;

pub const DEFAULT_PRIMARY_BROKER: &str = "ws://192.168.0.101:9001";
pub const DEFAULT_FALLBACK_BROKER: &str = "wss://ws-awg03.qbyte.web.id";
pub const DEFAULT_POWER_BROKERS: &str = "ws://192.168.1.100:9001,ws://localhost:9001";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid broker url {url:?}: {reason}")]
    InvalidBrokerUrl { url: String, reason: String },
    #[error("no broker configured for the {0} session")]
    NoBrokers(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerTransport {
    Tcp,
    Tls,
    Ws,
    Wss,
}

/// One candidate broker. Selection order is configuration, never derived.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerEndpoint {
    url: Url,
    label: String,
    transport: BrokerTransport,
    port: u16,
}

impl BrokerEndpoint {
    pub fn parse(raw: &str, label: impl Into<String>) -> Result<Self, ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidBrokerUrl { url: raw.to_string(), reason };
        let url = Url::parse(raw.trim()).map_err(|e| invalid(e.to_string()))?;
        let (transport, default_port) = match url.scheme() {
            "ws" => (BrokerTransport::Ws, 80),
            "wss" => (BrokerTransport::Wss, 443),
            "mqtt" | "tcp" => (BrokerTransport::Tcp, 1883),
            "mqtts" | "ssl" => (BrokerTransport::Tls, 8883),
            other => return Err(invalid(format!("unsupported scheme {other}"))),
        };
        if url.host_str().map_or(true, str::is_empty) {
            return Err(invalid("missing host".to_string()));
        }
        let port = url.port().unwrap_or(default_port);
        Ok(Self { url, label: label.into(), transport, port })
    }

    pub fn url(&self) -> &str {
        self.url.as_str()
    }

    pub fn host(&self) -> &str {
        self.url.host_str().unwrap_or_default()
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn transport(&self) -> BrokerTransport {
        self.transport
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

impl fmt::Display for BrokerEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.label, self.url)
    }
}

#[derive(Debug, Clone)]
pub struct MqttConfig {
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub keep_alive_secs: u16,
    pub clean_session: bool,
    pub connect_timeout: Duration,
    pub reconnect_delay: Duration,
    pub primary_broker: String,
    pub fallback_broker: String,
    pub power_brokers: Vec<String>,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            client_id: default_client_id(),
            username: None,
            password: None,
            keep_alive_secs: 30,
            clean_session: true,
            connect_timeout: Duration::from_millis(5000),
            reconnect_delay: Duration::from_millis(2000),
            primary_broker: DEFAULT_PRIMARY_BROKER.to_string(),
            fallback_broker: DEFAULT_FALLBACK_BROKER.to_string(),
            power_brokers: split_list(DEFAULT_POWER_BROKERS),
        }
    }
}

impl MqttConfig {
    /// Read once at startup; the broker list is validated here so a bad URL
    /// fails the process instead of the first connect.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(|key| env::var(key).ok())
    }

    pub fn from_vars<F>(var: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = MqttConfig::default();
        let non_empty = |key: &str| var(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = non_empty("AWG_BROKER_URL") {
            cfg.primary_broker = v;
        }
        if let Some(v) = non_empty("AWG_BROKER2_URL") {
            cfg.fallback_broker = v;
        }
        if let Some(v) = non_empty("AWG_POWER_BROKERS") {
            cfg.power_brokers = split_list(&v);
        }
        if let Some(v) = non_empty("MQTT_CLIENT_ID") {
            cfg.client_id = v;
        }
        if let Some(v) = non_empty("MQTT_USERNAME") {
            cfg.username = Some(v);
        }
        if let Some(v) = non_empty("MQTT_PASSWORD") {
            cfg.password = Some(v);
        }
        if let Some(s) = non_empty("MQTT_KEEP_ALIVE_SECS").and_then(|v| v.parse::<u16>().ok()) {
            cfg.keep_alive_secs = s;
        }
        if let Some(ms) = non_empty("MQTT_CONNECT_TIMEOUT_MS").and_then(|v| v.parse::<u64>().ok()) {
            cfg.connect_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = non_empty("MQTT_RECONNECT_DELAY_MS").and_then(|v| v.parse::<u64>().ok()) {
            cfg.reconnect_delay = Duration::from_millis(ms);
        }

        cfg.primary_endpoint()?;
        cfg.fallback_endpoint()?;
        cfg.power_endpoints()?;
        Ok(cfg)
    }

    pub fn primary_endpoint(&self) -> Result<BrokerEndpoint, ConfigError> {
        BrokerEndpoint::parse(&self.primary_broker, "Primary broker")
    }

    pub fn fallback_endpoint(&self) -> Result<BrokerEndpoint, ConfigError> {
        BrokerEndpoint::parse(&self.fallback_broker, "Fallback broker")
    }

    pub fn power_endpoints(&self) -> Result<Vec<BrokerEndpoint>, ConfigError> {
        if self.power_brokers.is_empty() {
            return Err(ConfigError::NoBrokers("power"));
        }
        self.power_brokers
            .iter()
            .enumerate()
            .map(|(i, url)| BrokerEndpoint::parse(url, format!("Power broker {}", i + 1)))
            .collect()
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn default_client_id() -> String {
    let host = get_hostname()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown-host".to_string());
    let pid = std::process::id();
    format!("awg-{}-{}", host, pid)
}
