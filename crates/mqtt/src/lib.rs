pub mod config;
pub mod client;
pub mod failover;
pub mod publisher;
pub mod store;

pub use config::{BrokerEndpoint, BrokerTransport, ConfigError, MqttConfig};
pub use client::{ConnectionStatus, LinkState, MqttEvent, MqttService};
pub use failover::{Failover, FailoverPolicy, SessionProfile};
pub use publisher::{CommandError, CommandLink, CommandPublisher, ResetIndicator, ResetStatus};
pub use store::StateStore;
