use awg_core::{topics, OriginClass};

use crate::config::{BrokerEndpoint, ConfigError, MqttConfig};

pub const POWER_ATTEMPTS_PER_BROKER: u32 = 3;
// Dashboard on a local origin moves to the fallback after the first failure.
pub const DASHBOARD_ATTEMPTS_PER_BROKER: u32 = 1;

/// Which of the two connection flavours a session runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionProfile {
    Dashboard { origin: OriginClass },
    PowerMonitor,
}

impl SessionProfile {
    pub fn name(&self) -> &'static str {
        match self {
            SessionProfile::Dashboard { .. } => "dashboard",
            SessionProfile::PowerMonitor => "power",
        }
    }

    pub fn topics(&self) -> Vec<&'static str> {
        match self {
            SessionProfile::Dashboard { .. } => topics::DASHBOARD_SUBSCRIPTIONS.to_vec(),
            SessionProfile::PowerMonitor => vec![topics::power_wildcard_all()],
        }
    }

    /// Local origins try the primary broker and fall back; public origins never
    /// touch the primary.
    pub fn failover_policy(&self, config: &MqttConfig) -> Result<FailoverPolicy, ConfigError> {
        let policy = match self {
            SessionProfile::Dashboard { origin: OriginClass::Local } => FailoverPolicy::new(
                vec![config.primary_endpoint()?, config.fallback_endpoint()?],
                DASHBOARD_ATTEMPTS_PER_BROKER,
            ),
            SessionProfile::Dashboard { origin: OriginClass::Public } => {
                let cloud = BrokerEndpoint::parse(&config.fallback_broker, "Cloud broker")?;
                FailoverPolicy::new(vec![cloud], DASHBOARD_ATTEMPTS_PER_BROKER)
            }
            SessionProfile::PowerMonitor => {
                FailoverPolicy::new(config.power_endpoints()?, POWER_ATTEMPTS_PER_BROKER)
            }
        };
        policy.ok_or(ConfigError::NoBrokers(self.name()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failover {
    /// Stay on the same broker; `attempt` failures so far.
    Retry { attempt: u32 },
    /// Threshold reached; moved on to the next candidate (wrapping).
    /// `exhausted` is set once every candidate has failed since the last
    /// successful connect.
    Advance { from: usize, to: usize, exhausted: bool },
}

/// Broker rotation: bounded attempts per broker, then the next candidate in a fixed
/// order, forever.
#[derive(Debug, Clone)]
pub struct FailoverPolicy {
    endpoints: Vec<BrokerEndpoint>,
    max_attempts: u32,
    index: usize,
    attempts: u32,
    advances_since_connect: usize,
}

impl FailoverPolicy {
    pub fn new(endpoints: Vec<BrokerEndpoint>, max_attempts: u32) -> Option<Self> {
        if endpoints.is_empty() {
            return None;
        }
        Some(Self { endpoints, max_attempts: max_attempts.max(1), index: 0, attempts: 0, advances_since_connect: 0 })
    }

    pub fn current(&self) -> &BrokerEndpoint {
        &self.endpoints[self.index]
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn candidate_count(&self) -> usize {
        self.endpoints.len()
    }

    pub fn on_connected(&mut self) {
        self.attempts = 0;
        self.advances_since_connect = 0;
    }

    pub fn on_failure(&mut self) -> Failover {
        self.attempts += 1;
        if self.attempts < self.max_attempts {
            return Failover::Retry { attempt: self.attempts };
        }
        let from = self.index;
        self.index = (self.index + 1) % self.endpoints.len();
        self.attempts = 0;
        self.advances_since_connect += 1;
        Failover::Advance {
            from,
            to: self.index,
            exhausted: self.advances_since_connect >= self.endpoints.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoints(n: usize) -> Vec<BrokerEndpoint> {
        (0..n)
            .map(|i| BrokerEndpoint::parse(&format!("ws://broker-{i}:9001"), format!("b{i}")).unwrap())
            .collect()
    }

    #[test]
    fn three_failures_move_to_next_broker() {
        let mut policy = FailoverPolicy::new(endpoints(2), 3).unwrap();
        assert_eq!(policy.on_failure(), Failover::Retry { attempt: 1 });
        assert_eq!(policy.on_failure(), Failover::Retry { attempt: 2 });
        assert_eq!(policy.current().label(), "b0");
        assert_eq!(policy.on_failure(), Failover::Advance { from: 0, to: 1, exhausted: false });
        assert_eq!(policy.current().label(), "b1");
        assert_eq!(policy.attempts(), 0);
    }

    #[test]
    fn rotation_wraps_around() {
        let mut policy = FailoverPolicy::new(endpoints(2), 3).unwrap();
        for _ in 0..6 {
            policy.on_failure();
        }
        assert_eq!(policy.index(), 0);
    }

    #[test]
    fn success_resets_attempt_counter() {
        let mut policy = FailoverPolicy::new(endpoints(2), 3).unwrap();
        policy.on_failure();
        policy.on_failure();
        policy.on_connected();
        assert_eq!(policy.on_failure(), Failover::Retry { attempt: 1 });
        assert_eq!(policy.index(), 0);
    }

    #[test]
    fn empty_candidate_list_is_rejected() {
        assert!(FailoverPolicy::new(Vec::new(), 3).is_none());
    }

    #[test]
    fn local_dashboard_falls_back_after_one_failure() {
        let cfg = MqttConfig::default();
        let mut policy = SessionProfile::Dashboard { origin: OriginClass::Local }
            .failover_policy(&cfg)
            .unwrap();
        assert_eq!(policy.current().url(), "ws://192.168.0.101:9001/");
        assert_eq!(policy.on_failure(), Failover::Advance { from: 0, to: 1, exhausted: false });
        assert_eq!(policy.current().url(), "wss://ws-awg03.qbyte.web.id/");
    }

    #[test]
    fn drop_on_working_fallback_is_not_exhaustion() {
        let mut policy = FailoverPolicy::new(endpoints(2), 1).unwrap();
        assert_eq!(policy.on_failure(), Failover::Advance { from: 0, to: 1, exhausted: false });
        policy.on_connected();

        // fallback session drops: only one broker has failed since it connected
        assert_eq!(policy.on_failure(), Failover::Advance { from: 1, to: 0, exhausted: false });
        // primary fails too: now every candidate has
        assert_eq!(policy.on_failure(), Failover::Advance { from: 0, to: 1, exhausted: true });
    }

    #[test]
    fn full_cycle_without_connect_is_exhaustion() {
        let mut policy = FailoverPolicy::new(endpoints(2), 3).unwrap();
        let advances: Vec<Failover> = (0..6)
            .map(|_| policy.on_failure())
            .filter(|f| matches!(f, Failover::Advance { .. }))
            .collect();
        assert_eq!(
            advances,
            vec![
                Failover::Advance { from: 0, to: 1, exhausted: false },
                Failover::Advance { from: 1, to: 0, exhausted: true },
            ]
        );
    }

    #[test]
    fn public_dashboard_never_tries_primary() {
        let cfg = MqttConfig::default();
        let mut policy = SessionProfile::Dashboard { origin: OriginClass::Public }
            .failover_policy(&cfg)
            .unwrap();
        assert_eq!(policy.candidate_count(), 1);
        for _ in 0..5 {
            policy.on_failure();
            assert_eq!(policy.current().url(), "wss://ws-awg03.qbyte.web.id/");
        }
    }

    #[test]
    fn power_monitor_subscribes_to_wildcard() {
        assert_eq!(SessionProfile::PowerMonitor.topics(), vec!["pzem004t/#"]);
        assert_eq!(SessionProfile::Dashboard { origin: OriginClass::Local }.topics().len(), 13);
    }
}
