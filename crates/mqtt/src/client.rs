use std::sync::{Arc, atomic::{AtomicBool, Ordering}};
use std::time::Duration;

use awg_core::{try_decode, ApplicationState, OriginClass, OutboundMessage};
use chrono::Utc;
use rumqttc::{
    AsyncClient, ClientError, ConnectionError, Event, EventLoop, Incoming, MqttOptions, Outgoing, QoS,
    SubscribeFilter, Transport,
};
use serde::Serialize;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, trace, warn};

use crate::config::{BrokerEndpoint, BrokerTransport, ConfigError, MqttConfig};
use crate::failover::{Failover, FailoverPolicy, SessionProfile};
use crate::publisher::{CommandError, CommandLink};
use crate::store::StateStore;

#[derive(Debug, Clone)]
pub enum MqttEvent {
    Connected,
    Disconnected,
    Publish { topic: String, payload: Vec<u8> },
    PubAck(u16),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkState {
    Connecting,
    Connected,
    Reconnecting,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionStatus {
    pub state: LinkState,
    pub broker: String,
    pub broker_index: usize,
    pub attempt: u32,
    pub message: String,
}

impl ConnectionStatus {
    fn new(profile: SessionProfile, state: LinkState, policy: &FailoverPolicy) -> Self {
        Self {
            state,
            broker: policy.current().label().to_string(),
            broker_index: policy.index(),
            attempt: policy.attempts(),
            message: status_message(profile, state, policy.index()).to_string(),
        }
    }
}

fn status_message(profile: SessionProfile, state: LinkState, broker_index: usize) -> &'static str {
    use SessionProfile::{Dashboard, PowerMonitor};
    match (state, profile) {
        (LinkState::Connecting, _) => "Connecting...",
        (LinkState::Connected, Dashboard { origin: OriginClass::Public }) => "Connected to cloud server",
        (LinkState::Connected, Dashboard { .. }) if broker_index > 0 => "Connected to fallback broker",
        (LinkState::Connected, Dashboard { .. }) => "Connected to broker",
        (LinkState::Connected, PowerMonitor) => "Connected to MQTT",
        (LinkState::Reconnecting, Dashboard { origin: OriginClass::Local }) if broker_index > 0 => {
            "Trying fallback broker..."
        }
        (LinkState::Reconnecting, _) => "Reconnecting...",
        (LinkState::Failed, _) => "Failed to connect to server",
    }
}

/// Owns one broker session at a time and keeps it alive across failures.
#[derive(Clone)]
pub struct MqttService {
    profile: SessionProfile,
    client: Arc<Mutex<Option<AsyncClient>>>,
    ready: Arc<AtomicBool>,
    events_tx: broadcast::Sender<MqttEvent>,
    status_rx: watch::Receiver<ConnectionStatus>,
    store: StateStore,
    shutdown_tx: Arc<watch::Sender<bool>>,
    loop_handle: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl MqttService {
    pub async fn connect(config: MqttConfig, profile: SessionProfile) -> Result<Self, ConfigError> {
        let policy = profile.failover_policy(&config)?;
        let store = StateStore::new();
        let ready = Arc::new(AtomicBool::new(false));
        let (events_tx, _) = broadcast::channel(256);
        let client = Arc::new(Mutex::new(None));
        let (status_tx, status_rx) =
            watch::channel(ConnectionStatus::new(profile, LinkState::Connecting, &policy));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let session = Session {
            client_id: format!("{}-{}", config.client_id, profile.name()),
            config,
            profile,
            policy,
            client: client.clone(),
            ready: ready.clone(),
            events_tx: events_tx.clone(),
            status_tx,
            store: store.clone(),
        };
        let loop_handle = tokio::spawn(session.run(shutdown_rx));

        Ok(Self {
            profile,
            client,
            ready,
            events_tx,
            status_rx,
            store,
            shutdown_tx: Arc::new(shutdown_tx),
            loop_handle: Arc::new(Mutex::new(Some(loop_handle))),
        })
    }

    pub fn profile(&self) -> SessionProfile {
        self.profile
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Relaxed)
    }

    pub fn events(&self) -> broadcast::Receiver<MqttEvent> {
        self.events_tx.subscribe()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status_rx.borrow().clone()
    }

    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status_rx.clone()
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn state(&self) -> ApplicationState {
        self.store.snapshot()
    }

    /// Re-sends the whole subscription set on the live session.
    pub async fn resubscribe(&self) -> Result<(), CommandError> {
        let client = self.client.lock().await;
        let client = client.as_ref().ok_or(CommandError::NotConnected)?;
        client.subscribe_many(subscriptions(self.profile)).await?;
        info!(session = self.profile.name(), "Re-subscribed topic set");
        Ok(())
    }

    /// Stops the session: disconnects a live transport, cancels any pending
    /// reconnect and freezes the state store. Safe to call more than once.
    pub async fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
        let handle = self.loop_handle.lock().await.take();
        if let Some(handle) = handle {
            if let Err(err) = handle.await {
                warn!(?err, session = self.profile.name(), "MQTT session task ended abnormally");
            }
        }
    }
}

impl CommandLink for MqttService {
    fn is_connected(&self) -> bool {
        self.is_ready()
    }

    async fn publish(&self, message: OutboundMessage) -> Result<(), CommandError> {
        let client = self.client.lock().await;
        let client = client.as_ref().ok_or(CommandError::NotConnected)?;
        client
            .publish(message.topic, QoS::AtLeastOnce, message.retain, message.payload)
            .await?;
        Ok(())
    }
}

enum SessionEnd {
    Shutdown,
    Timeout,
    Closed,
    Transport(ConnectionError),
    Subscribe(ClientError),
}

struct Session {
    client_id: String,
    config: MqttConfig,
    profile: SessionProfile,
    policy: FailoverPolicy,
    client: Arc<Mutex<Option<AsyncClient>>>,
    ready: Arc<AtomicBool>,
    events_tx: broadcast::Sender<MqttEvent>,
    status_tx: watch::Sender<ConnectionStatus>,
    store: StateStore,
}

impl Session {
    async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let name = self.profile.name();
        let mut state = LinkState::Connecting;
        loop {
            let endpoint = self.policy.current().clone();
            self.set_status(state);
            info!(session = name, broker = %endpoint, attempt = self.policy.attempts() + 1, "Connecting to MQTT broker");

            let end = self.drive(&endpoint, &mut shutdown).await;
            self.release_transport().await;
            match end {
                SessionEnd::Shutdown => break,
                SessionEnd::Timeout => {
                    warn!(session = name, broker = %endpoint, timeout_ms = self.config.connect_timeout.as_millis() as u64, "MQTT connect timed out")
                }
                SessionEnd::Closed => warn!(session = name, broker = %endpoint, "MQTT session closed by broker"),
                SessionEnd::Transport(err) => warn!(session = name, broker = %endpoint, error = %err, "MQTT transport error"),
                SessionEnd::Subscribe(err) => warn!(session = name, broker = %endpoint, error = %err, "MQTT subscribe failed"),
            }

            state = match self.policy.on_failure() {
                Failover::Retry { attempt } => {
                    debug!(session = name, attempt, "Retrying same broker");
                    LinkState::Reconnecting
                }
                Failover::Advance { exhausted, .. } => {
                    info!(session = name, from = %endpoint, to = %self.policy.current(), exhausted, "Failing over to next broker");
                    if exhausted { LinkState::Failed } else { LinkState::Reconnecting }
                }
            };
            self.set_status(state);

            tokio::select! {
                _ = wait_shutdown(&mut shutdown) => break,
                _ = sleep(self.config.reconnect_delay) => {}
            }
            if state == LinkState::Failed {
                state = LinkState::Reconnecting;
            }
        }
        self.store.close();
        info!(session = name, "MQTT session stopped");
    }

    async fn drive(&mut self, endpoint: &BrokerEndpoint, shutdown: &mut watch::Receiver<bool>) -> SessionEnd {
        let (client, mut eventloop) = build_client(&self.config, &self.client_id, endpoint);

        let connect = timeout(self.config.connect_timeout, wait_for_connack(&mut eventloop));
        tokio::select! {
            _ = wait_shutdown(shutdown) => return SessionEnd::Shutdown,
            connected = connect => match connected {
                Err(_) => return SessionEnd::Timeout,
                Ok(Err(err)) => return SessionEnd::Transport(err),
                Ok(Ok(())) => {}
            },
        }

        self.on_connected(&client, endpoint).await;
        // Fresh transport sessions carry no subscriptions; register the full set every time.
        if let Err(err) = client.subscribe_many(subscriptions(self.profile)).await {
            return SessionEnd::Subscribe(err);
        }

        loop {
            tokio::select! {
                _ = wait_shutdown(shutdown) => {
                    disconnect(&client, &mut eventloop).await;
                    return SessionEnd::Shutdown;
                }
                event = eventloop.poll() => match event {
                    Ok(Event::Incoming(Incoming::Publish(p))) => self.on_publish(&p.topic, &p.payload),
                    Ok(Event::Incoming(Incoming::PubAck(ack))) => {
                        let _ = self.events_tx.send(MqttEvent::PubAck(ack.pkid));
                    }
                    Ok(Event::Incoming(Incoming::SubAck(ack))) => {
                        debug!(session = self.profile.name(), codes = ?ack.return_codes, "Subscriptions acknowledged");
                    }
                    Ok(Event::Incoming(Incoming::Disconnect)) => return SessionEnd::Closed,
                    Ok(other) => trace!(?other, "MQTT event"),
                    Err(err) => return SessionEnd::Transport(err),
                }
            }
        }
    }

    async fn on_connected(&mut self, client: &AsyncClient, endpoint: &BrokerEndpoint) {
        self.policy.on_connected();
        *self.client.lock().await = Some(client.clone());
        self.ready.store(true, Ordering::Relaxed);
        self.set_status(LinkState::Connected);
        info!(session = self.profile.name(), broker = %endpoint, "MQTT connected");
        let _ = self.events_tx.send(MqttEvent::Connected);
    }

    fn on_publish(&self, topic: &str, payload: &[u8]) {
        match try_decode(topic, payload) {
            Ok(update) => {
                self.store.apply(update, Utc::now());
            }
            Err(err) => trace!(error = %err, "Dropping message"),
        }
        let _ = self.events_tx.send(MqttEvent::Publish { topic: topic.to_string(), payload: payload.to_vec() });
    }

    async fn release_transport(&self) {
        self.client.lock().await.take();
        if self.ready.swap(false, Ordering::Relaxed) {
            let _ = self.events_tx.send(MqttEvent::Disconnected);
        }
    }

    fn set_status(&self, state: LinkState) {
        self.status_tx.send_replace(ConnectionStatus::new(self.profile, state, &self.policy));
    }
}

fn subscriptions(profile: SessionProfile) -> Vec<SubscribeFilter> {
    profile
        .topics()
        .into_iter()
        .map(|topic| SubscribeFilter::new(topic.to_string(), QoS::AtMostOnce))
        .collect()
}

fn build_client(config: &MqttConfig, client_id: &str, endpoint: &BrokerEndpoint) -> (AsyncClient, EventLoop) {
    // Websocket transports take the full URL as the broker address.
    let mut opts = match endpoint.transport() {
        BrokerTransport::Ws | BrokerTransport::Wss => MqttOptions::new(client_id, endpoint.url(), endpoint.port()),
        BrokerTransport::Tcp | BrokerTransport::Tls => MqttOptions::new(client_id, endpoint.host(), endpoint.port()),
    };
    opts.set_keep_alive(Duration::from_secs(config.keep_alive_secs as u64));
    opts.set_clean_session(config.clean_session);
    if let (Some(u), Some(p)) = (&config.username, &config.password) {
        opts.set_credentials(u.clone(), p.clone());
    }
    opts.set_request_channel_capacity(64);
    match endpoint.transport() {
        BrokerTransport::Tcp => {}
        BrokerTransport::Tls => {
            opts.set_transport(Transport::tls_with_default_config());
        }
        BrokerTransport::Ws => {
            opts.set_transport(Transport::Ws);
        }
        BrokerTransport::Wss => {
            opts.set_transport(Transport::wss_with_default_config());
        }
    }
    AsyncClient::new(opts, 64)
}

async fn wait_for_connack(eventloop: &mut EventLoop) -> Result<(), ConnectionError> {
    loop {
        if let Event::Incoming(Incoming::ConnAck(_)) = eventloop.poll().await? {
            return Ok(());
        }
    }
}

async fn disconnect(client: &AsyncClient, eventloop: &mut EventLoop) {
    if let Err(err) = client.disconnect().await {
        debug!(?err, "MQTT disconnect request failed");
        return;
    }
    // Drive the loop until the DISCONNECT packet is on the wire.
    let flush = async {
        loop {
            match eventloop.poll().await {
                Ok(Event::Outgoing(Outgoing::Disconnect)) | Err(_) => break,
                Ok(_) => {}
            }
        }
    };
    let _ = timeout(Duration::from_millis(500), flush).await;
}

// Resolves once shutdown is requested or every service handle is gone.
async fn wait_shutdown(shutdown: &mut watch::Receiver<bool>) {
    while !*shutdown.borrow_and_update() {
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}
