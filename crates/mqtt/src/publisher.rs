use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use awg_core::{Command, OutboundMessage, Relay};
use rumqttc::ClientError;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{watch, Mutex};
use tokio::time::{sleep_until, Instant};
use tracing::{info, warn};

use crate::store::StateStore;

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("MQTT is not connected")]
    NotConnected,
    #[error("MQTT publish failed: {0}")]
    Publish(#[from] ClientError),
}

/// Transport seam for outbound commands.
pub trait CommandLink: Send + Sync {
    fn is_connected(&self) -> bool;
    fn publish(&self, message: OutboundMessage) -> impl Future<Output = Result<(), CommandError>> + Send;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResetStatus {
    Idle,
    Resetting,
    Complete,
    NotConnected,
}

impl ResetStatus {
    pub fn label(self) -> &'static str {
        match self {
            ResetStatus::Idle => "Reset Energy",
            ResetStatus::Resetting => "Resetting...",
            ResetStatus::Complete => "Complete!",
            ResetStatus::NotConnected => "Not Connected",
        }
    }
}

const RESET_COMPLETE_AFTER: Duration = Duration::from_millis(1500);
const RESET_IDLE_AFTER: Duration = Duration::from_millis(3000);
const NOT_CONNECTED_IDLE_AFTER: Duration = Duration::from_millis(2000);

/// Transient status shown after an energy reset. Each new reset supersedes the
/// timers of the previous one.
#[derive(Clone)]
pub struct ResetIndicator {
    tx: Arc<watch::Sender<ResetStatus>>,
    generation: Arc<AtomicU64>,
}

impl Default for ResetIndicator {
    fn default() -> Self {
        Self::new()
    }
}

impl ResetIndicator {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(ResetStatus::Idle);
        Self { tx: Arc::new(tx), generation: Arc::new(AtomicU64::new(0)) }
    }

    pub fn current(&self) -> ResetStatus {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ResetStatus> {
        self.tx.subscribe()
    }

    fn show(&self, status: ResetStatus, steps: Vec<(Duration, ResetStatus)>) {
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        self.tx.send_replace(status);

        let tx = self.tx.clone();
        let current = self.generation.clone();
        let start = Instant::now();
        tokio::spawn(async move {
            for (after, next) in steps {
                sleep_until(start + after).await;
                if current.load(Ordering::Acquire) != generation {
                    return;
                }
                tx.send_replace(next);
            }
        });
    }
}

/// Emits control messages and mirrors them into local state right away.
///
/// Local state is updated optimistically: it does not wait for the device to
/// echo the status topic, so it can briefly disagree with the broker if a
/// publish is silently lost.
///
/// Relay and drain commands run one at a time, so a toggle always flips the
/// value left by the command before it.
pub struct CommandPublisher<L> {
    link: L,
    store: StateStore,
    reset: ResetIndicator,
    commands: Mutex<()>,
}

impl<L: CommandLink> CommandPublisher<L> {
    pub fn new(link: L, store: StateStore) -> Self {
        Self { link, store, reset: ResetIndicator::new(), commands: Mutex::new(()) }
    }

    pub fn reset_indicator(&self) -> &ResetIndicator {
        &self.reset
    }

    pub async fn set_relay(&self, relay: Relay, on: bool) -> Result<(), CommandError> {
        let _guard = self.commands.lock().await;
        self.send_relay(relay, on).await
    }

    /// Flips the relay relative to the local view and returns the new value.
    pub async fn toggle_relay(&self, relay: Relay) -> Result<bool, CommandError> {
        let _guard = self.commands.lock().await;
        let on = !self.store.snapshot().relay(relay);
        self.send_relay(relay, on).await?;
        Ok(on)
    }

    pub async fn set_drain_mode(&self, active: bool) -> Result<(), CommandError> {
        let _guard = self.commands.lock().await;
        self.send_drain_mode(active).await
    }

    pub async fn toggle_drain_mode(&self) -> Result<bool, CommandError> {
        let _guard = self.commands.lock().await;
        let active = !self.store.snapshot().drain_mode_active;
        self.send_drain_mode(active).await?;
        Ok(active)
    }

    /// Fires the one-shot reset trigger. The energy reading itself changes only
    /// when the meter reports the new value.
    pub async fn reset_energy_counter(&self) -> Result<(), CommandError> {
        match self.send(Command::ResetEnergyCounter).await {
            Ok(()) => {
                self.reset.show(
                    ResetStatus::Resetting,
                    vec![(RESET_COMPLETE_AFTER, ResetStatus::Complete), (RESET_IDLE_AFTER, ResetStatus::Idle)],
                );
                info!("Energy counter reset sent");
                Ok(())
            }
            Err(CommandError::NotConnected) => {
                self.reset
                    .show(ResetStatus::NotConnected, vec![(NOT_CONNECTED_IDLE_AFTER, ResetStatus::Idle)]);
                Err(CommandError::NotConnected)
            }
            Err(err) => Err(err),
        }
    }

    async fn send_relay(&self, relay: Relay, on: bool) -> Result<(), CommandError> {
        self.send(Command::SetRelay { relay, on }).await?;
        self.store.update(|state| state.with_relay(relay, on));
        info!(relay = relay.id(), name = relay.name(), on, "Relay command sent");
        Ok(())
    }

    async fn send_drain_mode(&self, active: bool) -> Result<(), CommandError> {
        self.send(Command::SetDrainMode(active)).await?;
        self.store.update(|state| state.with_drain_mode(active));
        info!(active, "Drain mode command sent");
        Ok(())
    }

    // No queueing: a command issued while disconnected is rejected outright.
    async fn send(&self, command: Command) -> Result<(), CommandError> {
        if !self.link.is_connected() {
            warn!(?command, "Command rejected, MQTT not connected");
            return Err(CommandError::NotConnected);
        }
        self.link.publish(command.encode()).await
    }
}
