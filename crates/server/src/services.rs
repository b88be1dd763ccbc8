use std::sync::Arc;

use awg_core::{check_pin, AccessError, AccessGate, Relay};
use awg_mqtt::{CommandError, CommandLink, CommandPublisher, ResetStatus};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{watch, RwLock};
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum ControlError {
    #[error("controls are locked, unlock with the PIN first")]
    Locked,
    #[error(transparent)]
    Access(#[from] AccessError),
    #[error(transparent)]
    Command(#[from] CommandError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AccessView {
    pub restricted_origin: bool,
    pub unlocked: bool,
    pub controls_reachable: bool,
}

impl From<AccessGate> for AccessView {
    fn from(gate: AccessGate) -> Self {
        Self {
            restricted_origin: gate.is_restricted_origin(),
            unlocked: gate.is_unlocked(),
            controls_reachable: gate.controls_reachable(),
        }
    }
}

/// Relay and drain control behind the access gate, plus the power page's
/// energy reset.
///
/// The gate lives for the whole process; once unlocked it stays unlocked.
pub struct ControlService<L> {
    dashboard: Arc<CommandPublisher<L>>,
    power: Arc<CommandPublisher<L>>,
    gate: Arc<RwLock<AccessGate>>,
    pin: Arc<str>,
}

impl<L> Clone for ControlService<L> {
    fn clone(&self) -> Self {
        Self {
            dashboard: self.dashboard.clone(),
            power: self.power.clone(),
            gate: self.gate.clone(),
            pin: self.pin.clone(),
        }
    }
}

impl<L: CommandLink> ControlService<L> {
    pub fn new(dashboard: CommandPublisher<L>, power: CommandPublisher<L>, gate: AccessGate, pin: &str) -> Self {
        Self {
            dashboard: Arc::new(dashboard),
            power: Arc::new(power),
            gate: Arc::new(RwLock::new(gate)),
            pin: Arc::from(pin),
        }
    }

    pub async fn access(&self) -> AccessView {
        AccessView::from(*self.gate.read().await)
    }

    pub async fn is_unlocked(&self) -> bool {
        self.gate.read().await.is_unlocked()
    }

    pub async fn unlock(&self, candidate: &str) -> Result<AccessView, ControlError> {
        let mut gate = self.gate.write().await;
        if let Err(err) = gate.try_unlock(candidate, &self.pin) {
            warn!("Rejected PIN attempt");
            return Err(err.into());
        }
        info!("Controls unlocked");
        Ok(AccessView::from(*gate))
    }

    /// PIN check for the info page's credential reveal. Leaves the gate alone.
    pub fn verify_pin(&self, candidate: &str) -> Result<(), ControlError> {
        if check_pin(candidate, &self.pin) {
            Ok(())
        } else {
            warn!("Rejected PIN for credential reveal");
            Err(AccessError::InvalidPin.into())
        }
    }

    pub async fn set_relay(&self, relay: Relay, on: bool) -> Result<(), ControlError> {
        self.ensure_reachable().await?;
        Ok(self.dashboard.set_relay(relay, on).await?)
    }

    pub async fn toggle_relay(&self, relay: Relay) -> Result<bool, ControlError> {
        self.ensure_reachable().await?;
        Ok(self.dashboard.toggle_relay(relay).await?)
    }

    pub async fn set_drain_mode(&self, active: bool) -> Result<(), ControlError> {
        self.ensure_reachable().await?;
        Ok(self.dashboard.set_drain_mode(active).await?)
    }

    pub async fn toggle_drain_mode(&self) -> Result<bool, ControlError> {
        self.ensure_reachable().await?;
        Ok(self.dashboard.toggle_drain_mode().await?)
    }

    // The power page sits outside the gate.
    pub async fn reset_energy_counter(&self) -> Result<(), ControlError> {
        Ok(self.power.reset_energy_counter().await?)
    }

    pub fn reset_status(&self) -> ResetStatus {
        self.power.reset_indicator().current()
    }

    pub fn watch_reset(&self) -> watch::Receiver<ResetStatus> {
        self.power.reset_indicator().subscribe()
    }

    async fn ensure_reachable(&self) -> Result<(), ControlError> {
        if self.gate.read().await.controls_reachable() {
            Ok(())
        } else {
            Err(ControlError::Locked)
        }
    }
}
