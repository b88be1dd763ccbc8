use awg_core::{format_reading, gauge_percent, ApplicationState, SensorKey};
use awg_mqtt::{ConnectionStatus, ResetStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::SiteInfo;
use crate::services::AccessView;

#[derive(Debug, Deserialize, Serialize)]
pub struct SwitchPayload {
    pub on: bool,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct UnlockPayload {
    pub pin: String,
}

#[derive(Debug, Serialize)]
pub struct ToggleResponse {
    pub on: bool,
}

#[derive(Debug, Serialize)]
pub struct DashboardResponse {
    pub status: ConnectionStatus,
    pub access: AccessView,
    pub state: ApplicationState,
}

/// One gauge on the power page.
#[derive(Debug, Serialize)]
pub struct PowerReading {
    pub key: SensorKey,
    pub value: Option<f64>,
    pub display: String,
    pub unit: &'static str,
    pub gauge_percent: Option<f64>,
}

impl PowerReading {
    pub fn from_state(key: SensorKey, state: &ApplicationState) -> Self {
        let value = state.sensors.get(key);
        Self {
            key,
            value,
            display: format_reading(value),
            unit: key.unit(),
            gauge_percent: gauge_percent(key, value),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PowerResponse {
    pub status: ConnectionStatus,
    pub reset_status: ResetStatus,
    pub reset_label: &'static str,
    pub readings: Vec<PowerReading>,
    pub last_update: Option<DateTime<Utc>>,
}

impl PowerResponse {
    pub fn new(status: ConnectionStatus, reset_status: ResetStatus, state: &ApplicationState) -> Self {
        Self {
            status,
            reset_status,
            reset_label: reset_status.label(),
            readings: SensorKey::POWER.iter().map(|&key| PowerReading::from_state(key, state)).collect(),
            last_update: state.last_update,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct InfoResponse {
    pub revealed: bool,
    pub info: SiteInfo,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
}
