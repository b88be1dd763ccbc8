use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorKey {
    WaterLevel,
    Temperature,
    Humidity,
    AirQuality,
    Voltage,
    Current,
    Power,
    Energy,
    PowerFactor,
    Frequency,
}

impl SensorKey {
    pub const ALL: [SensorKey; 10] = [
        SensorKey::WaterLevel,
        SensorKey::Temperature,
        SensorKey::Humidity,
        SensorKey::AirQuality,
        SensorKey::Voltage,
        SensorKey::Current,
        SensorKey::Power,
        SensorKey::Energy,
        SensorKey::PowerFactor,
        SensorKey::Frequency,
    ];

    pub const POWER: [SensorKey; 6] = [
        SensorKey::Voltage,
        SensorKey::Current,
        SensorKey::Power,
        SensorKey::Energy,
        SensorKey::PowerFactor,
        SensorKey::Frequency,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SensorKey::WaterLevel => "water_level",
            SensorKey::Temperature => "temperature",
            SensorKey::Humidity => "humidity",
            SensorKey::AirQuality => "air_quality",
            SensorKey::Voltage => "voltage",
            SensorKey::Current => "current",
            SensorKey::Power => "power",
            SensorKey::Energy => "energy",
            SensorKey::PowerFactor => "power_factor",
            SensorKey::Frequency => "frequency",
        }
    }

    pub fn unit(self) -> &'static str {
        match self {
            SensorKey::WaterLevel | SensorKey::Humidity => "%",
            SensorKey::Temperature => "°C",
            SensorKey::AirQuality => "ug/m3",
            SensorKey::Voltage => "V",
            SensorKey::Current => "A",
            SensorKey::Power => "W",
            SensorKey::Energy => "kWh",
            SensorKey::PowerFactor => "",
            SensorKey::Frequency => "Hz",
        }
    }

    /// Display range used by gauges, `None` for readings shown without one.
    pub fn gauge_range(self) -> Option<(f64, f64)> {
        match self {
            SensorKey::WaterLevel | SensorKey::Humidity => Some((0.0, 100.0)),
            SensorKey::Voltage => Some((0.0, 250.0)),
            SensorKey::Current => Some((0.0, 10.0)),
            SensorKey::Power => Some((0.0, 2000.0)),
            SensorKey::Energy => Some((0.0, 100.0)),
            SensorKey::PowerFactor => Some((0.0, 1.0)),
            SensorKey::Frequency => Some((45.0, 55.0)),
            SensorKey::Temperature | SensorKey::AirQuality => None,
        }
    }
}

impl fmt::Display for SensorKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Latest reading per sensor. `None` means nothing has arrived since the session started.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SensorReadings {
    pub water_level: Option<f64>,
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub air_quality: Option<f64>,
    pub voltage: Option<f64>,
    pub current: Option<f64>,
    pub power: Option<f64>,
    pub energy: Option<f64>,
    pub power_factor: Option<f64>,
    pub frequency: Option<f64>,
}

impl SensorReadings {
    pub fn get(&self, key: SensorKey) -> Option<f64> {
        *self.slot(key)
    }

    fn set(&mut self, key: SensorKey, value: f64) {
        *self.slot_mut(key) = Some(value);
    }

    fn slot(&self, key: SensorKey) -> &Option<f64> {
        match key {
            SensorKey::WaterLevel => &self.water_level,
            SensorKey::Temperature => &self.temperature,
            SensorKey::Humidity => &self.humidity,
            SensorKey::AirQuality => &self.air_quality,
            SensorKey::Voltage => &self.voltage,
            SensorKey::Current => &self.current,
            SensorKey::Power => &self.power,
            SensorKey::Energy => &self.energy,
            SensorKey::PowerFactor => &self.power_factor,
            SensorKey::Frequency => &self.frequency,
        }
    }

    fn slot_mut(&mut self, key: SensorKey) -> &mut Option<f64> {
        match key {
            SensorKey::WaterLevel => &mut self.water_level,
            SensorKey::Temperature => &mut self.temperature,
            SensorKey::Humidity => &mut self.humidity,
            SensorKey::AirQuality => &mut self.air_quality,
            SensorKey::Voltage => &mut self.voltage,
            SensorKey::Current => &mut self.current,
            SensorKey::Power => &mut self.power,
            SensorKey::Energy => &mut self.energy,
            SensorKey::PowerFactor => &mut self.power_factor,
            SensorKey::Frequency => &mut self.frequency,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum Relay {
    Condenser,
    WaterPump,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("unknown relay {0}")]
pub struct UnknownRelay(pub u8);

impl Relay {
    pub const ALL: [Relay; 2] = [Relay::Condenser, Relay::WaterPump];

    pub fn id(self) -> u8 {
        match self {
            Relay::Condenser => 1,
            Relay::WaterPump => 2,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Relay::Condenser => "condenser",
            Relay::WaterPump => "water pump",
        }
    }
}

impl From<Relay> for u8 {
    fn from(relay: Relay) -> Self {
        relay.id()
    }
}

impl TryFrom<u8> for Relay {
    type Error = UnknownRelay;

    fn try_from(id: u8) -> Result<Self, Self::Error> {
        match id {
            1 => Ok(Relay::Condenser),
            2 => Ok(Relay::WaterPump),
            other => Err(UnknownRelay(other)),
        }
    }
}

impl FromStr for Relay {
    type Err = UnknownRelay;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let id = s.trim().parse::<u8>().map_err(|_| UnknownRelay(0))?;
        Relay::try_from(id)
    }
}

impl fmt::Display for Relay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "relay {}", self.id())
    }
}

/// One decoded field change. Every catalog topic maps to exactly one variant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldUpdate {
    Sensor(SensorKey, f64),
    Relay(Relay, bool),
    DrainMode(bool),
}

/// Snapshot of everything the dashboard renders. Updates never mutate in place;
/// `apply` returns the next snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApplicationState {
    pub sensors: SensorReadings,
    pub relays: BTreeMap<Relay, bool>,
    pub drain_mode_active: bool,
    pub last_update: Option<DateTime<Utc>>,
}

impl Default for ApplicationState {
    fn default() -> Self {
        Self {
            sensors: SensorReadings::default(),
            relays: Relay::ALL.iter().map(|r| (*r, false)).collect(),
            drain_mode_active: false,
            last_update: None,
        }
    }
}

impl ApplicationState {
    pub fn apply(&self, update: FieldUpdate, at: DateTime<Utc>) -> ApplicationState {
        let mut next = self.with_field(update);
        next.last_update = Some(at);
        next
    }

    pub fn fold<I>(&self, updates: I) -> ApplicationState
    where
        I: IntoIterator<Item = (FieldUpdate, DateTime<Utc>)>,
    {
        updates
            .into_iter()
            .fold(self.clone(), |state, (update, at)| state.apply(update, at))
    }

    // Optimistic local changes keep the timestamp: it tracks inbound traffic only.
    pub fn with_relay(&self, relay: Relay, on: bool) -> ApplicationState {
        self.with_field(FieldUpdate::Relay(relay, on))
    }

    pub fn with_drain_mode(&self, active: bool) -> ApplicationState {
        self.with_field(FieldUpdate::DrainMode(active))
    }

    pub fn relay(&self, relay: Relay) -> bool {
        self.relays.get(&relay).copied().unwrap_or(false)
    }

    fn with_field(&self, update: FieldUpdate) -> ApplicationState {
        let mut next = self.clone();
        match update {
            FieldUpdate::Sensor(key, value) => next.sensors.set(key, value),
            FieldUpdate::Relay(relay, on) => {
                next.relays.insert(relay, on);
            }
            FieldUpdate::DrainMode(active) => next.drain_mode_active = active,
        }
        next
    }
}

pub fn format_reading(value: Option<f64>) -> String {
    match value {
        Some(v) => format!("{:.2}", v),
        None => "--".to_string(),
    }
}

pub fn gauge_percent(key: SensorKey, value: Option<f64>) -> Option<f64> {
    let (min, max) = key.gauge_range()?;
    let value = value?;
    Some(((value - min) / (max - min) * 100.0).clamp(0.0, 100.0))
}
