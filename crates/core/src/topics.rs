// Topic catalog shared with the appliance firmware. These strings are a wire contract.

use crate::state::Relay;

pub const SENSOR_WATER: &str = "sensor/water";
pub const SENSOR_TEMP: &str = "sensor/temp";
pub const SENSOR_HUMIDITY: &str = "sensor/humidity";
pub const SENSOR_AIR: &str = "sensor/air";

pub const KURAS_STATUS: &str = "kuras/status";
pub const RELAY_1_STATUS: &str = "relay/1/status";
pub const RELAY_2_STATUS: &str = "relay/2/status";

pub const POWER_VOLTAGE: &str = "pzem004t/voltage";
pub const POWER_CURRENT: &str = "pzem004t/current";
pub const POWER_POWER: &str = "pzem004t/power";
pub const POWER_ENERGY: &str = "pzem004t/energy";
pub const POWER_PF: &str = "pzem004t/pf";
pub const POWER_FREQUENCY: &str = "pzem004t/frequency";

// Write-only: nothing on the device side ever publishes state here.
pub const POWER_ENERGY_RESET: &str = "pzem004t/energy/reset";

pub const ENERGY_RESET_PAYLOAD: &str = "reset";

/// Everything the dashboard session registers after each successful connect.
pub const DASHBOARD_SUBSCRIPTIONS: [&str; 13] = [
    SENSOR_WATER,
    SENSOR_TEMP,
    SENSOR_HUMIDITY,
    SENSOR_AIR,
    KURAS_STATUS,
    RELAY_1_STATUS,
    RELAY_2_STATUS,
    POWER_VOLTAGE,
    POWER_CURRENT,
    POWER_POWER,
    POWER_ENERGY,
    POWER_PF,
    POWER_FREQUENCY,
];

// Wildcards
pub fn power_wildcard_all() -> &'static str { "pzem004t/#" }

pub fn relay_status_topic(relay: Relay) -> &'static str {
    match relay {
        Relay::Condenser => RELAY_1_STATUS,
        Relay::WaterPump => RELAY_2_STATUS,
    }
}
