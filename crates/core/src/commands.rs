use serde::{Deserialize, Serialize};

use crate::codec::on_off;
use crate::state::Relay;
use crate::topics;

// Control intents accepted from the dashboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum Command {
    SetRelay { relay: Relay, on: bool },
    SetDrainMode(bool),
    ResetEnergyCounter,
}

/// A message ready for the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub retain: bool,
}

impl Command {
    // Relay and drain state are retained so a reconnecting subscriber sees the last
    // commanded value at once. The energy reset is a one-shot trigger.
    pub fn encode(&self) -> OutboundMessage {
        match *self {
            Command::SetRelay { relay, on } => OutboundMessage {
                topic: topics::relay_status_topic(relay).to_string(),
                payload: on_off(on).as_bytes().to_vec(),
                retain: true,
            },
            Command::SetDrainMode(on) => OutboundMessage {
                topic: topics::KURAS_STATUS.to_string(),
                payload: on_off(on).as_bytes().to_vec(),
                retain: true,
            },
            Command::ResetEnergyCounter => OutboundMessage {
                topic: topics::POWER_ENERGY_RESET.to_string(),
                payload: topics::ENERGY_RESET_PAYLOAD.as_bytes().to_vec(),
                retain: false,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::decode;
    use crate::state::FieldUpdate;

    #[test]
    fn relay_on_is_retained() {
        let msg = Command::SetRelay { relay: Relay::Condenser, on: true }.encode();
        assert_eq!(msg.topic, "relay/1/status");
        assert_eq!(msg.payload, b"ON");
        assert!(msg.retain);
    }

    #[test]
    fn drain_mode_off_is_retained() {
        let msg = Command::SetDrainMode(false).encode();
        assert_eq!(msg.topic, "kuras/status");
        assert_eq!(msg.payload, b"OFF");
        assert!(msg.retain);
    }

    #[test]
    fn energy_reset_is_not_retained() {
        let msg = Command::ResetEnergyCounter.encode();
        assert_eq!(msg.topic, "pzem004t/energy/reset");
        assert_eq!(msg.payload, b"reset");
        assert!(!msg.retain);
    }

    #[test]
    fn status_commands_echo_back_as_the_same_field() {
        let msg = Command::SetRelay { relay: Relay::WaterPump, on: true }.encode();
        assert_eq!(decode(&msg.topic, &msg.payload), Some(FieldUpdate::Relay(Relay::WaterPump, true)));
    }

    #[test]
    fn command_json_shape() {
        let json = serde_json::to_value(Command::SetRelay { relay: Relay::WaterPump, on: false }).unwrap();
        assert_eq!(json, serde_json::json!({"type": "SetRelay", "value": {"relay": 2, "on": false}}));
    }
}
