pub mod access;
pub mod codec;
pub mod commands;
pub mod state;
pub mod topics;

pub use access::{check_pin, classify_origin, AccessError, AccessGate, OriginClass};
pub use codec::{decode, try_decode, DecodeError};
pub use commands::{Command, OutboundMessage};
pub use state::{format_reading, gauge_percent, ApplicationState, FieldUpdate, Relay, SensorKey, SensorReadings, UnknownRelay};
pub use topics::*;
