//! `altherma-types` – values shared by every layer of the bridge.
//!
//! Nothing in here performs I/O.  The crate defines the closed sets that make
//! up the bus contract ([`Command`] for inbound control messages, [`Attribute`]
//! for published state), the device enumerations, the [`InboundMessage`]
//! handed from the bus to the command loop, and the [`BridgeError`] taxonomy.

pub mod attribute;
pub mod command;

pub use attribute::Attribute;
pub use command::{Command, CommandKind, parse_number, parse_switch, round_to_integer};

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Operation mode of the climate-control unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClimateControlMode {
    Heating,
    Cooling,
    Auto,
}

impl ClimateControlMode {
    /// Every mode the device knows about.
    pub const ALL: [ClimateControlMode; 3] = [
        ClimateControlMode::Heating,
        ClimateControlMode::Cooling,
        ClimateControlMode::Auto,
    ];

    /// Canonical wire name (`"heating"`, `"cooling"`, `"auto"`).
    pub fn as_str(self) -> &'static str {
        match self {
            ClimateControlMode::Heating => "heating",
            ClimateControlMode::Cooling => "cooling",
            ClimateControlMode::Auto => "auto",
        }
    }
}

impl fmt::Display for ClimateControlMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a string is not one of the known [`ClimateControlMode`]s.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown climate control mode {0:?}")]
pub struct UnknownMode(pub String);

impl FromStr for ClimateControlMode {
    type Err = UnknownMode;

    /// Matching is exact: the device only accepts the lowercase names.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ClimateControlMode::ALL
            .into_iter()
            .find(|mode| mode.as_str() == s)
            .ok_or_else(|| UnknownMode(s.to_string()))
    }
}

/// How the leaving-water setpoint is controlled for one climate mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ControlConfiguration {
    /// The setpoint follows the outdoor temperature curve; only an offset can
    /// be applied.
    WeatherDependent,
    /// The setpoint is an absolute leaving-water temperature.
    Fixed,
}

impl ControlConfiguration {
    pub fn as_str(self) -> &'static str {
        match self {
            ControlConfiguration::WeatherDependent => "weather-dependent",
            ControlConfiguration::Fixed => "fixed",
        }
    }
}

impl fmt::Display for ControlConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One message received from the bus.
///
/// Delivered exactly once per receive event and moved, never cloned, into the
/// command loop that accepts it.
#[derive(Debug, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

impl InboundMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}

/// Error taxonomy for the whole bridge.
///
/// Command-level variants ([`BridgeError::InvalidCommandValue`],
/// [`BridgeError::DeviceRequest`] raised by a setter) are contained by the
/// dispatcher.  Cycle- and connection-level variants reach the supervisor and
/// end the run.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BridgeError {
    #[error("bus connection dropped: {0}")]
    BusDisconnected(String),

    #[error("bus client request failed: {0}")]
    Bus(String),

    #[error("command channel closed")]
    ChannelClosed,

    #[error("invalid value {value:?} for command {command}")]
    InvalidCommandValue { command: String, value: String },

    #[error("fetching {attribute} failed: {details}")]
    DeviceFetchFailed { attribute: String, details: String },

    #[error("device discovery failed: {0}")]
    DiscoveryFailed(String),

    #[error("device request to {dest} failed: {details}")]
    DeviceRequest { dest: String, details: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("illegal lifecycle transition {from} -> {to}")]
    InvalidTransition { from: String, to: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_parses_only_canonical_names() {
        assert_eq!("heating".parse::<ClimateControlMode>(), Ok(ClimateControlMode::Heating));
        assert_eq!("cooling".parse::<ClimateControlMode>(), Ok(ClimateControlMode::Cooling));
        assert_eq!("auto".parse::<ClimateControlMode>(), Ok(ClimateControlMode::Auto));
        assert_eq!(
            "Heating".parse::<ClimateControlMode>(),
            Err(UnknownMode("Heating".to_string()))
        );
        assert!("dry".parse::<ClimateControlMode>().is_err());
    }

    #[test]
    fn mode_serializes_lowercase() {
        let json = serde_json::to_string(&ClimateControlMode::Cooling).unwrap();
        assert_eq!(json, "\"cooling\"");
    }

    #[test]
    fn control_configuration_names() {
        assert_eq!(ControlConfiguration::WeatherDependent.to_string(), "weather-dependent");
        assert_eq!(ControlConfiguration::Fixed.to_string(), "fixed");
        let json = serde_json::to_string(&ControlConfiguration::WeatherDependent).unwrap();
        assert_eq!(json, "\"weather-dependent\"");
    }

    #[test]
    fn inbound_message_keeps_raw_payload() {
        let msg = InboundMessage::new("altherma/set/dhw_power", b"ON".to_vec());
        assert_eq!(msg.topic, "altherma/set/dhw_power");
        assert_eq!(msg.payload, b"ON");
    }

    #[test]
    fn inbound_messages_compare_by_content() {
        assert_eq!(
            InboundMessage::new("altherma/set/dhw_power", "ON"),
            InboundMessage::new("altherma/set/dhw_power", b"ON".to_vec())
        );
        assert_ne!(
            InboundMessage::new("altherma/set/dhw_power", "ON"),
            InboundMessage::new("altherma/set/dhw_power", "OFF")
        );
    }

    #[test]
    fn bridge_error_display() {
        let err = BridgeError::InvalidCommandValue {
            command: "climate_control_mode".to_string(),
            value: "dry".to_string(),
        };
        assert!(err.to_string().contains("climate_control_mode"));
        assert!(err.to_string().contains("\"dry\""));

        let err = BridgeError::DeviceFetchFailed {
            attribute: "outdoor_temp".to_string(),
            details: "timeout".to_string(),
        };
        assert!(err.to_string().contains("outdoor_temp"));
    }
}
