//! The closed set of control commands accepted under `<prefix>/set/`.
//!
//! A command name resolves to a [`CommandKind`]; the kind together with the
//! raw payload parses into a typed [`Command`] that the device layer applies
//! through a fixed dispatch table.

use crate::{BridgeError, ClimateControlMode};

/// Every command name the bridge understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    DhwPower,
    DhwTargetTemp,
    DhwTempHeating,
    DhwPowerful,
    ClimateControlPower,
    ClimateControlMode,
    LeavingWaterTempOffset(ClimateControlMode),
    LeavingWaterTemp(ClimateControlMode),
}

impl CommandKind {
    pub const ALL: [CommandKind; 12] = [
        CommandKind::DhwPower,
        CommandKind::DhwTargetTemp,
        CommandKind::DhwTempHeating,
        CommandKind::DhwPowerful,
        CommandKind::ClimateControlPower,
        CommandKind::ClimateControlMode,
        CommandKind::LeavingWaterTempOffset(ClimateControlMode::Heating),
        CommandKind::LeavingWaterTempOffset(ClimateControlMode::Cooling),
        CommandKind::LeavingWaterTempOffset(ClimateControlMode::Auto),
        CommandKind::LeavingWaterTemp(ClimateControlMode::Heating),
        CommandKind::LeavingWaterTemp(ClimateControlMode::Cooling),
        CommandKind::LeavingWaterTemp(ClimateControlMode::Auto),
    ];

    /// Topic suffix under `<prefix>/set/`.
    pub fn name(self) -> &'static str {
        use ClimateControlMode::{Auto, Cooling, Heating};
        match self {
            CommandKind::DhwPower => "dhw_power",
            CommandKind::DhwTargetTemp => "dhw_target_temp",
            CommandKind::DhwTempHeating => "dhw_temp_heating",
            CommandKind::DhwPowerful => "dhw_powerful",
            CommandKind::ClimateControlPower => "climate_control_power",
            CommandKind::ClimateControlMode => "climate_control_mode",
            CommandKind::LeavingWaterTempOffset(Heating) => "leaving_water_temp_offset_heating",
            CommandKind::LeavingWaterTempOffset(Cooling) => "leaving_water_temp_offset_cooling",
            CommandKind::LeavingWaterTempOffset(Auto) => "leaving_water_temp_offset_auto",
            CommandKind::LeavingWaterTemp(Heating) => "leaving_water_temp_heating",
            CommandKind::LeavingWaterTemp(Cooling) => "leaving_water_temp_cooling",
            CommandKind::LeavingWaterTemp(Auto) => "leaving_water_temp_auto",
        }
    }

    /// Resolve a topic suffix.  Unknown names yield `None`.
    pub fn from_name(name: &str) -> Option<Self> {
        CommandKind::ALL.into_iter().find(|kind| kind.name() == name)
    }
}

/// A fully parsed command, ready for dispatch.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    DhwPower(bool),
    /// Applied as parsed, without rounding.
    DhwTargetTemp(f64),
    DhwTempHeating(i64),
    DhwPowerful(bool),
    ClimateControlPower(bool),
    ClimateControlMode(ClimateControlMode),
    LeavingWaterTempOffset { mode: ClimateControlMode, value: i64 },
    LeavingWaterTemp { mode: ClimateControlMode, value: i64 },
}

impl Command {
    /// Parse `payload` for `kind`.
    ///
    /// Returns `Ok(None)` for a switch command whose payload is neither an
    /// on- nor an off-value; such payloads are ignored rather than rejected.
    ///
    /// # Errors
    ///
    /// [`BridgeError::InvalidCommandValue`] when a numeric payload does not
    /// parse to a finite number or a mode payload is not a known mode.
    pub fn parse(kind: CommandKind, payload: &str) -> Result<Option<Command>, BridgeError> {
        let command = match kind {
            CommandKind::DhwPower => parse_switch(payload).map(Command::DhwPower),
            CommandKind::DhwPowerful => parse_switch(payload).map(Command::DhwPowerful),
            CommandKind::ClimateControlPower => {
                parse_switch(payload).map(Command::ClimateControlPower)
            }
            CommandKind::DhwTargetTemp => Some(Command::DhwTargetTemp(parse_number(kind, payload)?)),
            CommandKind::DhwTempHeating => Some(Command::DhwTempHeating(round_to_integer(
                parse_number(kind, payload)?,
            ))),
            CommandKind::ClimateControlMode => {
                let mode = payload
                    .parse::<ClimateControlMode>()
                    .map_err(|_| invalid(kind, payload))?;
                Some(Command::ClimateControlMode(mode))
            }
            CommandKind::LeavingWaterTempOffset(mode) => Some(Command::LeavingWaterTempOffset {
                mode,
                value: round_to_integer(parse_number(kind, payload)?),
            }),
            CommandKind::LeavingWaterTemp(mode) => Some(Command::LeavingWaterTemp {
                mode,
                value: round_to_integer(parse_number(kind, payload)?),
            }),
        };
        Ok(command)
    }

    pub fn kind(&self) -> CommandKind {
        match self {
            Command::DhwPower(_) => CommandKind::DhwPower,
            Command::DhwTargetTemp(_) => CommandKind::DhwTargetTemp,
            Command::DhwTempHeating(_) => CommandKind::DhwTempHeating,
            Command::DhwPowerful(_) => CommandKind::DhwPowerful,
            Command::ClimateControlPower(_) => CommandKind::ClimateControlPower,
            Command::ClimateControlMode(_) => CommandKind::ClimateControlMode,
            Command::LeavingWaterTempOffset { mode, .. } => CommandKind::LeavingWaterTempOffset(*mode),
            Command::LeavingWaterTemp { mode, .. } => CommandKind::LeavingWaterTemp(*mode),
        }
    }
}

/// Interpret a switch payload: `ON`/`1` (any case) is `true`, `OFF`/`0` is
/// `false`, anything else is `None`.
pub fn parse_switch(payload: &str) -> Option<bool> {
    if payload.eq_ignore_ascii_case("on") || payload == "1" {
        Some(true)
    } else if payload.eq_ignore_ascii_case("off") || payload == "0" {
        Some(false)
    } else {
        None
    }
}

/// Parse a numeric payload as a finite `f64`.  Surrounding whitespace is
/// accepted.
pub fn parse_number(kind: CommandKind, payload: &str) -> Result<f64, BridgeError> {
    match payload.trim().parse::<f64>() {
        Ok(value) if value.is_finite() => Ok(value),
        _ => Err(invalid(kind, payload)),
    }
}

/// Round to the nearest integer, ties to even (`2.5 -> 2`, `3.5 -> 4`).
pub fn round_to_integer(value: f64) -> i64 {
    value.round_ties_even() as i64
}

fn invalid(kind: CommandKind, payload: &str) -> BridgeError {
    BridgeError::InvalidCommandValue {
        command: kind.name().to_string(),
        value: payload.to_string(),
    }
}
