//! [`dispatch`] – the fixed command table.
//!
//! Every [`Command`] variant maps to exactly one setter on one sub-unit.  The
//! match below is exhaustive, so adding a command without wiring it to the
//! device is a compile error.
//!
//! # Tank-power guard
//!
//! The tank rejects setpoint and boost changes while it is switched off, so
//! [`Command::DhwTargetTemp`], [`Command::DhwTempHeating`] and
//! [`Command::DhwPowerful`] first read the tank's power state and are skipped
//! (reported as [`DispatchOutcome::SkippedTankOff`]) when it is off.

use altherma_types::{BridgeError, Command};
use tracing::debug;

use crate::device::DeviceSession;

/// What happened to a dispatched command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The setter was called and returned successfully.
    Applied,
    /// The tank was off, so the tank setter was not called.
    SkippedTankOff,
}

/// Apply `command` to `session`.
///
/// # Errors
///
/// Propagates the setter's error (normally [`BridgeError::DeviceRequest`]).
pub async fn dispatch(
    session: &dyn DeviceSession,
    command: Command,
) -> Result<DispatchOutcome, BridgeError> {
    let tank = session.hot_water_tank();
    let climate = session.climate_control();

    match command {
        // --------------------------------------------------------------------
        // Hot water tank
        // --------------------------------------------------------------------
        Command::DhwPower(true) => tank.turn_on().await?,
        Command::DhwPower(false) => tank.turn_off().await?,
        Command::DhwTargetTemp(value) => {
            if !tank_is_on(session, &command).await? {
                return Ok(DispatchOutcome::SkippedTankOff);
            }
            tank.set_target_temperature(value).await?
        }
        Command::DhwTempHeating(value) => {
            if !tank_is_on(session, &command).await? {
                return Ok(DispatchOutcome::SkippedTankOff);
            }
            tank.set_domestic_hot_water_temperature_heating(value).await?
        }
        Command::DhwPowerful(on) => {
            if !tank_is_on(session, &command).await? {
                return Ok(DispatchOutcome::SkippedTankOff);
            }
            tank.set_powerful(on).await?
        }

        // --------------------------------------------------------------------
        // Climate control
        // --------------------------------------------------------------------
        Command::ClimateControlPower(true) => climate.turn_on().await?,
        Command::ClimateControlPower(false) => climate.turn_off().await?,
        Command::ClimateControlMode(mode) => climate.set_operation_mode(mode).await?,
        Command::LeavingWaterTempOffset { mode, value } => {
            climate.set_leaving_water_temperature_offset(mode, value).await?
        }
        Command::LeavingWaterTemp { mode, value } => {
            climate.set_leaving_water_temperature(mode, value).await?
        }
    }

    Ok(DispatchOutcome::Applied)
}

async fn tank_is_on(session: &dyn DeviceSession, command: &Command) -> Result<bool, BridgeError> {
    let on = session.hot_water_tank().is_turned_on().await?;
    if !on {
        debug!(command = command.kind().name(), "hot water tank is off; command skipped");
    }
    Ok(on)
}
