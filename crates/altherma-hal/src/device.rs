//! Device traits for the two sub-units of a discovered heat pump.
//!
//! Backends implement these traits; the rest of the bridge only ever talks to
//! the traits, so the LAN adapter can be swapped for [`SimDevice`] in tests
//! without touching the command or reporting logic.
//!
//! [`SimDevice`]: crate::sim::SimDevice

use std::sync::Arc;

use altherma_types::{BridgeError, ClimateControlMode, ControlConfiguration};
use async_trait::async_trait;

/// The domestic hot water tank.
#[async_trait]
pub trait HotWaterTank: Send + Sync {
    async fn is_turned_on(&self) -> Result<bool, BridgeError>;
    async fn turn_on(&self) -> Result<(), BridgeError>;
    async fn turn_off(&self) -> Result<(), BridgeError>;

    /// Measured water temperature in the tank (°C).
    async fn tank_temperature(&self) -> Result<f64, BridgeError>;

    async fn target_temperature(&self) -> Result<f64, BridgeError>;
    async fn set_target_temperature(&self, value: f64) -> Result<(), BridgeError>;

    async fn domestic_hot_water_temperature_heating(&self) -> Result<f64, BridgeError>;
    async fn set_domestic_hot_water_temperature_heating(
        &self,
        value: i64,
    ) -> Result<(), BridgeError>;

    /// Boost ("powerful") mode.
    async fn powerful(&self) -> Result<bool, BridgeError>;
    async fn set_powerful(&self, on: bool) -> Result<(), BridgeError>;
}

/// The space heating / cooling unit.
#[async_trait]
pub trait ClimateControl: Send + Sync {
    async fn is_turned_on(&self) -> Result<bool, BridgeError>;
    async fn turn_on(&self) -> Result<(), BridgeError>;
    async fn turn_off(&self) -> Result<(), BridgeError>;

    async fn indoor_temperature(&self) -> Result<f64, BridgeError>;
    async fn outdoor_temperature(&self) -> Result<f64, BridgeError>;

    /// Fixed for the lifetime of a session, so no request is issued.
    fn heating_configuration(&self) -> ControlConfiguration;
    fn cooling_configuration(&self) -> ControlConfiguration;

    async fn operation_mode(&self) -> Result<ClimateControlMode, BridgeError>;
    async fn set_operation_mode(&self, mode: ClimateControlMode) -> Result<(), BridgeError>;

    async fn leaving_water_temperature_current(&self) -> Result<f64, BridgeError>;

    async fn leaving_water_temperature_offset(
        &self,
        mode: ClimateControlMode,
    ) -> Result<f64, BridgeError>;
    async fn set_leaving_water_temperature_offset(
        &self,
        mode: ClimateControlMode,
        value: i64,
    ) -> Result<(), BridgeError>;

    async fn leaving_water_temperature(
        &self,
        mode: ClimateControlMode,
    ) -> Result<f64, BridgeError>;
    async fn set_leaving_water_temperature(
        &self,
        mode: ClimateControlMode,
        value: i64,
    ) -> Result<(), BridgeError>;
}

/// A live, discovered connection to the heat pump.
///
/// Values of this type only exist after discovery has completed, so every
/// operation reachable through it targets a known unit.  The session is
/// shared between the command dispatcher (writes) and the state reporter
/// (reads); implementations serialise access internally.
#[async_trait]
pub trait DeviceSession: Send + Sync {
    fn hot_water_tank(&self) -> &dyn HotWaterTank;
    fn climate_control(&self) -> &dyn ClimateControl;

    /// Close the underlying connection.  Operations issued afterwards fail.
    async fn close(&self) -> Result<(), BridgeError>;
}

/// Opens a device connection and runs discovery.
#[async_trait]
pub trait DeviceConnector: Send + Sync {
    /// # Errors
    ///
    /// [`BridgeError::DiscoveryFailed`] when the device cannot be reached or
    /// does not expose both sub-units.
    async fn connect(&self) -> Result<Arc<dyn DeviceSession>, BridgeError>;
}
