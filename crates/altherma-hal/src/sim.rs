//! In-process simulated heat pump for testing without a LAN adapter.
//!
//! [`SimDevice`] implements [`HotWaterTank`], [`ClimateControl`] and
//! [`DeviceSession`] on top of a plain in-memory state and records every
//! getter and setter call in order.  Tests across the workspace assert on
//! that call log; [`SimConnector`] hands the same device out as a session.
//!
//! # Example
//!
//! ```rust
//! use altherma_hal::sim::{SimCall, SimDevice};
//! use altherma_hal::dispatch;
//! use altherma_types::Command;
//!
//! # tokio_test_block(async {
//! let device = SimDevice::new();
//! dispatch(&device, Command::DhwPower(false)).await.unwrap();
//! assert_eq!(device.calls(), vec![SimCall::set("tank_power", "off")]);
//! # });
//! # fn tokio_test_block<F: std::future::Future>(f: F) {
//! #     tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(f);
//! # }
//! ```

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use altherma_types::{BridgeError, ClimateControlMode, ControlConfiguration};
use async_trait::async_trait;

use crate::device::{ClimateControl, DeviceConnector, DeviceSession, HotWaterTank};

// ────────────────────────────────────────────────────────────────────────────
// Call log
// ────────────────────────────────────────────────────────────────────────────

/// One recorded interaction with a [`SimDevice`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimCall {
    Get(String),
    Set { name: String, value: String },
    Close,
}

impl SimCall {
    pub fn get(name: impl Into<String>) -> Self {
        SimCall::Get(name.into())
    }

    /// `value` is recorded through its `Display` form.
    pub fn set(name: impl Into<String>, value: impl fmt::Display) -> Self {
        SimCall::Set {
            name: name.into(),
            value: value.to_string(),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Device state
// ────────────────────────────────────────────────────────────────────────────

/// Current values held by a [`SimDevice`].
#[derive(Debug, Clone, PartialEq)]
pub struct SimState {
    pub tank_on: bool,
    pub tank_temperature: f64,
    pub target_temperature: f64,
    pub dhw_temperature_heating: f64,
    pub powerful: bool,
    pub climate_on: bool,
    pub indoor_temperature: f64,
    pub outdoor_temperature: f64,
    pub heating_configuration: ControlConfiguration,
    pub cooling_configuration: ControlConfiguration,
    pub mode: ClimateControlMode,
    pub leaving_water_temperature_current: f64,
    /// Indexed by [`ClimateControlMode::ALL`] order.
    pub leaving_water_offsets: [f64; 3],
    pub leaving_water_temperatures: [f64; 3],
}

impl Default for SimState {
    fn default() -> Self {
        Self {
            tank_on: true,
            tank_temperature: 47.0,
            target_temperature: 48.0,
            dhw_temperature_heating: 48.0,
            powerful: false,
            climate_on: true,
            indoor_temperature: 21.5,
            outdoor_temperature: 8.0,
            heating_configuration: ControlConfiguration::WeatherDependent,
            cooling_configuration: ControlConfiguration::Fixed,
            mode: ClimateControlMode::Heating,
            leaving_water_temperature_current: 32.0,
            leaving_water_offsets: [0.0; 3],
            leaving_water_temperatures: [35.0, 18.0, 30.0],
        }
    }
}

fn mode_index(mode: ClimateControlMode) -> usize {
    match mode {
        ClimateControlMode::Heating => 0,
        ClimateControlMode::Cooling => 1,
        ClimateControlMode::Auto => 2,
    }
}

// ────────────────────────────────────────────────────────────────────────────
// SimDevice
// ────────────────────────────────────────────────────────────────────────────

/// A simulated heat pump exposing both sub-units.
#[derive(Debug, Default)]
pub struct SimDevice {
    state: Mutex<SimState>,
    calls: Mutex<Vec<SimCall>>,
    failing: Option<String>,
    fetch_delay: Option<Duration>,
    closed: Mutex<bool>,
}

impl SimDevice {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from `state` instead of the defaults.
    pub fn with_state(mut self, state: SimState) -> Self {
        self.state = Mutex::new(state);
        self
    }

    /// Every getter and setter on attribute `name` fails with
    /// [`BridgeError::DeviceRequest`].  The call is still recorded.
    pub fn failing_on(mut self, name: impl Into<String>) -> Self {
        self.failing = Some(name.into());
        self
    }

    /// Every getter sleeps for `delay` before answering.
    pub fn with_fetch_delay(mut self, delay: Duration) -> Self {
        self.fetch_delay = Some(delay);
        self
    }

    /// Recorded calls, oldest first.
    pub fn calls(&self) -> Vec<SimCall> {
        lock(&self.calls).clone()
    }

    pub fn snapshot(&self) -> SimState {
        lock(&self.state).clone()
    }

    /// Change the tank power state without recording a call.
    pub fn set_tank_power(&self, on: bool) {
        lock(&self.state).tank_on = on;
    }

    pub fn is_closed(&self) -> bool {
        *lock(&self.closed)
    }

    fn check(&self, name: &str) -> Result<(), BridgeError> {
        if *lock(&self.closed) {
            return Err(BridgeError::DeviceRequest {
                dest: name.to_string(),
                details: "session closed".to_string(),
            });
        }
        if self.failing.as_deref() == Some(name) {
            return Err(BridgeError::DeviceRequest {
                dest: name.to_string(),
                details: "simulated failure".to_string(),
            });
        }
        Ok(())
    }

    async fn read<T>(&self, name: &str, f: impl FnOnce(&SimState) -> T) -> Result<T, BridgeError> {
        lock(&self.calls).push(SimCall::get(name));
        if let Some(delay) = self.fetch_delay {
            tokio::time::sleep(delay).await;
        }
        self.check(name)?;
        Ok(f(&lock(&self.state)))
    }

    fn write(
        &self,
        name: &str,
        value: impl fmt::Display,
        f: impl FnOnce(&mut SimState),
    ) -> Result<(), BridgeError> {
        lock(&self.calls).push(SimCall::set(name, value));
        self.check(name)?;
        f(&mut lock(&self.state));
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl HotWaterTank for SimDevice {
    async fn is_turned_on(&self) -> Result<bool, BridgeError> {
        self.read("tank_power", |s| s.tank_on).await
    }

    async fn turn_on(&self) -> Result<(), BridgeError> {
        self.write("tank_power", "on", |s| s.tank_on = true)
    }

    async fn turn_off(&self) -> Result<(), BridgeError> {
        self.write("tank_power", "off", |s| s.tank_on = false)
    }

    async fn tank_temperature(&self) -> Result<f64, BridgeError> {
        self.read("tank_temperature", |s| s.tank_temperature).await
    }

    async fn target_temperature(&self) -> Result<f64, BridgeError> {
        self.read("target_temperature", |s| s.target_temperature).await
    }

    async fn set_target_temperature(&self, value: f64) -> Result<(), BridgeError> {
        self.write("target_temperature", value, |s| s.target_temperature = value)
    }

    async fn domestic_hot_water_temperature_heating(&self) -> Result<f64, BridgeError> {
        self.read("dhw_temperature_heating", |s| s.dhw_temperature_heating)
            .await
    }

    async fn set_domestic_hot_water_temperature_heating(
        &self,
        value: i64,
    ) -> Result<(), BridgeError> {
        self.write("dhw_temperature_heating", value, |s| {
            s.dhw_temperature_heating = value as f64
        })
    }

    async fn powerful(&self) -> Result<bool, BridgeError> {
        self.read("powerful", |s| s.powerful).await
    }

    async fn set_powerful(&self, on: bool) -> Result<(), BridgeError> {
        self.write("powerful", on, |s| s.powerful = on)
    }
}

#[async_trait]
impl ClimateControl for SimDevice {
    async fn is_turned_on(&self) -> Result<bool, BridgeError> {
        self.read("climate_power", |s| s.climate_on).await
    }

    async fn turn_on(&self) -> Result<(), BridgeError> {
        self.write("climate_power", "on", |s| s.climate_on = true)
    }

    async fn turn_off(&self) -> Result<(), BridgeError> {
        self.write("climate_power", "off", |s| s.climate_on = false)
    }

    async fn indoor_temperature(&self) -> Result<f64, BridgeError> {
        self.read("indoor_temperature", |s| s.indoor_temperature).await
    }

    async fn outdoor_temperature(&self) -> Result<f64, BridgeError> {
        self.read("outdoor_temperature", |s| s.outdoor_temperature).await
    }

    fn heating_configuration(&self) -> ControlConfiguration {
        lock(&self.state).heating_configuration
    }

    fn cooling_configuration(&self) -> ControlConfiguration {
        lock(&self.state).cooling_configuration
    }

    async fn operation_mode(&self) -> Result<ClimateControlMode, BridgeError> {
        self.read("operation_mode", |s| s.mode).await
    }

    async fn set_operation_mode(&self, mode: ClimateControlMode) -> Result<(), BridgeError> {
        self.write("operation_mode", mode, |s| s.mode = mode)
    }

    async fn leaving_water_temperature_current(&self) -> Result<f64, BridgeError> {
        self.read("leaving_water_temperature_current", |s| {
            s.leaving_water_temperature_current
        })
        .await
    }

    async fn leaving_water_temperature_offset(
        &self,
        mode: ClimateControlMode,
    ) -> Result<f64, BridgeError> {
        let name = format!("leaving_water_temperature_offset_{mode}");
        self.read(&name, |s| s.leaving_water_offsets[mode_index(mode)])
            .await
    }

    async fn set_leaving_water_temperature_offset(
        &self,
        mode: ClimateControlMode,
        value: i64,
    ) -> Result<(), BridgeError> {
        let name = format!("leaving_water_temperature_offset_{mode}");
        self.write(&name, value, |s| {
            s.leaving_water_offsets[mode_index(mode)] = value as f64
        })
    }

    async fn leaving_water_temperature(
        &self,
        mode: ClimateControlMode,
    ) -> Result<f64, BridgeError> {
        let name = format!("leaving_water_temperature_{mode}");
        self.read(&name, |s| s.leaving_water_temperatures[mode_index(mode)])
            .await
    }

    async fn set_leaving_water_temperature(
        &self,
        mode: ClimateControlMode,
        value: i64,
    ) -> Result<(), BridgeError> {
        let name = format!("leaving_water_temperature_{mode}");
        self.write(&name, value, |s| {
            s.leaving_water_temperatures[mode_index(mode)] = value as f64
        })
    }
}

#[async_trait]
impl DeviceSession for SimDevice {
    fn hot_water_tank(&self) -> &dyn HotWaterTank {
        self
    }

    fn climate_control(&self) -> &dyn ClimateControl {
        self
    }

    async fn close(&self) -> Result<(), BridgeError> {
        lock(&self.calls).push(SimCall::Close);
        *lock(&self.closed) = true;
        Ok(())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// SimConnector
// ────────────────────────────────────────────────────────────────────────────

/// Hands out a shared [`SimDevice`] as the discovered session.
pub struct SimConnector {
    device: Arc<SimDevice>,
    discovery_error: Option<String>,
}

impl SimConnector {
    pub fn new(device: Arc<SimDevice>) -> Self {
        Self {
            device,
            discovery_error: None,
        }
    }

    /// Make [`DeviceConnector::connect`] fail with
    /// [`BridgeError::DiscoveryFailed`].
    pub fn failing_discovery(mut self, reason: impl Into<String>) -> Self {
        self.discovery_error = Some(reason.into());
        self
    }
}

#[async_trait]
impl DeviceConnector for SimConnector {
    async fn connect(&self) -> Result<Arc<dyn DeviceSession>, BridgeError> {
        if let Some(reason) = &self.discovery_error {
            return Err(BridgeError::DiscoveryFailed(reason.clone()));
        }
        let session: Arc<dyn DeviceSession> = self.device.clone();
        Ok(session)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
