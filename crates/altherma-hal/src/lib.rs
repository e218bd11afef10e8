//! `altherma-hal` – the heat pump as seen by the bridge.
//!
//! # Modules
//!
//! - [`device`] – the [`HotWaterTank`], [`ClimateControl`] and
//!   [`DeviceSession`] traits every device backend implements, plus the
//!   [`DeviceConnector`] that opens and discovers a session.
//! - [`dispatch`] – the fixed table mapping a parsed
//!   [`Command`][altherma_types::Command] onto exactly one setter call.
//! - [`lan_adapter`] – the WebSocket backend talking to the heat pump's LAN
//!   adapter.
//! - [`sim`] – an in-process device that records every call, for tests and
//!   headless runs.

pub mod device;
pub mod dispatch;
pub mod lan_adapter;
pub mod sim;

pub use device::{ClimateControl, DeviceConnector, DeviceSession, HotWaterTank};
pub use dispatch::{DispatchOutcome, dispatch};
pub use lan_adapter::{LanAdapterConnection, LanAdapterConnector, LanAdapterSession};
pub use sim::{SimCall, SimConnector, SimDevice};
