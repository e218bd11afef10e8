//! `altherma-runtime` – lifecycle and supervision of one bridge process.
//!
//! # Modules
//!
//! - [`supervisor`] – [`BridgeSupervisor`]: connects the bus, discovers the
//!   device, runs the command loop and the state reporter side by side, and
//!   performs the ordered teardown when either stops or a shutdown signal
//!   arrives.
//! - [`lifecycle`] – [`BridgeState`] and [`Lifecycle`]: the bridge state
//!   machine, observable through a `tokio::sync::watch` channel.
//! - [`config`] – [`BridgeConfig`]: poll interval, device timeouts, topic
//!   scheme and broker settings.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]: initialises
//!   the global `tracing` subscriber with an optional OTLP span exporter.  Set
//!   `OTEL_EXPORTER_OTLP_ENDPOINT` to enable live trace export.

pub mod config;
pub mod lifecycle;
pub mod supervisor;
pub mod telemetry;

pub use config::BridgeConfig;
pub use lifecycle::{BridgeState, Lifecycle};
pub use supervisor::{BridgeSupervisor, ShutdownReason};
pub use telemetry::{TracerProviderGuard, init_tracing};
