//! `altherma-middleware` – the bus side of the bridge.
//!
//! Moves messages between the MQTT broker and the device session without
//! knowing anything about the device protocol.
//!
//! # Modules
//!
//! - [`client`] – the [`BusClient`] trait and its rumqttc implementation.
//! - [`multiplexer`] – [`SocketMultiplexer`]: drives the client's socket I/O
//!   and keep-alive housekeeping on the tokio reactor and reports what it
//!   sees through [`BusHooks`].
//! - [`command_channel`] – [`CommandChannel`]: the single-slot mailbox between
//!   the bus and the command loop.
//! - [`reporter`] – [`StateReporter`]: the drift-compensated poll and publish
//!   loop.
//! - [`topics`] – [`TopicScheme`]: topic names for commands and state.
//! - [`sim`] – an in-memory bus for tests.

pub mod client;
pub mod command_channel;
pub mod multiplexer;
pub mod reporter;
pub mod sim;
pub mod topics;

pub use client::{BusClient, MqttClient, MqttEventSource, MqttSettings, connect};
pub use command_channel::{CommandChannel, NotifyOutcome, StopReason};
pub use multiplexer::{
    BusHooks, EventSource, Housekeeper, HousekeepingStatus, SocketEvent, SocketMultiplexer,
};
pub use reporter::{AttributeSnapshot, StateReporter, next_sleep};
pub use sim::{Published, SimBus, SimEventSource};
pub use topics::TopicScheme;
