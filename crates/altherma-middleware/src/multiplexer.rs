//! [`SocketMultiplexer`] – runs a bus client's socket on the tokio reactor.
//!
//! The bus client is split into two halves.  The request half
//! ([`BusClient`][crate::client::BusClient]) is shared by everyone who wants to
//! publish or subscribe.  The I/O half implements [`EventSource`]: each call to
//! [`EventSource::next_event`] performs whatever socket reads and writes are
//! ready and reports one [`SocketEvent`].
//!
//! The multiplexer owns the I/O half and runs a single task that waits on
//! three things at once:
//!
//! * socket readiness, forwarded to the [`BusHooks`] as `on_connected`,
//!   `on_readable` (one inbound message), `on_writable` (an outgoing packet
//!   was flushed) or `on_closed`;
//! * a 1-second housekeeping tick, which calls the source's [`Housekeeper`]
//!   until it reports anything other than [`HousekeepingStatus::Success`];
//! * cancellation.
//!
//! A `next_event` call may span several ticks (a slow connection
//! acknowledgement, a large packet).  The in-flight call is kept pinned
//! across loop iterations and replaced only once it has produced an event,
//! so a tick never abandons a half-finished read.
//!
//! Because readiness, housekeeping and teardown are branches of the same
//! `select!`, no housekeeping call can run once the loop has observed the
//! socket closing or the token being cancelled.

use std::sync::Arc;
use std::time::Duration;

use altherma_types::InboundMessage;
use async_trait::async_trait;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// Interval between [`EventSource::housekeeping`] calls.
pub const HOUSEKEEPING_INTERVAL: Duration = Duration::from_secs(1);

/// One observation from the socket.
#[derive(Debug, PartialEq, Eq)]
pub enum SocketEvent {
    /// The broker acknowledged the connection.
    Connected,
    /// A message arrived on a subscribed topic.
    Message(InboundMessage),
    /// An outgoing publish left the socket.
    Flushed,
    /// Protocol traffic with nothing for the bridge to do (acks, pings).
    Activity,
    /// The socket is gone: disconnect acknowledged, refused or dropped.
    Closed(String),
}

/// Result of one housekeeping pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HousekeepingStatus {
    Success,
    NoConnection,
    KeepAliveExpired,
}

/// The I/O half of a bus client.
#[async_trait]
pub trait EventSource: Send {
    /// Drive the socket until there is something to report.
    async fn next_event(&mut self) -> SocketEvent;

    /// Handle for the periodic bookkeeping of this connection, usable while
    /// a `next_event` call is in flight.
    fn housekeeper(&self) -> Arc<dyn Housekeeper>;
}

/// Periodic connection bookkeeping.
pub trait Housekeeper: Send + Sync {
    /// Must not block.
    fn housekeeping(&self) -> HousekeepingStatus;
}

/// Receives socket events from the multiplexer.
///
/// Hooks run on the multiplexer task and must not block.
pub trait BusHooks: Send + Sync {
    fn on_connected(&self);

    fn on_readable(&self, message: InboundMessage);

    fn on_writable(&self) {}

    /// Called once, after which the multiplexer stops.
    fn on_closed(&self, reason: &str);
}

/// Drives an [`EventSource`] and forwards its events to [`BusHooks`].
pub struct SocketMultiplexer<S, H> {
    source: S,
    hooks: H,
}

impl<S: EventSource, H: BusHooks> SocketMultiplexer<S, H> {
    pub fn new(source: S, hooks: H) -> Self {
        Self { source, hooks }
    }

    /// Run until the socket closes or `cancel` fires.
    pub async fn run(self, cancel: CancellationToken) {
        let Self { source, hooks } = self;
        let housekeeper = source.housekeeper();
        let mut ticker = tokio::time::interval_at(
            Instant::now() + HOUSEKEEPING_INTERVAL,
            HOUSEKEEPING_INTERVAL,
        );
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut housekeeping = true;

        let mut events = std::pin::pin!(next_event(source));

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    debug!("socket multiplexer cancelled");
                    break;
                }

                (source, event) = &mut events => {
                    match event {
                        SocketEvent::Connected => {
                            info!("bus connection acknowledged");
                            hooks.on_connected();
                        }
                        SocketEvent::Message(message) => {
                            trace!(topic = %message.topic, "bus message received");
                            hooks.on_readable(message);
                        }
                        SocketEvent::Flushed => hooks.on_writable(),
                        SocketEvent::Activity => {}
                        SocketEvent::Closed(reason) => {
                            info!(reason = %reason, "bus socket closed");
                            hooks.on_closed(&reason);
                            break;
                        }
                    }
                    events.set(next_event(source));
                }

                _ = ticker.tick(), if housekeeping => {
                    match housekeeper.housekeeping() {
                        HousekeepingStatus::Success => {}
                        status => {
                            warn!(?status, "bus housekeeping stopped");
                            housekeeping = false;
                        }
                    }
                }
            }
        }
    }
}

/// One `next_event` call that owns its source, so it can outlive a loop
/// iteration.
async fn next_event<S: EventSource>(mut source: S) -> (S, SocketEvent) {
    let event = source.next_event().await;
    (source, event)
}
