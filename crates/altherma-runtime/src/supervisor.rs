//! [`BridgeSupervisor`] – owns one bridge run from connect to teardown.
//!
//! The supervisor wires the bus to the device:
//!
//! 1. spawns the [`SocketMultiplexer`] over the bus client's I/O half and
//!    waits for the broker to acknowledge the connection;
//! 2. subscribes to the command filter and discovers the device;
//! 3. runs the [`CommandChannel`] loop and the [`StateReporter`] side by
//!    side until a shutdown signal arrives or either of them stops;
//! 4. tears down in a fixed order: stop both loops, drain in-flight
//!    commands, close the device session, then disconnect from the bus and
//!    wait (bounded) for the acknowledgement.
//!
//! Progress is published through [`BridgeSupervisor::subscribe`].

use std::sync::Arc;
use std::time::Duration;

use altherma_hal::{DeviceConnector, DeviceSession};
use altherma_middleware::{
    BusClient, BusHooks, CommandChannel, EventSource, SocketMultiplexer, StateReporter,
    StopReason, TopicScheme,
};
use altherma_types::{BridgeError, InboundMessage};
use tokio::sync::watch;
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{BridgeConfig, DISCONNECT_ACK_TIMEOUT};
use crate::lifecycle::{BridgeState, Lifecycle};

/// Why a bridge run that got past startup ended.
#[derive(Debug, Clone, PartialEq)]
pub enum ShutdownReason {
    /// The shutdown token was cancelled.
    Signal,
    /// The command loop stopped without a bus or signal cause.
    ChannelClosed,
    /// The broker connection went away.
    BusDisconnected(String),
    /// A state cycle failed.
    ReporterFailed(BridgeError),
}

// ────────────────────────────────────────────────────────────────────────────
// Bus hooks
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
enum LinkState {
    Pending,
    Up,
    Closed(String),
}

struct SupervisorHooks {
    link: watch::Sender<LinkState>,
    channel: Arc<CommandChannel>,
}

impl BusHooks for SupervisorHooks {
    fn on_connected(&self) {
        self.link.send_replace(LinkState::Up);
    }

    fn on_readable(&self, message: InboundMessage) {
        self.channel.notify(message);
    }

    fn on_closed(&self, reason: &str) {
        self.channel.stop(StopReason::BusClosed(reason.to_string()));
        self.link.send_replace(LinkState::Closed(reason.to_string()));
    }
}

/// Wait until the broker answered the connection attempt one way or the
/// other.
async fn link_settled(link: &mut watch::Receiver<LinkState>) -> LinkState {
    match link.wait_for(|state| *state != LinkState::Pending).await {
        Ok(state) => state.clone(),
        Err(_) => LinkState::Closed("bus multiplexer stopped".to_string()),
    }
}

fn link_closed(link: &watch::Receiver<LinkState>) -> bool {
    matches!(*link.borrow(), LinkState::Closed(_))
}

// ────────────────────────────────────────────────────────────────────────────
// Supervisor
// ────────────────────────────────────────────────────────────────────────────

enum Startup {
    Ready(Arc<dyn DeviceSession>),
    Interrupted,
}

/// Which running task ended first.
enum Finished {
    Neither,
    Channel,
    Reporter,
}

pub struct BridgeSupervisor {
    bus: Arc<dyn BusClient>,
    connector: Arc<dyn DeviceConnector>,
    topics: TopicScheme,
    poll_interval: Duration,
    device_timeout: Duration,
    disconnect_timeout: Duration,
    lifecycle: Lifecycle,
}

impl BridgeSupervisor {
    pub fn new(
        bus: Arc<dyn BusClient>,
        connector: Arc<dyn DeviceConnector>,
        config: &BridgeConfig,
    ) -> Self {
        Self {
            bus,
            connector,
            topics: config.topics.clone(),
            poll_interval: config.poll_interval,
            device_timeout: config.device_timeout,
            disconnect_timeout: DISCONNECT_ACK_TIMEOUT,
            lifecycle: Lifecycle::new(),
        }
    }

    /// Override how long teardown waits for the broker's disconnect
    /// acknowledgement.
    pub fn with_disconnect_timeout(mut self, timeout: Duration) -> Self {
        self.disconnect_timeout = timeout;
        self
    }

    pub fn state(&self) -> BridgeState {
        self.lifecycle.current()
    }

    pub fn subscribe(&self) -> watch::Receiver<BridgeState> {
        self.lifecycle.subscribe()
    }

    /// Run the bridge until `shutdown` is cancelled or the bridge stops on
    /// its own.
    ///
    /// # Errors
    ///
    /// Startup failures: [`BridgeError::BusDisconnected`] when the broker
    /// refuses or drops the connection before acknowledging it,
    /// [`BridgeError::Bus`] when subscribing fails, or the connector's error
    /// (usually [`BridgeError::DiscoveryFailed`]).  The lifecycle ends in
    /// [`BridgeState::Failed`].  Once running, every outcome is an
    /// `Ok(ShutdownReason)`.
    pub async fn run<S>(
        self,
        source: S,
        shutdown: CancellationToken,
    ) -> Result<ShutdownReason, BridgeError>
    where
        S: EventSource + 'static,
    {
        let channel = Arc::new(CommandChannel::new(self.topics.clone()));
        let (link_tx, mut link) = watch::channel(LinkState::Pending);
        let hooks = SupervisorHooks {
            link: link_tx,
            channel: channel.clone(),
        };
        let mux_cancel = CancellationToken::new();
        let mux = tokio::spawn(SocketMultiplexer::new(source, hooks).run(mux_cancel.clone()));

        let session = match self.start(&mut link, &shutdown).await {
            Ok(Startup::Ready(session)) => session,
            Ok(Startup::Interrupted) => {
                info!("shutdown requested during startup");
                self.enter(BridgeState::Disconnecting);
                channel.stop(StopReason::Shutdown);
                self.disconnect_bus(&mut link).await;
                mux_cancel.cancel();
                let _ = mux.await;
                self.enter(BridgeState::Terminated);
                return Ok(ShutdownReason::Signal);
            }
            Err(e) => {
                error!(error = %e, "bridge startup failed");
                channel.stop(StopReason::Shutdown);
                self.disconnect_bus(&mut link).await;
                mux_cancel.cancel();
                let _ = mux.await;
                self.enter(BridgeState::Failed);
                return Err(e);
            }
        };

        let reporter = StateReporter::new(
            self.bus.clone(),
            session.clone(),
            self.topics.clone(),
            self.poll_interval,
        );
        let reporter_cancel = shutdown.child_token();
        let mut reporter_task = {
            let cancel = reporter_cancel.clone();
            tokio::spawn(async move { reporter.run(cancel).await })
        };
        let mut channel_task = {
            let channel = channel.clone();
            let session = session.clone();
            tokio::spawn(async move { channel.run(session).await })
        };

        let (reason, finished) = tokio::select! {
            biased;

            _ = shutdown.cancelled() => (ShutdownReason::Signal, Finished::Neither),
            stopped = &mut channel_task => (channel_outcome(stopped), Finished::Channel),
            result = &mut reporter_task => (reporter_outcome(result), Finished::Reporter),
        };
        info!(?reason, "bridge shutting down");
        self.enter(BridgeState::Disconnecting);

        channel.stop(StopReason::Shutdown);
        reporter_cancel.cancel();
        match finished {
            Finished::Neither => {
                let _ = channel_task.await;
                let _ = reporter_task.await;
            }
            Finished::Channel => {
                let _ = reporter_task.await;
            }
            Finished::Reporter => {
                let _ = channel_task.await;
            }
        }

        let in_flight = channel.in_flight();
        in_flight.close();
        if tokio::time::timeout(self.device_timeout, in_flight.wait())
            .await
            .is_err()
        {
            warn!(pending = in_flight.len(), "in-flight commands abandoned");
        }

        if let Err(e) = session.close().await {
            warn!(error = %e, "device session close failed");
        }

        self.disconnect_bus(&mut link).await;
        mux_cancel.cancel();
        let _ = mux.await;
        self.enter(BridgeState::Terminated);
        Ok(reason)
    }

    async fn start(
        &self,
        link: &mut watch::Receiver<LinkState>,
        shutdown: &CancellationToken,
    ) -> Result<Startup, BridgeError> {
        self.lifecycle.advance(BridgeState::ConnectingBus)?;
        let settled = tokio::select! {
            biased;
            _ = shutdown.cancelled() => return Ok(Startup::Interrupted),
            settled = link_settled(link) => settled,
        };
        if let LinkState::Closed(reason) = settled {
            return Err(BridgeError::BusDisconnected(reason));
        }

        self.lifecycle.advance(BridgeState::Discovering)?;
        self.bus.subscribe(&self.topics.command_filter()).await?;
        let session = tokio::select! {
            biased;
            _ = shutdown.cancelled() => return Ok(Startup::Interrupted),
            session = self.connector.connect() => session?,
        };

        self.lifecycle.advance(BridgeState::Running)?;
        Ok(Startup::Ready(session))
    }

    /// Best effort: request a disconnect and wait a bounded time for the
    /// acknowledgement.  Skipped when the link is already closed.
    async fn disconnect_bus(&self, link: &mut watch::Receiver<LinkState>) {
        if link_closed(link) {
            debug!("bus already closed; skipping disconnect");
            return;
        }
        if let Err(e) = self.bus.disconnect().await {
            warn!(error = %e, "bus disconnect request failed");
            return;
        }

        let acknowledged = tokio::time::timeout(
            self.disconnect_timeout,
            link.wait_for(|state| matches!(state, LinkState::Closed(_))),
        )
        .await;
        match acknowledged {
            Ok(Ok(_)) => debug!("bus disconnect acknowledged"),
            Ok(Err(_)) => debug!("bus multiplexer stopped before acknowledging"),
            Err(_) => warn!(
                timeout = ?self.disconnect_timeout,
                "no disconnect acknowledgement; closing anyway"
            ),
        }
    }

    fn enter(&self, next: BridgeState) {
        if let Err(e) = self.lifecycle.advance(next) {
            warn!(error = %e, "lifecycle transition skipped");
        }
    }
}

fn channel_outcome(stopped: Result<StopReason, JoinError>) -> ShutdownReason {
    match stopped {
        Ok(StopReason::BusClosed(reason)) => ShutdownReason::BusDisconnected(reason),
        Ok(StopReason::Shutdown) => ShutdownReason::ChannelClosed,
        Err(e) => {
            error!(error = %e, "command loop task ended abnormally");
            ShutdownReason::ChannelClosed
        }
    }
}

fn reporter_outcome(result: Result<Result<(), BridgeError>, JoinError>) -> ShutdownReason {
    match result {
        Ok(Err(e)) => ShutdownReason::ReporterFailed(e),
        // The reporter only returns cleanly once its token, a child of the
        // shutdown token, is cancelled.
        Ok(Ok(())) => ShutdownReason::Signal,
        Err(e) => {
            error!(error = %e, "state reporter task ended abnormally");
            ShutdownReason::ReporterFailed(BridgeError::Bus(e.to_string()))
        }
    }
}
