//! [`CommandChannel`] – single-slot mailbox between the bus and the device.
//!
//! The command loop ([`CommandChannel::run`]) opens one *pending slot* at a
//! time and waits on it.  The bus side ([`CommandChannel::notify`]) hands an
//! inbound message to whichever slot is open.  Slots travel through a
//! capacity-1 channel of `oneshot` senders, so:
//!
//! * at most one waiter exists, and a new slot is only opened after the
//!   previous one resolved;
//! * a message that arrives while no slot is open is dropped and reported
//!   as [`NotifyOutcome::DroppedNoWaiter`] rather than queued;
//! * after [`CommandChannel::stop`] the slot channel is closed and every
//!   further message is reported as [`NotifyOutcome::DroppedClosed`].
//!
//! Accepted messages in the `<prefix>/set/` namespace are parsed into a
//! [`Command`] and dispatched on a [`TaskTracker`], so a slow device call
//! never holds up the next admission.  Admission is FIFO; completion order
//! of dispatches is not guaranteed.

use std::sync::{Arc, Mutex, MutexGuard};

use altherma_hal::{DeviceSession, DispatchOutcome, dispatch};
use altherma_types::{Command, CommandKind, InboundMessage};
use tokio::sync::mpsc::{self, error::TryRecvError};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, trace, warn};

use crate::topics::TopicScheme;

type Slot = oneshot::Sender<InboundMessage>;

/// What [`CommandChannel::notify`] did with a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyOutcome {
    /// Handed to the waiting command loop.
    Delivered,
    /// No slot was open.
    DroppedNoWaiter,
    /// The channel has been stopped.
    DroppedClosed,
}

/// Why [`CommandChannel::run`] returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// Stopped as part of an orderly shutdown.
    Shutdown,
    /// The bus connection went away.
    BusClosed(String),
}

pub struct CommandChannel {
    topics: TopicScheme,
    slot_tx: mpsc::Sender<Slot>,
    slot_rx: Mutex<mpsc::Receiver<Slot>>,
    stopped: CancellationToken,
    reason: Mutex<Option<StopReason>>,
    dispatches: TaskTracker,
}

impl CommandChannel {
    pub fn new(topics: TopicScheme) -> Self {
        let (slot_tx, slot_rx) = mpsc::channel(1);
        Self {
            topics,
            slot_tx,
            slot_rx: Mutex::new(slot_rx),
            stopped: CancellationToken::new(),
            reason: Mutex::new(None),
            dispatches: TaskTracker::new(),
        }
    }

    /// Accept messages until [`stop`][Self::stop] is called.
    pub async fn run(&self, session: Arc<dyn DeviceSession>) -> StopReason {
        info!(filter = %self.topics.command_filter(), "command loop started");
        loop {
            let (slot, delivery) = oneshot::channel();
            if self.slot_tx.try_send(slot).is_err() {
                break;
            }

            tokio::select! {
                biased;

                _ = self.stopped.cancelled() => break,

                received = delivery => match received {
                    Ok(message) => self.accept(message, &session),
                    Err(_) => break,
                },
            }
        }

        self.close_slots();
        let reason = self.stop_reason();
        info!(?reason, "command loop stopped");
        reason
    }

    /// Deliver `message` to the open slot, if there is one.  Never fails.
    pub fn notify(&self, message: InboundMessage) -> NotifyOutcome {
        let slot = match lock(&self.slot_rx).try_recv() {
            Ok(slot) => slot,
            Err(TryRecvError::Empty) => {
                debug!(topic = %message.topic, "no command waiter; message dropped");
                return NotifyOutcome::DroppedNoWaiter;
            }
            Err(TryRecvError::Disconnected) => {
                trace!(topic = %message.topic, "command channel stopped; message dropped");
                return NotifyOutcome::DroppedClosed;
            }
        };

        match slot.send(message) {
            Ok(()) => NotifyOutcome::Delivered,
            Err(message) => {
                debug!(topic = %message.topic, "command waiter gone; message dropped");
                NotifyOutcome::DroppedNoWaiter
            }
        }
    }

    /// End the command loop.  The first reason given wins; later calls are
    /// no-ops.
    pub fn stop(&self, reason: StopReason) {
        {
            let mut current = lock(&self.reason);
            if current.is_none() {
                *current = Some(reason);
            }
        }
        self.close_slots();
        self.stopped.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.is_cancelled()
    }

    /// Tracker holding every dispatch spawned by the loop.
    pub fn in_flight(&self) -> TaskTracker {
        self.dispatches.clone()
    }

    fn close_slots(&self) {
        let mut slots = lock(&self.slot_rx);
        slots.close();
        while slots.try_recv().is_ok() {}
    }

    fn stop_reason(&self) -> StopReason {
        lock(&self.reason).clone().unwrap_or(StopReason::Shutdown)
    }

    fn accept(&self, message: InboundMessage, session: &Arc<dyn DeviceSession>) {
        let InboundMessage { topic, payload, .. } = message;
        let Some(name) = self.topics.command_name(&topic) else {
            trace!(topic = %topic, "not a command topic");
            return;
        };
        let Some(kind) = CommandKind::from_name(name) else {
            debug!(command = name, "unknown command ignored");
            return;
        };
        let Ok(payload) = String::from_utf8(payload) else {
            warn!(command = name, "command payload is not UTF-8");
            return;
        };

        let command = match Command::parse(kind, &payload) {
            Ok(Some(command)) => command,
            Ok(None) => {
                debug!(command = name, payload = %payload, "payload ignored");
                return;
            }
            Err(e) => {
                warn!(error = %e, "command rejected");
                return;
            }
        };

        let session = Arc::clone(session);
        self.dispatches.spawn(async move {
            let name = command.kind().name();
            match dispatch(session.as_ref(), command).await {
                Ok(DispatchOutcome::Applied) => debug!(command = name, "command applied"),
                Ok(DispatchOutcome::SkippedTankOff) => {}
                Err(e) => warn!(command = name, error = %e, "command failed"),
            }
        });
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
