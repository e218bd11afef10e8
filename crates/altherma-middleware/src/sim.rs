//! In-memory bus for testing without a broker.
//!
//! [`SimBus::channel`] returns the two halves of a simulated client: the
//! [`SimBus`] request half records every subscribe, publish and disconnect,
//! and the [`SimEventSource`] I/O half replays whatever socket events the
//! test injects.  Disconnecting queues the close acknowledgement a real
//! broker connection would produce, unless disabled with
//! [`SimBus::ignore_disconnect`].

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use altherma_types::{BridgeError, InboundMessage};
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::client::BusClient;
use crate::multiplexer::{EventSource, Housekeeper, HousekeepingStatus, SocketEvent};

/// One recorded publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Published {
    pub topic: String,
    pub payload: String,
    pub at: Instant,
}

/// Request half of the simulated client.
pub struct SimBus {
    feed: mpsc::UnboundedSender<SocketEvent>,
    publishes: Mutex<Vec<Published>>,
    subscriptions: Mutex<Vec<String>>,
    disconnects: AtomicUsize,
    ack_disconnect: AtomicBool,
    fail_publish: AtomicBool,
    housekeeping_calls: AtomicUsize,
    housekeeping_status: Mutex<HousekeepingStatus>,
}

impl SimBus {
    pub fn channel() -> (Arc<SimBus>, SimEventSource) {
        let (feed, events) = mpsc::unbounded_channel();
        let bus = Arc::new(SimBus {
            feed,
            publishes: Mutex::default(),
            subscriptions: Mutex::default(),
            disconnects: AtomicUsize::new(0),
            ack_disconnect: AtomicBool::new(true),
            fail_publish: AtomicBool::new(false),
            housekeeping_calls: AtomicUsize::new(0),
            housekeeping_status: Mutex::new(HousekeepingStatus::Success),
        });
        let source = SimEventSource {
            events,
            bus: bus.clone(),
        };
        (bus, source)
    }

    /// Queue a socket event for the event source.
    pub fn inject(&self, event: SocketEvent) {
        let _ = self.feed.send(event);
    }

    /// Queue the broker's connection acknowledgement.
    pub fn accept_connection(&self) {
        self.inject(SocketEvent::Connected);
    }

    /// Queue an inbound message.
    pub fn deliver(&self, topic: &str, payload: &str) {
        self.inject(SocketEvent::Message(InboundMessage::new(topic, payload)));
    }

    /// Drop the connection as if the broker went away.
    pub fn drop_connection(&self, reason: &str) {
        self.inject(SocketEvent::Closed(reason.to_string()));
    }

    /// Disconnect requests are recorded but never acknowledged.
    pub fn ignore_disconnect(&self) {
        self.ack_disconnect.store(false, Ordering::SeqCst);
    }

    pub fn fail_publishes(&self) {
        self.fail_publish.store(true, Ordering::SeqCst);
    }

    pub fn set_housekeeping_status(&self, status: HousekeepingStatus) {
        *lock(&self.housekeeping_status) = status;
    }

    pub fn publishes(&self) -> Vec<Published> {
        lock(&self.publishes).clone()
    }

    pub fn subscriptions(&self) -> Vec<String> {
        lock(&self.subscriptions).clone()
    }

    pub fn disconnect_calls(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    pub fn housekeeping_calls(&self) -> usize {
        self.housekeeping_calls.load(Ordering::SeqCst)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl BusClient for SimBus {
    async fn subscribe(&self, filter: &str) -> Result<(), BridgeError> {
        lock(&self.subscriptions).push(filter.to_string());
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), BridgeError> {
        if self.fail_publish.load(Ordering::SeqCst) {
            return Err(BridgeError::Bus(format!("publish to {topic} rejected")));
        }
        lock(&self.publishes).push(Published {
            topic: topic.to_string(),
            payload: String::from_utf8_lossy(&payload).into_owned(),
            at: Instant::now(),
        });
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), BridgeError> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        if self.ack_disconnect.load(Ordering::SeqCst) {
            self.inject(SocketEvent::Closed("disconnect acknowledged".to_string()));
        }
        Ok(())
    }
}

/// I/O half of the simulated client.
pub struct SimEventSource {
    events: mpsc::UnboundedReceiver<SocketEvent>,
    bus: Arc<SimBus>,
}

#[async_trait]
impl EventSource for SimEventSource {
    async fn next_event(&mut self) -> SocketEvent {
        // The source holds a bus reference, so the feed never closes.
        match self.events.recv().await {
            Some(event) => event,
            None => SocketEvent::Closed("event feed closed".to_string()),
        }
    }

    fn housekeeper(&self) -> Arc<dyn Housekeeper> {
        self.bus.clone()
    }
}

impl Housekeeper for SimBus {
    fn housekeeping(&self) -> HousekeepingStatus {
        self.housekeeping_calls.fetch_add(1, Ordering::SeqCst);
        *lock(&self.housekeeping_status)
    }
}
