//! Bus client: the request half shared by publishers, backed by rumqttc.
//!
//! [`connect`] splits an MQTT connection into an [`MqttClient`] (cloneable,
//! implements [`BusClient`]) and an [`MqttEventSource`] that owns the rumqttc
//! event loop and is driven by the
//! [`SocketMultiplexer`][crate::multiplexer::SocketMultiplexer].  No packet
//! leaves the process until the event source is polled, so the connection
//! attempt starts when the multiplexer starts.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use altherma_types::{BridgeError, InboundMessage};
use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS};
use tokio::time::Instant;
use tracing::trace;

use crate::multiplexer::{EventSource, Housekeeper, HousekeepingStatus, SocketEvent};

/// Capacity of the request queue between [`MqttClient`] and the event loop.
const REQUEST_CAPACITY: usize = 10;

/// Request half of a bus connection.
#[async_trait]
pub trait BusClient: Send + Sync {
    async fn subscribe(&self, filter: &str) -> Result<(), BridgeError>;

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), BridgeError>;

    /// Ask the broker to close the connection.  The acknowledgement arrives
    /// as [`SocketEvent::Closed`] on the event source.
    async fn disconnect(&self) -> Result<(), BridgeError>;
}

/// Broker connection parameters.
#[derive(Clone, PartialEq, Eq)]
pub struct MqttSettings {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub keep_alive: Duration,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Default for MqttSettings {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            client_id: "altherma_mqtt".to_string(),
            keep_alive: Duration::from_secs(60),
            username: None,
            password: None,
        }
    }
}

impl std::fmt::Debug for MqttSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MqttSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("client_id", &self.client_id)
            .field("keep_alive", &self.keep_alive)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl MqttSettings {
    fn options(&self) -> MqttOptions {
        let mut options = MqttOptions::new(&self.client_id, &self.host, self.port);
        options.set_keep_alive(self.keep_alive);
        if let Some(username) = &self.username {
            options.set_credentials(username, self.password.as_deref().unwrap_or_default());
        }
        options
    }
}

/// Split a new MQTT connection into its request and I/O halves.
pub fn connect(settings: &MqttSettings) -> (MqttClient, MqttEventSource) {
    let (client, eventloop) = AsyncClient::new(settings.options(), REQUEST_CAPACITY);
    let source = MqttEventSource {
        eventloop,
        keep_alive: Arc::new(KeepAlive {
            period: settings.keep_alive,
            last_inbound: Mutex::new(Instant::now()),
            closed: AtomicBool::new(false),
        }),
    };
    (MqttClient { client }, source)
}

/// Request half of an MQTT connection.
///
/// Publishes use QoS 0 without the retain flag.
#[derive(Clone)]
pub struct MqttClient {
    client: AsyncClient,
}

#[async_trait]
impl BusClient for MqttClient {
    async fn subscribe(&self, filter: &str) -> Result<(), BridgeError> {
        self.client
            .subscribe(filter, QoS::AtMostOnce)
            .await
            .map_err(|e| BridgeError::Bus(format!("subscribe to {filter}: {e}")))
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), BridgeError> {
        self.client
            .publish(topic, QoS::AtMostOnce, false, payload)
            .await
            .map_err(|e| BridgeError::Bus(format!("publish to {topic}: {e}")))
    }

    async fn disconnect(&self) -> Result<(), BridgeError> {
        self.client
            .disconnect()
            .await
            .map_err(|e| BridgeError::Bus(format!("disconnect: {e}")))
    }
}

/// I/O half of an MQTT connection.
pub struct MqttEventSource {
    eventloop: EventLoop,
    keep_alive: Arc<KeepAlive>,
}

/// Keep-alive bookkeeping shared between the event source and the
/// multiplexer's housekeeping tick.
///
/// Reports [`HousekeepingStatus::NoConnection`] once the socket is closed and
/// [`HousekeepingStatus::KeepAliveExpired`] when nothing was received from the
/// broker for one and a half keep-alive periods.  A zero keep-alive disables
/// the expiry check.
struct KeepAlive {
    period: Duration,
    last_inbound: Mutex<Instant>,
    closed: AtomicBool,
}

impl KeepAlive {
    fn received(&self) {
        *self
            .last_inbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Instant::now();
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

impl Housekeeper for KeepAlive {
    fn housekeeping(&self) -> HousekeepingStatus {
        let silent_for = self
            .last_inbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .elapsed();
        if self.closed.load(Ordering::Acquire) {
            HousekeepingStatus::NoConnection
        } else if !self.period.is_zero() && silent_for > self.period.mul_f64(1.5) {
            HousekeepingStatus::KeepAliveExpired
        } else {
            HousekeepingStatus::Success
        }
    }
}

#[async_trait]
impl EventSource for MqttEventSource {
    async fn next_event(&mut self) -> SocketEvent {
        match self.eventloop.poll().await {
            Ok(Event::Incoming(packet)) => {
                self.keep_alive.received();
                match packet {
                    Packet::ConnAck(_) => SocketEvent::Connected,
                    Packet::Publish(publish) => SocketEvent::Message(InboundMessage::new(
                        publish.topic,
                        publish.payload.to_vec(),
                    )),
                    other => {
                        trace!(packet = ?other, "incoming packet");
                        SocketEvent::Activity
                    }
                }
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                self.keep_alive.close();
                SocketEvent::Closed("disconnect acknowledged".to_string())
            }
            Ok(Event::Outgoing(Outgoing::Publish(_))) => SocketEvent::Flushed,
            Ok(Event::Outgoing(_)) => SocketEvent::Activity,
            Err(e) => {
                self.keep_alive.close();
                SocketEvent::Closed(e.to_string())
            }
        }
    }

    fn housekeeper(&self) -> Arc<dyn Housekeeper> {
        self.keep_alive.clone()
    }
}
