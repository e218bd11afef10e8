//! Runtime configuration of one bridge process.

use std::time::Duration;

use altherma_middleware::{MqttSettings, TopicScheme};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_DEVICE_TIMEOUT: Duration = Duration::from_secs(3);
/// Upper bound on the wait for the broker's disconnect acknowledgement.
pub const DISCONNECT_ACK_TIMEOUT: Duration = Duration::from_secs(5);

/// Everything the supervisor needs to run the bridge.
///
/// `Debug` output goes through [`MqttSettings`], which redacts the password.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub mqtt: MqttSettings,
    pub topics: TopicScheme,
    /// Target period of the state reporter.
    pub poll_interval: Duration,
    /// LAN adapter host, as `host` or `host:port`.
    pub device_host: String,
    /// Bound on each device request, and on draining in-flight commands at
    /// shutdown.
    pub device_timeout: Duration,
}

impl BridgeConfig {
    pub fn new(device_host: impl Into<String>) -> Self {
        Self {
            mqtt: MqttSettings::default(),
            topics: TopicScheme::default(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            device_host: device_host.into(),
            device_timeout: DEFAULT_DEVICE_TIMEOUT,
        }
    }
}
