//! Bridge configuration from `ALTHERMA_*` environment variables.
//!
//! | Variable | Config field | Default |
//! |---|---|---|
//! | `ALTHERMA_HOST` | `device_host` | required |
//! | `ALTHERMA_TIMEOUT` | `device_timeout` (seconds) | `3` |
//! | `ALTHERMA_POLL_INTERVAL` | `poll_interval` (seconds) | `5` |
//! | `ALTHERMA_MQTT_HOST` | `mqtt.host` | `localhost` |
//! | `ALTHERMA_MQTT_PORT` | `mqtt.port` | `1883` |
//! | `ALTHERMA_MQTT_CLIENT_ID` | `mqtt.client_id` | `altherma_mqtt` |
//! | `ALTHERMA_MQTT_KEEPALIVE` | `mqtt.keep_alive` (seconds, `0` disables, at most 65535) | `60` |
//! | `ALTHERMA_MQTT_USERNAME` | `mqtt.username` | unset |
//! | `ALTHERMA_MQTT_PASSWORD` | `mqtt.password`, only with a username | unset |
//! | `ALTHERMA_MQTT_TOPIC_PREFIX` | topic prefix | `altherma` |
//! | `ALTHERMA_MQTT_ONETOPIC` | single-topic name; empty means unset | unset |
//!
//! Numeric values that do not parse are logged and the default is kept.

use std::str::FromStr;
use std::time::Duration;

use altherma_middleware::TopicScheme;
use altherma_runtime::BridgeConfig;
use altherma_types::BridgeError;
use tracing::warn;

/// Load the configuration from the process environment.
pub fn from_env() -> Result<BridgeConfig, BridgeError> {
    load_from(|name| std::env::var(name).ok())
}

/// Load the configuration through `lookup`, which maps a variable name to
/// its value.
///
/// # Errors
///
/// [`BridgeError::Config`] when `ALTHERMA_HOST` is missing or empty.
pub fn load_from(lookup: impl Fn(&str) -> Option<String>) -> Result<BridgeConfig, BridgeError> {
    let host = lookup("ALTHERMA_HOST")
        .map(|h| h.trim().to_string())
        .filter(|h| !h.is_empty())
        .ok_or_else(|| BridgeError::Config("ALTHERMA_HOST is not set".to_string()))?;
    let mut cfg = BridgeConfig::new(host);

    if let Some(v) = lookup("ALTHERMA_TIMEOUT")
        && let Some(timeout) = seconds("ALTHERMA_TIMEOUT", &v)
    {
        cfg.device_timeout = timeout;
    }
    if let Some(v) = lookup("ALTHERMA_POLL_INTERVAL")
        && let Some(period) = seconds("ALTHERMA_POLL_INTERVAL", &v)
    {
        cfg.poll_interval = period;
    }

    if let Some(v) = lookup("ALTHERMA_MQTT_HOST") {
        cfg.mqtt.host = v;
    }
    if let Some(v) = lookup("ALTHERMA_MQTT_PORT")
        && let Some(port) = number::<u16>("ALTHERMA_MQTT_PORT", &v)
    {
        cfg.mqtt.port = port;
    }
    if let Some(v) = lookup("ALTHERMA_MQTT_CLIENT_ID") {
        cfg.mqtt.client_id = v;
    }
    if let Some(v) = lookup("ALTHERMA_MQTT_KEEPALIVE")
        && let Some(secs) = number::<u16>("ALTHERMA_MQTT_KEEPALIVE", &v)
    {
        cfg.mqtt.keep_alive = Duration::from_secs(u64::from(secs));
    }
    if let Some(username) = lookup("ALTHERMA_MQTT_USERNAME") {
        cfg.mqtt.username = Some(username);
        cfg.mqtt.password = lookup("ALTHERMA_MQTT_PASSWORD");
    }

    let mut topics = match lookup("ALTHERMA_MQTT_TOPIC_PREFIX") {
        Some(prefix) => TopicScheme::new(prefix),
        None => TopicScheme::default(),
    };
    if let Some(name) = lookup("ALTHERMA_MQTT_ONETOPIC").filter(|n| !n.trim().is_empty()) {
        topics = topics.with_single_topic(name);
    }
    cfg.topics = topics;

    Ok(cfg)
}

fn number<T: FromStr>(name: &str, value: &str) -> Option<T> {
    match value.trim().parse() {
        Ok(n) => Some(n),
        Err(_) => {
            warn!(variable = name, value, "ignoring unparseable value");
            None
        }
    }
}

/// Positive, finite seconds as a [`Duration`].
fn seconds(name: &str, value: &str) -> Option<Duration> {
    let secs = number::<f64>(name, value)?;
    match Duration::try_from_secs_f64(secs) {
        Ok(d) if !d.is_zero() => Some(d),
        _ => {
            warn!(variable = name, value, "ignoring non-positive duration");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<BridgeConfig, BridgeError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        load_from(|name| vars.get(name).cloned())
    }

    #[test]
    fn missing_host_is_a_config_error() {
        assert!(matches!(load(&[]), Err(BridgeError::Config(_))));
        assert!(matches!(
            load(&[("ALTHERMA_HOST", "  ")]),
            Err(BridgeError::Config(_))
        ));
    }

    #[test]
    fn defaults_apply_with_only_a_host() {
        let cfg = load(&[("ALTHERMA_HOST", "192.168.1.50")]).unwrap();
        assert_eq!(cfg.device_host, "192.168.1.50");
        assert_eq!(cfg.device_timeout, Duration::from_secs(3));
        assert_eq!(cfg.poll_interval, Duration::from_secs(5));
        assert_eq!(cfg.mqtt.host, "localhost");
        assert_eq!(cfg.mqtt.port, 1883);
        assert_eq!(cfg.mqtt.client_id, "altherma_mqtt");
        assert_eq!(cfg.mqtt.keep_alive, Duration::from_secs(60));
        assert_eq!(cfg.mqtt.username, None);
        assert_eq!(cfg.topics.command_filter(), "altherma/set/#");
        assert_eq!(cfg.topics.single_topic(), None);
    }

    #[test]
    fn every_variable_is_applied() {
        let cfg = load(&[
            ("ALTHERMA_HOST", "hp.lan"),
            ("ALTHERMA_TIMEOUT", "1.5"),
            ("ALTHERMA_POLL_INTERVAL", "10"),
            ("ALTHERMA_MQTT_HOST", "broker.lan"),
            ("ALTHERMA_MQTT_PORT", "8883"),
            ("ALTHERMA_MQTT_CLIENT_ID", "bridge-2"),
            ("ALTHERMA_MQTT_KEEPALIVE", "30"),
            ("ALTHERMA_MQTT_USERNAME", "bridge"),
            ("ALTHERMA_MQTT_PASSWORD", "s3cret"),
            ("ALTHERMA_MQTT_TOPIC_PREFIX", "heatpump"),
            ("ALTHERMA_MQTT_ONETOPIC", "all"),
        ])
        .unwrap();

        assert_eq!(cfg.device_timeout, Duration::from_millis(1500));
        assert_eq!(cfg.poll_interval, Duration::from_secs(10));
        assert_eq!(cfg.mqtt.host, "broker.lan");
        assert_eq!(cfg.mqtt.port, 8883);
        assert_eq!(cfg.mqtt.client_id, "bridge-2");
        assert_eq!(cfg.mqtt.keep_alive, Duration::from_secs(30));
        assert_eq!(cfg.mqtt.username.as_deref(), Some("bridge"));
        assert_eq!(cfg.mqtt.password.as_deref(), Some("s3cret"));
        assert_eq!(cfg.topics.command_filter(), "heatpump/set/#");
        assert_eq!(cfg.topics.single_topic().as_deref(), Some("heatpump/state/all"));
    }

    #[test]
    fn password_without_username_is_ignored() {
        let cfg = load(&[
            ("ALTHERMA_HOST", "hp.lan"),
            ("ALTHERMA_MQTT_PASSWORD", "s3cret"),
        ])
        .unwrap();
        assert_eq!(cfg.mqtt.password, None);
    }

    #[test]
    fn empty_single_topic_name_keeps_multi_topic_mode() {
        let cfg = load(&[("ALTHERMA_HOST", "hp.lan"), ("ALTHERMA_MQTT_ONETOPIC", "")]).unwrap();
        assert_eq!(cfg.topics.single_topic(), None);
    }

    #[test]
    fn keep_alive_bounds() {
        let disabled = load(&[("ALTHERMA_HOST", "hp.lan"), ("ALTHERMA_MQTT_KEEPALIVE", "0")]).unwrap();
        assert_eq!(disabled.mqtt.keep_alive, Duration::ZERO);

        let too_long =
            load(&[("ALTHERMA_HOST", "hp.lan"), ("ALTHERMA_MQTT_KEEPALIVE", "65536")]).unwrap();
        assert_eq!(too_long.mqtt.keep_alive, Duration::from_secs(60));

        let longest =
            load(&[("ALTHERMA_HOST", "hp.lan"), ("ALTHERMA_MQTT_KEEPALIVE", "65535")]).unwrap();
        assert_eq!(longest.mqtt.keep_alive, Duration::from_secs(65535));
    }

    #[test]
    fn unparseable_numbers_keep_defaults() {
        let cfg = load(&[
            ("ALTHERMA_HOST", "hp.lan"),
            ("ALTHERMA_MQTT_PORT", "eighteen"),
            ("ALTHERMA_MQTT_KEEPALIVE", "-5"),
            ("ALTHERMA_POLL_INTERVAL", "0"),
            ("ALTHERMA_TIMEOUT", "NaN"),
        ])
        .unwrap();
        assert_eq!(cfg.mqtt.port, 1883);
        assert_eq!(cfg.mqtt.keep_alive, Duration::from_secs(60));
        assert_eq!(cfg.poll_interval, Duration::from_secs(5));
        assert_eq!(cfg.device_timeout, Duration::from_secs(3));
    }
}
