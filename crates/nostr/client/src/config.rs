//! Client configuration.

use std::env;
use std::time::Duration;

use nostr::nightly::DEFAULT_RELAY_URL;
use thiserror::Error;

pub const ENV_RELAY_URL: &str = "SLEEP_GUARDIAN_RELAY_URL";
pub const ENV_CONNECT_TIMEOUT_MS: &str = "SLEEP_GUARDIAN_CONNECT_TIMEOUT_MS";
pub const ENV_ACK_TIMEOUT_MS: &str = "SLEEP_GUARDIAN_ACK_TIMEOUT_MS";
pub const ENV_ACK_MODE: &str = "SLEEP_GUARDIAN_ACK_MODE";
pub const ENV_VERIFY_INCOMING: &str = "SLEEP_GUARDIAN_VERIFY_INCOMING";
pub const ENV_EVENT_CHANNEL_CAPACITY: &str = "SLEEP_GUARDIAN_EVENT_CHANNEL_CAPACITY";

/// When `publish` counts as successful.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AckMode {
    /// Wait for the relay's `OK` frame and fail on rejection.
    #[default]
    WaitForOk,
    /// Succeed once the `EVENT` frame has been written.
    SendOnly,
}

/// Relay client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub relay_url: String,
    /// Upper bound on the WebSocket handshake. `None` waits indefinitely.
    pub connect_timeout: Option<Duration>,
    /// Upper bound on waiting for `OK` after publishing. `None` waits indefinitely.
    pub ack_timeout: Option<Duration>,
    pub ack_mode: AckMode,
    /// Drop incoming events whose id or signature does not verify.
    pub verify_incoming: bool,
    /// Buffer size for channel-backed subscriptions.
    pub event_channel_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            relay_url: DEFAULT_RELAY_URL.to_string(),
            connect_timeout: None,
            ack_timeout: None,
            ack_mode: AckMode::WaitForOk,
            verify_incoming: true,
            event_channel_capacity: 1000,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid SLEEP_GUARDIAN_CONNECT_TIMEOUT_MS: {0}")]
    InvalidConnectTimeout(String),
    #[error("invalid SLEEP_GUARDIAN_ACK_TIMEOUT_MS: {0}")]
    InvalidAckTimeout(String),
    #[error("invalid SLEEP_GUARDIAN_ACK_MODE: {0}")]
    InvalidAckMode(String),
    #[error("invalid SLEEP_GUARDIAN_VERIFY_INCOMING: {0}")]
    InvalidVerifyIncoming(String),
    #[error("invalid SLEEP_GUARDIAN_EVENT_CHANNEL_CAPACITY: {0}")]
    InvalidEventChannelCapacity(String),
}

impl ClientConfig {
    /// Config for a given relay with every other field at its default.
    pub fn for_relay(relay_url: impl Into<String>) -> Self {
        Self {
            relay_url: relay_url.into(),
            ..Self::default()
        }
    }

    /// Read overrides from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build config from an arbitrary key lookup; unset or blank keys keep defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let defaults = Self::default();

        let relay_url = read(ENV_RELAY_URL).unwrap_or(defaults.relay_url);
        let connect_timeout = read(ENV_CONNECT_TIMEOUT_MS)
            .map(|value| parse_millis(&value).map_err(ConfigError::InvalidConnectTimeout))
            .transpose()?;
        let ack_timeout = read(ENV_ACK_TIMEOUT_MS)
            .map(|value| parse_millis(&value).map_err(ConfigError::InvalidAckTimeout))
            .transpose()?;
        let ack_mode = read(ENV_ACK_MODE)
            .map(|value| parse_ack_mode(&value))
            .transpose()?
            .unwrap_or(defaults.ack_mode);
        let verify_incoming = read(ENV_VERIFY_INCOMING)
            .map(|value| parse_bool(&value).ok_or(ConfigError::InvalidVerifyIncoming(value)))
            .transpose()?
            .unwrap_or(defaults.verify_incoming);
        let event_channel_capacity = match read(ENV_EVENT_CHANNEL_CAPACITY) {
            Some(value) => match value.parse::<usize>() {
                Ok(0) => {
                    return Err(ConfigError::InvalidEventChannelCapacity(
                        "must be greater than zero".to_string(),
                    ));
                }
                Ok(capacity) => capacity,
                Err(error) => {
                    return Err(ConfigError::InvalidEventChannelCapacity(error.to_string()));
                }
            },
            None => defaults.event_channel_capacity,
        };

        Ok(Self {
            relay_url,
            connect_timeout,
            ack_timeout,
            ack_mode,
            verify_incoming,
            event_channel_capacity,
        })
    }
}

fn parse_millis(value: &str) -> Result<Duration, String> {
    value
        .parse::<u64>()
        .map(Duration::from_millis)
        .map_err(|error| error.to_string())
}

fn parse_ack_mode(value: &str) -> Result<AckMode, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "wait_for_ok" | "ok" => Ok(AckMode::WaitForOk),
        "send_only" | "none" => Ok(AckMode::SendOnly),
        other => Err(ConfigError::InvalidAckMode(other.to_string())),
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| ((*key).to_string(), (*value).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn empty_environment_yields_defaults() -> Result<(), ConfigError> {
        let config = ClientConfig::from_lookup(lookup(&[]))?;
        assert_eq!(config.relay_url, DEFAULT_RELAY_URL);
        assert_eq!(config.connect_timeout, None);
        assert_eq!(config.ack_timeout, None);
        assert_eq!(config.ack_mode, AckMode::WaitForOk);
        assert!(config.verify_incoming);
        assert_eq!(config.event_channel_capacity, 1000);
        Ok(())
    }

    #[test]
    fn overrides_are_applied() -> Result<(), ConfigError> {
        let config = ClientConfig::from_lookup(lookup(&[
            (ENV_RELAY_URL, " wss://relay.example "),
            (ENV_CONNECT_TIMEOUT_MS, "2500"),
            (ENV_ACK_TIMEOUT_MS, "750"),
            (ENV_ACK_MODE, "SEND_ONLY"),
            (ENV_VERIFY_INCOMING, "off"),
            (ENV_EVENT_CHANNEL_CAPACITY, "16"),
        ]))?;
        assert_eq!(config.relay_url, "wss://relay.example");
        assert_eq!(config.connect_timeout, Some(Duration::from_millis(2500)));
        assert_eq!(config.ack_timeout, Some(Duration::from_millis(750)));
        assert_eq!(config.ack_mode, AckMode::SendOnly);
        assert!(!config.verify_incoming);
        assert_eq!(config.event_channel_capacity, 16);
        Ok(())
    }

    #[test]
    fn blank_values_keep_defaults() -> Result<(), ConfigError> {
        let config = ClientConfig::from_lookup(lookup(&[(ENV_RELAY_URL, "   ")]))?;
        assert_eq!(config.relay_url, DEFAULT_RELAY_URL);
        Ok(())
    }

    #[test]
    fn invalid_values_are_reported() {
        let cases: [(&str, &str, &str); 5] = [
            (ENV_CONNECT_TIMEOUT_MS, "soon", ENV_CONNECT_TIMEOUT_MS),
            (ENV_ACK_TIMEOUT_MS, "-5", ENV_ACK_TIMEOUT_MS),
            (ENV_ACK_MODE, "maybe", ENV_ACK_MODE),
            (ENV_VERIFY_INCOMING, "perhaps", ENV_VERIFY_INCOMING),
            (ENV_EVENT_CHANNEL_CAPACITY, "0", ENV_EVENT_CHANNEL_CAPACITY),
        ];

        for (key, value, fragment) in cases {
            let result = ClientConfig::from_lookup(lookup(&[(key, value)]));
            assert!(result.is_err(), "{key}={value}: expected an error");
            if let Err(error) = result {
                assert!(
                    error.to_string().contains(fragment),
                    "{key}={value}: expected '{fragment}' in '{error}'"
                );
            }
        }
    }
}
