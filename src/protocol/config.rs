// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Broker connection settings.
//!
//! [`MqttConfig`] can be built in code through [`MqttConfig::builder`],
//! parsed from a broker URL, or deserialized from an application's own
//! configuration file. Durations are expressed in whole seconds when
//! deserialized.
//!
//! ```
//! use homie_device::protocol::MqttConfig;
//!
//! let config = MqttConfig::from_url("mqtt://broker.local:1884").unwrap();
//! assert_eq!(config.host(), "broker.local");
//! assert_eq!(config.port(), 1884);
//! ```

use std::time::Duration;

use serde::{Deserialize, Deserializer};
use uuid::Uuid;

use crate::error::TransportError;
use crate::types::Id;

/// Broker username and password.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Credentials {
    /// User name.
    pub username: String,
    /// Password.
    pub password: String,
}

/// Configuration for an MQTT broker connection.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    host: String,
    port: u16,
    credentials: Option<Credentials>,
    client_id: Option<String>,
    #[serde(deserialize_with = "secs")]
    keep_alive: Duration,
    #[serde(deserialize_with = "secs")]
    connection_timeout: Duration,
    request_capacity: usize,
    reconnection: ReconnectionPolicy,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 1883,
            credentials: None,
            client_id: None,
            keep_alive: Duration::from_secs(30),
            connection_timeout: Duration::from_secs(10),
            request_capacity: 256,
            reconnection: ReconnectionPolicy::default(),
        }
    }
}

impl MqttConfig {
    /// Creates a new builder with default settings.
    #[must_use]
    pub fn builder() -> MqttConfigBuilder {
        MqttConfigBuilder::default()
    }

    /// Creates a configuration from a broker URL such as
    /// `mqtt://192.168.1.50:1883`.
    ///
    /// The `mqtt://` and `tcp://` schemes are accepted, and the port
    /// defaults to 1883.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::InvalidAddress` if the port is not a number
    /// or the host is empty.
    pub fn from_url(url: &str) -> Result<Self, TransportError> {
        let (host, port) = parse_mqtt_url(url)?;
        Self::builder().host(host).port(port).build()
    }

    /// Returns the broker host.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Returns the broker port.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Returns the credentials, if configured.
    #[must_use]
    pub fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }

    /// Returns the configured client id.
    #[must_use]
    pub fn client_id(&self) -> Option<&str> {
        self.client_id.as_deref()
    }

    /// Returns the keep-alive interval.
    #[must_use]
    pub fn keep_alive(&self) -> Duration {
        self.keep_alive
    }

    /// Returns the time allowed for the broker to acknowledge the connection.
    #[must_use]
    pub fn connection_timeout(&self) -> Duration {
        self.connection_timeout
    }

    /// Returns the capacity of the client's request channel.
    #[must_use]
    pub fn request_capacity(&self) -> usize {
        self.request_capacity
    }

    /// Returns the reconnection policy.
    #[must_use]
    pub fn reconnection(&self) -> &ReconnectionPolicy {
        &self.reconnection
    }

    /// Returns the configured client id, or generates one for `device`.
    pub(crate) fn client_id_for(&self, device: &Id) -> String {
        self.client_id.clone().unwrap_or_else(|| {
            let suffix = Uuid::new_v4().simple().to_string();
            format!("homie-{device}-{}", &suffix[..8])
        })
    }

    fn validate(&self) -> Result<(), TransportError> {
        if self.host.is_empty() {
            return Err(TransportError::InvalidAddress(
                "MQTT broker host is required".to_string(),
            ));
        }
        if self.request_capacity == 0 {
            return Err(TransportError::InvalidAddress(
                "request capacity must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Builder for [`MqttConfig`].
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use homie_device::protocol::{MqttConfig, ReconnectionPolicy};
///
/// let config = MqttConfig::builder()
///     .host("192.168.1.50")
///     .port(1883)
///     .credentials("user", "password")
///     .keep_alive(Duration::from_secs(60))
///     .reconnection(ReconnectionPolicy::disabled())
///     .build()
///     .unwrap();
/// assert!(config.credentials().is_some());
/// ```
#[derive(Debug, Default)]
pub struct MqttConfigBuilder {
    config: MqttConfig,
}

impl MqttConfigBuilder {
    /// Sets the broker host address.
    #[must_use]
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.host = host.into();
        self
    }

    /// Sets the broker port (default: 1883).
    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    /// Sets authentication credentials.
    #[must_use]
    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.config.credentials = Some(Credentials {
            username: username.into(),
            password: password.into(),
        });
        self
    }

    /// Sets the MQTT client id (default: `homie-<device>-<random>`).
    #[must_use]
    pub fn client_id(mut self, client_id: impl Into<String>) -> Self {
        self.config.client_id = Some(client_id.into());
        self
    }

    /// Sets the keep-alive interval (default: 30 seconds).
    #[must_use]
    pub fn keep_alive(mut self, duration: Duration) -> Self {
        self.config.keep_alive = duration;
        self
    }

    /// Sets the connection timeout (default: 10 seconds).
    #[must_use]
    pub fn connection_timeout(mut self, duration: Duration) -> Self {
        self.config.connection_timeout = duration;
        self
    }

    /// Sets the capacity of the client's request channel (default: 256).
    ///
    /// Requests beyond it wait in the session's own queue until the event
    /// loop catches up.
    #[must_use]
    pub fn request_capacity(mut self, capacity: usize) -> Self {
        self.config.request_capacity = capacity;
        self
    }

    /// Sets the reconnection policy.
    #[must_use]
    pub fn reconnection(mut self, policy: ReconnectionPolicy) -> Self {
        self.config.reconnection = policy;
        self
    }

    /// Validates and returns the configuration.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::InvalidAddress` if the host is not set or the
    /// request capacity is zero.
    pub fn build(self) -> Result<MqttConfig, TransportError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Configuration for automatic reconnection after a lost session.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use homie_device::protocol::ReconnectionPolicy;
///
/// let policy = ReconnectionPolicy::new()
///     .with_max_retries(5)
///     .with_initial_delay(Duration::from_millis(500))
///     .with_max_delay(Duration::from_secs(30));
/// assert!(policy.should_retry(4));
/// assert!(!policy.should_retry(5));
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReconnectionPolicy {
    /// Whether automatic reconnection is enabled.
    pub enabled: bool,
    /// Maximum number of consecutive retries (None = infinite).
    pub max_retries: Option<u32>,
    /// Initial delay between retry attempts.
    #[serde(deserialize_with = "secs")]
    pub initial_delay: Duration,
    /// Maximum delay between retry attempts.
    #[serde(deserialize_with = "secs")]
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f32,
}

impl ReconnectionPolicy {
    /// Creates a new reconnection policy with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a disabled reconnection policy.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Sets the maximum number of retries.
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    /// Sets infinite retries.
    #[must_use]
    pub fn with_infinite_retries(mut self) -> Self {
        self.max_retries = None;
        self
    }

    /// Sets the initial delay between retry attempts.
    #[must_use]
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay between retry attempts.
    #[must_use]
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff multiplier.
    #[must_use]
    pub fn with_backoff_multiplier(mut self, multiplier: f32) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Calculates the delay before retry `attempt` (0-based).
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return self.initial_delay;
        }

        let multiplier = self
            .backoff_multiplier
            .powi(i32::try_from(attempt).unwrap_or(i32::MAX));

        #[allow(clippy::cast_precision_loss)]
        let delay_ms = self.initial_delay.as_millis() as f32 * multiplier;

        // Saturating float to int cast; negative or NaN becomes zero
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let delay = Duration::from_millis(delay_ms as u64);

        delay.min(self.max_delay)
    }

    /// Returns true if retry `attempt` (0-based) should be made.
    #[must_use]
    pub fn should_retry(&self, attempt: u32) -> bool {
        self.enabled && self.max_retries.is_none_or(|max| attempt < max)
    }
}

impl Default for ReconnectionPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            max_retries: None,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
        }
    }
}

fn secs<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    u64::deserialize(deserializer).map(Duration::from_secs)
}

/// Splits a broker URL into host and port.
fn parse_mqtt_url(url: &str) -> Result<(String, u16), TransportError> {
    let url = url
        .strip_prefix("mqtt://")
        .or_else(|| url.strip_prefix("tcp://"))
        .unwrap_or(url);

    let (host, port) = if let Some((h, p)) = url.rsplit_once(':') {
        let port = p
            .parse()
            .map_err(|_| TransportError::InvalidAddress(format!("Invalid port: {p}")))?;
        (h.to_string(), port)
    } else {
        (url.to_string(), 1883)
    };

    Ok((host, port))
}
