// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Transport seam between the device hierarchy and a pub/sub broker.
//!
//! The hierarchy only needs four outbound operations, captured by the
//! [`Transport`] trait. Inbound traffic is pushed into the device through
//! [`crate::Device::handle_message`], [`crate::Device::handle_connection_lost`]
//! and [`crate::Device::handle_reconnected`].
//!
//! # Transports
//!
//! - [`MqttTransport`]: MQTT over `rumqttc` (requires the `mqtt` feature)
//!
//! Any other client can be plugged in through
//! [`crate::Device::connect_with`].

mod config;
#[cfg(feature = "mqtt")]
mod mqtt;

pub use config::{Credentials, MqttConfig, MqttConfigBuilder, ReconnectionPolicy};
#[cfg(feature = "mqtt")]
pub use mqtt::MqttTransport;

use crate::error::TransportError;
use crate::types::QoS;

/// Outbound operations of an open broker session.
///
/// Implementations must not block for long: every call is made while the
/// device's mutation boundary is held. Queueing the request and returning
/// is the expected behavior.
pub trait Transport: Send + Sync {
    /// Publishes `payload` on an absolute `topic`.
    ///
    /// # Errors
    ///
    /// Returns `TransportError` if the request cannot be queued.
    fn publish(
        &self,
        topic: &str,
        payload: &[u8],
        qos: QoS,
        retain: bool,
    ) -> Result<(), TransportError>;

    /// Subscribes to an absolute topic filter.
    ///
    /// # Errors
    ///
    /// Returns `TransportError` if the request cannot be queued.
    fn subscribe(&self, pattern: &str, qos: QoS) -> Result<(), TransportError>;

    /// Removes a subscription made with [`Transport::subscribe`].
    ///
    /// # Errors
    ///
    /// Returns `TransportError` if the request cannot be queued.
    fn unsubscribe(&self, pattern: &str) -> Result<(), TransportError>;

    /// Closes the session cleanly, without triggering the last will.
    ///
    /// # Errors
    ///
    /// Returns `TransportError` if the request cannot be queued.
    fn disconnect(&self) -> Result<(), TransportError>;
}
