// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Operations shared by devices, nodes and properties.

use crate::attribute::AttributeSnapshot;
use crate::error::{Error, Result};
use crate::subscription::CallbackResult;
use crate::topic::TopicPath;
use crate::types::{DataType, Id, PropertyValue, QoS};

use super::Device;

/// An entity of the Homie hierarchy.
///
/// Implemented by [`Device`], [`super::Node`] and [`super::Property`]. Topics
/// passed to these methods are relative to the entity: a property publishing
/// on `""` targets its own value topic, a device subscribing to
/// `n1/+/set` receives writes to every property of node `n1`.
pub trait Topic {
    /// Returns the entity identifier.
    fn id(&self) -> &Id;

    /// Returns the display name.
    fn name(&self) -> String;

    /// Returns the absolute position of the entity, or `None` while it is
    /// not attached below a device.
    fn path(&self) -> Option<TopicPath>;

    /// Returns `true` once the entity's attributes are published on a live
    /// session.
    fn is_connected(&self) -> bool;

    /// Returns the attributes as they are published.
    fn attributes(&self) -> AttributeSnapshot;

    /// Returns a single published attribute.
    fn attribute(&self, key: &str) -> Option<String> {
        self.attributes().get(key).map(ToString::to_string)
    }

    /// Publishes `payload` on a topic relative to the entity.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotConnected` if no device session is reachable, or
    /// `Error::Transport` if the transport rejects the request.
    fn publish(&self, topic: &str, payload: &[u8], qos: QoS, retain: bool) -> Result<()>;

    /// Subscribes to a pattern relative to the entity.
    ///
    /// Matching messages are delivered to the entity's `on_message` callback
    /// with the topic relative to the entity.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidIdentifier` for malformed patterns,
    /// `Error::NotConnected` without a device session, or `Error::Transport`.
    fn subscribe(&self, pattern: &str, qos: QoS) -> Result<()>;

    /// Removes a subscription made with [`Topic::subscribe`].
    ///
    /// # Errors
    ///
    /// Returns `Error::NotConnected` without a device session, or
    /// `Error::Transport`.
    fn unsubscribe(&self, pattern: &str) -> Result<()>;

    /// Changes an attribute and republishes the entity's attributes.
    ///
    /// See [`Topic::update_attribute_with`].
    ///
    /// # Errors
    ///
    /// See [`Topic::update_attribute_with`].
    fn update_attribute(&self, key: &str, value: &str) -> Result<()> {
        self.update_attribute_with(key, value, || Ok(()))
    }

    /// Changes an attribute, running `callback` first.
    ///
    /// On a connected device the change happens inside an `init` cycle:
    /// the device enters `init`, `callback` runs, the value is applied, the
    /// entity's attributes are republished and the previous state is
    /// restored. Detached or disconnected entities apply the change locally.
    ///
    /// An empty value clears optional attributes such as `unit`.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidAttributeKey` for derived keys (`nodes`,
    /// `properties`, ...), `Error::InvalidValue` for unparsable values,
    /// `Error::Callback` if `callback` fails, or `Error::Transport`. The
    /// device state is restored in every case.
    fn update_attribute_with<F>(&self, key: &str, value: &str, callback: F) -> Result<()>
    where
        F: FnOnce() -> CallbackResult;

    /// Leaves the hierarchy.
    ///
    /// A device closes its session. Nodes and properties detach from their
    /// parent.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotAttached` for a detached node or property, or the
    /// first transport failure met while tearing down.
    fn disconnect(&self) -> Result<()>;
}

/// Runs `body` with the mutation boundary of the entity's device held.
///
/// `locate` finds the current device; it is checked again once the lock is
/// taken so a concurrent re-parenting cannot slip in between.
pub(crate) fn with_boundary<R>(
    locate: impl Fn() -> Option<Device>,
    body: impl FnOnce(Option<&Device>) -> Result<R>,
) -> Result<R> {
    loop {
        let Some(device) = locate() else {
            return body(None);
        };
        let _boundary = device.lock();
        if locate().is_some_and(|current| current.ptr_eq(&device)) {
            return body(Some(&device));
        }
    }
}

/// Parses a `true`/`false` attribute value.
pub(crate) fn parse_flag(value: &str) -> Result<bool> {
    let flag = PropertyValue::parse(DataType::Boolean, value)?;
    Ok(flag.as_bool().unwrap_or_default())
}

/// Maps an empty attribute value to `None`.
pub(crate) fn non_empty(value: &str) -> Option<String> {
    (!value.is_empty()).then(|| value.to_string())
}

/// Stores the first error of a teardown sequence that keeps going.
pub(crate) fn keep_first(first: &mut Option<Error>, result: Result<()>) {
    if let Err(err) = result {
        tracing::warn!(error = %err, "teardown step failed");
        first.get_or_insert(err);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_are_strict() {
        assert!(parse_flag("true").unwrap());
        assert!(!parse_flag("false").unwrap());
        assert!(matches!(parse_flag("yes"), Err(Error::InvalidValue(_))));
        assert!(parse_flag("True").is_err());
    }

    #[test]
    fn empty_values_clear() {
        assert_eq!(non_empty(""), None);
        assert_eq!(non_empty("°C"), Some("°C".to_string()));
    }

    #[test]
    fn keep_first_error() {
        let mut first = None;
        keep_first(&mut first, Ok(()));
        keep_first(&mut first, Err(Error::NotConnected));
        keep_first(&mut first, Err(Error::InvalidState("init".to_string())));
        assert!(matches!(first, Some(Error::NotConnected)));
    }

    #[test]
    fn boundary_without_device_runs_body() {
        let result = with_boundary(|| None, |device| Ok(device.is_none()));
        assert!(result.unwrap());
    }
}
