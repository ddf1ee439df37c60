// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Properties: typed values exposed by a node.

use std::fmt;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use super::entity::{Topic, non_empty, parse_flag, with_boundary};
use super::node::{Node, WeakNode};
use super::Device;
use crate::attribute::{AttributeSnapshot, AttributeStore, PROPERTY_KEYS};
use crate::error::{Error, Result};
use crate::subscription::{CallbackResult, CallbackSlot, EntityCallbacks, Scope, SetFn};
use crate::topic::TopicPath;
use crate::types::{DataType, Id, PropertyValue, QoS};

/// A property of a node, such as a temperature reading or a switch.
///
/// `Property` is a cheap handle: clones share the same property.
///
/// # Examples
///
/// ```
/// use homie_device::{Property, Topic};
/// use homie_device::types::DataType;
///
/// let property = Property::builder("temperature")
///     .name("Temperature")
///     .data_type(DataType::Float)
///     .format("-40:120")
///     .unit("°C")
///     .value(21.5)
///     .build()
///     .unwrap();
///
/// assert_eq!(property.attribute("datatype").as_deref(), Some("float"));
/// assert!(property.set_value(200.0).is_err());
/// ```
#[derive(Clone)]
pub struct Property {
    inner: Arc<PropertyInner>,
}

struct PropertyInner {
    id: Id,
    data: Mutex<PropertyData>,
    node: RwLock<WeakNode>,
    callbacks: EntityCallbacks<Property>,
    on_set: CallbackSlot<SetFn>,
}

struct PropertyData {
    name: String,
    data_type: DataType,
    format: Option<String>,
    settable: bool,
    retained: bool,
    unit: Option<String>,
    value: Option<PropertyValue>,
    attributes: AttributeStore,
    connected: bool,
}

/// A validated attribute change.
enum PropertyUpdate {
    Name(String),
    DataType(DataType),
    Format(Option<String>),
    Settable(bool),
    Retained(bool),
    Unit(Option<String>),
    Extension(String, String),
}

/// What an applied change requires besides republishing the attributes.
#[derive(Default)]
struct UpdateEffects {
    value_changed: bool,
    settable_changed: bool,
}

impl Property {
    /// Creates a builder for a property with the given id.
    #[must_use]
    pub fn builder(id: impl Into<String>) -> PropertyBuilder {
        PropertyBuilder::new(id)
    }

    /// Returns the data type.
    #[must_use]
    pub fn data_type(&self) -> DataType {
        self.inner.data.lock().data_type
    }

    /// Returns the format, if any.
    #[must_use]
    pub fn format(&self) -> Option<String> {
        self.inner.data.lock().format.clone()
    }

    /// Returns `true` if the property accepts `set` requests.
    #[must_use]
    pub fn settable(&self) -> bool {
        self.inner.data.lock().settable
    }

    /// Returns `true` if the value is published as a retained message.
    #[must_use]
    pub fn retained(&self) -> bool {
        self.inner.data.lock().retained
    }

    /// Returns the unit, if any.
    #[must_use]
    pub fn unit(&self) -> Option<String> {
        self.inner.data.lock().unit.clone()
    }

    /// Returns the current value.
    #[must_use]
    pub fn value(&self) -> Option<PropertyValue> {
        self.inner.data.lock().value.clone()
    }

    /// Stores a new value and publishes it if it changed.
    ///
    /// The value is converted to the property's data type where possible
    /// (integers widen to floats) and checked against its format.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidValue` if the value does not fit the data type
    /// or format, or `Error::Transport` if publishing fails.
    pub fn set_value(&self, value: impl Into<PropertyValue>) -> Result<()> {
        let value = value.into();
        with_boundary(
            || self.device(),
            |device| {
                let changed = self.store_value(value)?;
                match device {
                    Some(device) if changed && self.is_connected() => self.publish_value(device),
                    _ => Ok(()),
                }
            },
        )
    }

    /// Returns the node this property is attached to.
    #[must_use]
    pub fn node(&self) -> Option<Node> {
        self.inner.node.read().upgrade()
    }

    /// Returns the device this property belongs to.
    #[must_use]
    pub fn device(&self) -> Option<Device> {
        self.node().and_then(|node| node.device())
    }

    /// Attaches this property to `node`.
    ///
    /// Equivalent to [`Node::add_property`].
    ///
    /// # Errors
    ///
    /// See [`Node::add_property`].
    pub fn connect(&self, node: &Node) -> Result<()> {
        node.add_property(self)
    }

    /// Sets the callback invoked once the property is published.
    pub fn on_connect<F>(&self, callback: F)
    where
        F: Fn(&Property) -> CallbackResult + Send + Sync + 'static,
    {
        self.inner.callbacks.on_connect.set(Arc::new(callback));
    }

    /// Sets the callback invoked when the property leaves a live session.
    pub fn on_disconnect<F>(&self, callback: F)
    where
        F: Fn(&Property) -> CallbackResult + Send + Sync + 'static,
    {
        self.inner.callbacks.on_disconnect.set(Arc::new(callback));
    }

    /// Sets the callback invoked for messages on the property's
    /// subscriptions, including `set`.
    pub fn on_message<F>(&self, callback: F)
    where
        F: Fn(&Property, &str, &[u8]) -> CallbackResult + Send + Sync + 'static,
    {
        self.inner.callbacks.on_message.set(Arc::new(callback));
    }

    /// Sets the callback invoked after a `set` request was accepted.
    ///
    /// The new value is already stored (and published) when it runs.
    pub fn on_set<F>(&self, callback: F)
    where
        F: Fn(&Property, &PropertyValue) -> CallbackResult + Send + Sync + 'static,
    {
        self.inner.on_set.set(Arc::new(callback));
    }

    /// Returns `true` if both handles refer to the same property.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    // ---- crate internals ----

    /// Links the property to `node`.
    ///
    /// Returns `Ok(false)` if it already belongs to `node`.
    pub(crate) fn claim_parent(&self, node: &Node) -> Result<bool> {
        let mut parent = self.inner.node.write();
        match parent.upgrade() {
            Some(current) if current.ptr_eq(node) => Ok(false),
            Some(_) => Err(Error::AlreadyAttached(self.inner.id.to_string())),
            None => {
                *parent = node.downgrade();
                Ok(true)
            }
        }
    }

    pub(crate) fn release_parent(&self) {
        *self.inner.node.write() = WeakNode::default();
    }

    pub(crate) fn set_connected(&self, connected: bool) -> bool {
        std::mem::replace(&mut self.inner.data.lock().connected, connected)
    }

    pub(crate) fn snapshot(&self) -> AttributeSnapshot {
        let data = self.inner.data.lock();
        let mut derived = vec![
            ("name", data.name.clone()),
            ("datatype", data.data_type.to_string()),
        ];
        if let Some(format) = &data.format {
            derived.push(("format", format.clone()));
        }
        derived.push(("settable", data.settable.to_string()));
        derived.push(("retained", data.retained.to_string()));
        if let Some(unit) = &data.unit {
            derived.push(("unit", unit.clone()));
        }
        data.attributes.snapshot(derived)
    }

    /// Publishes the attributes and the value, then marks the property
    /// connected.
    pub(crate) fn publish_all(&self, device: &Device) -> Result<()> {
        let Some(path) = self.path() else {
            return Ok(());
        };
        device.publish_snapshot(&path, &self.snapshot())?;
        self.publish_value(device)?;
        self.set_connected(true);
        Ok(())
    }

    pub(crate) fn publish_value(&self, device: &Device) -> Result<()> {
        let Some(path) = self.path() else {
            return Ok(());
        };
        let (payload, retained) = {
            let data = self.inner.data.lock();
            (data.value.as_ref().map(PropertyValue::to_payload), data.retained)
        };
        match payload {
            Some(payload) => {
                device.send(path.absolute(), payload.as_bytes(), QoS::AtLeastOnce, retained)
            }
            None => Ok(()),
        }
    }

    /// Handles an inbound `set` payload.
    pub(crate) fn apply_set(&self, device: &Device, payload: &[u8]) -> Result<PropertyValue> {
        let value = PropertyValue::parse_bytes(self.data_type(), payload)?;
        if self.store_value(value.clone())? && self.is_connected() {
            self.publish_value(device)?;
        }
        tracing::debug!(property = %self.inner.id, value = %value, "set request accepted");
        Ok(value)
    }

    pub(crate) fn fire_connect(&self) -> CallbackResult {
        self.inner.callbacks.connected(self)
    }

    pub(crate) fn fire_disconnect(&self) -> CallbackResult {
        self.inner.callbacks.disconnected(self)
    }

    pub(crate) fn fire_message(&self, topic: &str, payload: &[u8]) -> CallbackResult {
        self.inner.callbacks.message(self, topic, payload)
    }

    pub(crate) fn fire_set(&self, value: &PropertyValue) -> CallbackResult {
        self.inner
            .on_set
            .get()
            .map_or(Ok(()), |callback| callback(self, value))
    }

    /// Marks the property disconnected, notifying it if it was connected.
    pub(crate) fn cascade_disconnected(&self, device: &Device) {
        if self.set_connected(false)
            && let Err(err) = self.fire_disconnect()
        {
            device.report(&Error::Callback(err));
        }
    }

    /// Coerces, validates and stores `value`. Returns `true` if it changed.
    fn store_value(&self, value: PropertyValue) -> Result<bool> {
        let mut data = self.inner.data.lock();
        let value = value.coerce(data.data_type)?;
        value.validate(data.format.as_deref())?;
        if data.value.as_ref() == Some(&value) {
            return Ok(false);
        }
        data.value = Some(value);
        Ok(true)
    }

    fn parse_update(&self, key: &str, value: &str) -> Result<PropertyUpdate> {
        let update = match key {
            "name" => PropertyUpdate::Name(value.to_string()),
            "datatype" => PropertyUpdate::DataType(value.parse()?),
            "format" => PropertyUpdate::Format(non_empty(value)),
            "settable" => PropertyUpdate::Settable(parse_flag(value)?),
            "retained" => PropertyUpdate::Retained(parse_flag(value)?),
            "unit" => PropertyUpdate::Unit(non_empty(value)),
            _ => {
                self.inner.data.lock().attributes.check_key(key)?;
                PropertyUpdate::Extension(key.to_string(), value.to_string())
            }
        };
        Ok(update)
    }

    fn apply(&self, update: PropertyUpdate) -> Result<UpdateEffects> {
        let mut data = self.inner.data.lock();
        let mut effects = UpdateEffects::default();
        match update {
            PropertyUpdate::Name(name) => data.name = name,
            PropertyUpdate::DataType(data_type) => {
                data.data_type = data_type;
                if let Some(old) = data.value.take() {
                    let converted = old
                        .clone()
                        .coerce(data_type)
                        .and_then(|v| v.validate(data.format.as_deref()).map(|()| v));
                    // A value that cannot follow the new type is dropped
                    if let Ok(new) = converted {
                        effects.value_changed = new.to_payload() != old.to_payload();
                        data.value = Some(new);
                    }
                }
            }
            PropertyUpdate::Format(format) => data.format = format,
            PropertyUpdate::Settable(settable) => {
                effects.settable_changed = data.settable != settable;
                data.settable = settable;
            }
            PropertyUpdate::Retained(retained) => data.retained = retained,
            PropertyUpdate::Unit(unit) => data.unit = unit,
            PropertyUpdate::Extension(key, value) if value.is_empty() => {
                data.attributes.remove(&key);
            }
            PropertyUpdate::Extension(key, value) => data.attributes.set(key, value)?,
        }
        Ok(effects)
    }

    fn republish(
        &self,
        device: &Device,
        before: &AttributeSnapshot,
        effects: &UpdateEffects,
    ) -> Result<()> {
        if !device.has_session() {
            return Ok(());
        }
        if let Some(path) = self.path() {
            device.publish_snapshot_change(&path, before, &self.snapshot())?;
        }
        if effects.value_changed {
            self.publish_value(device)?;
        }
        if effects.settable_changed {
            device.reconcile_defaults()?;
        }
        Ok(())
    }
}

impl Topic for Property {
    fn id(&self) -> &Id {
        &self.inner.id
    }

    fn name(&self) -> String {
        self.inner.data.lock().name.clone()
    }

    fn path(&self) -> Option<TopicPath> {
        self.node()?.path().map(|node| node.child(&self.inner.id))
    }

    fn is_connected(&self) -> bool {
        self.inner.data.lock().connected
    }

    fn attributes(&self) -> AttributeSnapshot {
        self.snapshot()
    }

    fn publish(&self, topic: &str, payload: &[u8], qos: QoS, retain: bool) -> Result<()> {
        let device = self.device().ok_or(Error::NotConnected)?;
        let path = self.path().ok_or(Error::NotConnected)?;
        device.send(&path.join(topic), payload, qos, retain)
    }

    fn subscribe(&self, pattern: &str, qos: QoS) -> Result<()> {
        with_boundary(
            || self.device(),
            |device| {
                let device = device.ok_or(Error::NotConnected)?;
                device.add_user_route(Scope::Property(self.clone()), pattern, qos)
            },
        )
    }

    fn unsubscribe(&self, pattern: &str) -> Result<()> {
        with_boundary(
            || self.device(),
            |device| {
                let device = device.ok_or(Error::NotConnected)?;
                device.remove_user_route(Scope::Property(self.clone()), pattern)
            },
        )
    }

    fn update_attribute_with<F>(&self, key: &str, value: &str, callback: F) -> Result<()>
    where
        F: FnOnce() -> CallbackResult,
    {
        let update = self.parse_update(key, value)?;
        with_boundary(
            || self.device(),
            |device| {
                let apply = || {
                    callback().map_err(Error::Callback)?;
                    let before = self.snapshot();
                    let effects = self.apply(update)?;
                    tracing::debug!(property = %self.inner.id, key, "attribute updated");
                    match device {
                        Some(device) => self.republish(device, &before, &effects),
                        None => Ok(()),
                    }
                };
                match device {
                    Some(device) => device.init_cycle(apply),
                    None => apply(),
                }
            },
        )
    }

    fn disconnect(&self) -> Result<()> {
        let node = self
            .node()
            .ok_or_else(|| Error::NotAttached(self.inner.id.to_string()))?;
        node.remove_property(self.inner.id.as_str()).map(|_| ())
    }
}

impl fmt::Debug for Property {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let data = self.inner.data.lock();
        f.debug_struct("Property")
            .field("id", &self.inner.id)
            .field("data_type", &data.data_type)
            .field("value", &data.value)
            .field("settable", &data.settable)
            .field("connected", &data.connected)
            .finish_non_exhaustive()
    }
}

/// Builder for [`Property`].
#[derive(Debug)]
pub struct PropertyBuilder {
    id: String,
    name: Option<String>,
    data_type: DataType,
    format: Option<String>,
    settable: bool,
    retained: bool,
    unit: Option<String>,
    value: Option<PropertyValue>,
    attributes: Vec<(String, String)>,
}

impl PropertyBuilder {
    fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            data_type: DataType::default(),
            format: None,
            settable: false,
            retained: true,
            unit: None,
            value: None,
            attributes: Vec::new(),
        }
    }

    /// Sets the display name (default: the id).
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets the data type (default: `string`).
    #[must_use]
    pub fn data_type(mut self, data_type: DataType) -> Self {
        self.data_type = data_type;
        self
    }

    /// Sets the format, such as `0:100` or `low,medium,high`.
    #[must_use]
    pub fn format(mut self, format: impl Into<String>) -> Self {
        self.format = Some(format.into());
        self
    }

    /// Makes the property accept `set` requests (default: false).
    #[must_use]
    pub fn settable(mut self, settable: bool) -> Self {
        self.settable = settable;
        self
    }

    /// Sets whether the value is retained (default: true).
    #[must_use]
    pub fn retained(mut self, retained: bool) -> Self {
        self.retained = retained;
        self
    }

    /// Sets the unit.
    #[must_use]
    pub fn unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    /// Sets the initial value.
    #[must_use]
    pub fn value(mut self, value: impl Into<PropertyValue>) -> Self {
        self.value = Some(value.into());
        self
    }

    /// Adds an extension attribute.
    #[must_use]
    pub fn attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.push((key.into(), value.into()));
        self
    }

    /// Builds the property.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidIdentifier` for a malformed id,
    /// `Error::InvalidAttributeKey` for a reserved extension key, or
    /// `Error::InvalidValue` if the initial value does not fit.
    pub fn build(self) -> Result<Property> {
        let id = Id::new(self.id)?;
        let mut attributes = AttributeStore::new(PROPERTY_KEYS);
        for (key, value) in self.attributes {
            attributes.set(key, value)?;
        }
        let value = match self.value {
            Some(value) => {
                let value = value.coerce(self.data_type)?;
                value.validate(self.format.as_deref())?;
                Some(value)
            }
            None => None,
        };

        let data = PropertyData {
            name: self.name.unwrap_or_else(|| id.to_string()),
            data_type: self.data_type,
            format: self.format,
            settable: self.settable,
            retained: self.retained,
            unit: self.unit,
            value,
            attributes,
            connected: false,
        };
        Ok(Property {
            inner: Arc::new(PropertyInner {
                id,
                data: Mutex::new(data),
                node: RwLock::new(WeakNode::default()),
                callbacks: EntityCallbacks::new(),
                on_set: CallbackSlot::new(),
            }),
        })
    }
}
