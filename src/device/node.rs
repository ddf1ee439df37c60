// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Nodes: groups of related properties within a device.

use std::fmt;
use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};

use super::entity::{Topic, non_empty, with_boundary};
use super::property::Property;
use super::{Device, WeakDevice};
use crate::attribute::{AttributeSnapshot, AttributeStore, NODE_KEYS};
use crate::error::{Error, Result};
use crate::subscription::{CallbackResult, EntityCallbacks, Scope};
use crate::topic::TopicPath;
use crate::types::{Id, QoS};

/// A node of a device, grouping properties.
///
/// `Node` is a cheap handle: clones share the same node.
///
/// # Examples
///
/// ```
/// use homie_device::{Node, Property, Topic};
///
/// let node = Node::builder("thermostat")
///     .name("Living room thermostat")
///     .node_type("thermostat")
///     .with_property(Property::builder("temperature").build().unwrap())
///     .build()
///     .unwrap();
///
/// assert_eq!(node.attribute("properties").as_deref(), Some("temperature"));
/// ```
#[derive(Clone)]
pub struct Node {
    inner: Arc<NodeInner>,
}

struct NodeInner {
    id: Id,
    data: Mutex<NodeData>,
    device: RwLock<WeakDevice>,
    properties: RwLock<IndexMap<Id, Property>>,
    callbacks: EntityCallbacks<Node>,
}

struct NodeData {
    name: String,
    node_type: Option<String>,
    attributes: AttributeStore,
    connected: bool,
}

enum NodeUpdate {
    Name(String),
    Type(Option<String>),
    Extension(String, String),
}

/// Non-owning link from a property to its node.
#[derive(Default)]
pub(crate) struct WeakNode(Weak<NodeInner>);

impl WeakNode {
    pub(crate) fn upgrade(&self) -> Option<Node> {
        self.0.upgrade().map(|inner| Node { inner })
    }
}

impl Node {
    /// Creates a builder for a node with the given id.
    #[must_use]
    pub fn builder(id: impl Into<String>) -> NodeBuilder {
        NodeBuilder::new(id)
    }

    /// Returns the node type, if any.
    #[must_use]
    pub fn node_type(&self) -> Option<String> {
        self.inner.data.lock().node_type.clone()
    }

    /// Returns the properties in attachment order.
    #[must_use]
    pub fn properties(&self) -> Vec<Property> {
        self.inner.properties.read().values().cloned().collect()
    }

    /// Returns the property with the given id.
    #[must_use]
    pub fn property(&self, id: &str) -> Option<Property> {
        self.inner.properties.read().get(id).cloned()
    }

    /// Returns the device this node is attached to.
    #[must_use]
    pub fn device(&self) -> Option<Device> {
        self.inner.device.read().upgrade()
    }

    /// Attaches this node to `device`.
    ///
    /// Equivalent to [`Device::add_node`].
    ///
    /// # Errors
    ///
    /// See [`Device::add_node`].
    pub fn connect(&self, device: &Device) -> Result<()> {
        device.add_node(self)
    }

    /// Attaches a property to this node.
    ///
    /// Attaching a property that already belongs to this node is a no-op.
    /// Under a connected device the property is published inside an `init`
    /// cycle, its `set` subscription is installed, the node's `$properties`
    /// is republished and the property's `on_connect` callback runs.
    ///
    /// # Errors
    ///
    /// Returns `Error::AlreadyAttached` if the property belongs to another
    /// node, `Error::DuplicateChild` if the id is taken, or the publish
    /// error. On error the property is left detached.
    pub fn add_property(&self, property: &Property) -> Result<()> {
        with_boundary(
            || self.device(),
            |device| {
                if !property.claim_parent(self)? {
                    return Ok(());
                }
                {
                    let mut properties = self.inner.properties.write();
                    if properties.contains_key(property.id()) {
                        property.release_parent();
                        return Err(Error::DuplicateChild {
                            parent: self.inner.id.to_string(),
                            child: property.id().to_string(),
                        });
                    }
                    properties.insert(property.id().clone(), property.clone());
                }

                let Some(device) = device.filter(|device| device.has_session()) else {
                    return Ok(());
                };
                let result = device.init_cycle(|| {
                    property.publish_all(device)?;
                    device.reconcile_defaults()?;
                    if let Some(path) = self.path() {
                        device.publish_snapshot(&path, &self.snapshot())?;
                    }
                    if let Err(err) = property.fire_connect() {
                        device.report(&Error::Callback(err));
                    }
                    Ok(())
                });
                if let Err(err) = result {
                    tracing::warn!(node = %self.inner.id, property = %property.id(), error = %err, "attach rolled back");
                    self.inner.properties.write().shift_remove(property.id());
                    property.release_parent();
                    property.set_connected(false);
                    if let Err(err) = device.reconcile_defaults() {
                        device.report(&err);
                    }
                    return Err(err);
                }
                Ok(())
            },
        )
    }

    /// Detaches and returns the property with the given id.
    ///
    /// Under a connected device the property's subscriptions are removed and
    /// the node's `$properties` is republished inside an `init` cycle, then
    /// the property is marked disconnected and notified.
    ///
    /// # Errors
    ///
    /// Returns `Error::ChildNotFound` if no such property is attached, or a
    /// transport error. The property is detached in either case once found.
    pub fn remove_property(&self, id: &str) -> Result<Property> {
        with_boundary(
            || self.device(),
            |device| {
                let property = self.inner.properties.write().shift_remove(id).ok_or_else(|| {
                    Error::ChildNotFound {
                        parent: self.inner.id.to_string(),
                        child: id.to_string(),
                    }
                })?;
                let Some(device) = device else {
                    property.release_parent();
                    property.set_connected(false);
                    return Ok(property);
                };

                let result = if device.has_session() {
                    device.init_cycle(|| {
                        device.drop_routes(|route| {
                            matches!(&route.scope, Scope::Property(p) if p.ptr_eq(&property))
                        })?;
                        device.reconcile_defaults()?;
                        if let Some(path) = self.path() {
                            device.publish_snapshot(&path, &self.snapshot())?;
                        }
                        Ok(())
                    })
                } else {
                    Ok(())
                };
                property.release_parent();
                property.cascade_disconnected(device);
                result.map(|()| property)
            },
        )
    }

    /// Sets the callback invoked once the node is published.
    pub fn on_connect<F>(&self, callback: F)
    where
        F: Fn(&Node) -> CallbackResult + Send + Sync + 'static,
    {
        self.inner.callbacks.on_connect.set(Arc::new(callback));
    }

    /// Sets the callback invoked when the node leaves a live session.
    pub fn on_disconnect<F>(&self, callback: F)
    where
        F: Fn(&Node) -> CallbackResult + Send + Sync + 'static,
    {
        self.inner.callbacks.on_disconnect.set(Arc::new(callback));
    }

    /// Sets the callback invoked for messages on the node's subscriptions.
    pub fn on_message<F>(&self, callback: F)
    where
        F: Fn(&Node, &str, &[u8]) -> CallbackResult + Send + Sync + 'static,
    {
        self.inner.callbacks.on_message.set(Arc::new(callback));
    }

    /// Returns `true` if both handles refer to the same node.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    // ---- crate internals ----

    pub(crate) fn downgrade(&self) -> WeakNode {
        WeakNode(Arc::downgrade(&self.inner))
    }

    /// Links the node to `device`.
    ///
    /// Returns `Ok(false)` if it already belongs to `device`.
    pub(crate) fn claim_parent(&self, device: &Device) -> Result<bool> {
        let mut parent = self.inner.device.write();
        match parent.upgrade() {
            Some(current) if current.ptr_eq(device) => Ok(false),
            Some(_) => Err(Error::AlreadyAttached(self.inner.id.to_string())),
            None => {
                *parent = device.downgrade();
                Ok(true)
            }
        }
    }

    pub(crate) fn release_parent(&self) {
        *self.inner.device.write() = WeakDevice::default();
    }

    pub(crate) fn set_connected(&self, connected: bool) -> bool {
        std::mem::replace(&mut self.inner.data.lock().connected, connected)
    }

    /// Marks the node and its properties connected or not, without
    /// notifications.
    pub(crate) fn mark_subtree(&self, connected: bool) {
        self.set_connected(connected);
        for property in self.properties() {
            property.set_connected(connected);
        }
    }

    pub(crate) fn snapshot(&self) -> AttributeSnapshot {
        let properties = self
            .inner
            .properties
            .read()
            .keys()
            .map(Id::as_str)
            .collect::<Vec<_>>()
            .join(",");
        let data = self.inner.data.lock();
        let mut derived = vec![("name", data.name.clone())];
        if let Some(node_type) = &data.node_type {
            derived.push(("type", node_type.clone()));
        }
        derived.push(("properties", properties));
        data.attributes.snapshot(derived)
    }

    /// Publishes the node attributes, then every property, in order.
    pub(crate) fn publish_subtree(&self, device: &Device) -> Result<()> {
        let Some(path) = self.path() else {
            return Ok(());
        };
        device.publish_snapshot(&path, &self.snapshot())?;
        self.set_connected(true);
        for property in self.properties() {
            property.publish_all(device)?;
        }
        Ok(())
    }

    pub(crate) fn fire_connect(&self) -> CallbackResult {
        self.inner.callbacks.connected(self)
    }

    pub(crate) fn fire_message(&self, topic: &str, payload: &[u8]) -> CallbackResult {
        self.inner.callbacks.message(self, topic, payload)
    }

    /// Marks the node and its properties disconnected, notifying those that
    /// were connected, top-down.
    pub(crate) fn cascade_disconnected(&self, device: &Device) {
        if self.set_connected(false)
            && let Err(err) = self.inner.callbacks.disconnected(self)
        {
            device.report(&Error::Callback(err));
        }
        for property in self.properties() {
            property.cascade_disconnected(device);
        }
    }

    fn parse_update(&self, key: &str, value: &str) -> Result<NodeUpdate> {
        let update = match key {
            "name" => NodeUpdate::Name(value.to_string()),
            "type" => NodeUpdate::Type(non_empty(value)),
            _ => {
                self.inner.data.lock().attributes.check_key(key)?;
                NodeUpdate::Extension(key.to_string(), value.to_string())
            }
        };
        Ok(update)
    }

    fn apply(&self, update: NodeUpdate) -> Result<()> {
        let mut data = self.inner.data.lock();
        match update {
            NodeUpdate::Name(name) => data.name = name,
            NodeUpdate::Type(node_type) => data.node_type = node_type,
            NodeUpdate::Extension(key, value) if value.is_empty() => {
                data.attributes.remove(&key);
            }
            NodeUpdate::Extension(key, value) => data.attributes.set(key, value)?,
        }
        Ok(())
    }
}

impl Topic for Node {
    fn id(&self) -> &Id {
        &self.inner.id
    }

    fn name(&self) -> String {
        self.inner.data.lock().name.clone()
    }

    fn path(&self) -> Option<TopicPath> {
        self.device().map(|device| device.topic_path().child(&self.inner.id))
    }

    fn is_connected(&self) -> bool {
        self.inner.data.lock().connected
    }

    fn attributes(&self) -> AttributeSnapshot {
        self.snapshot()
    }

    fn publish(&self, topic: &str, payload: &[u8], qos: QoS, retain: bool) -> Result<()> {
        let device = self.device().ok_or(Error::NotConnected)?;
        let path = device.topic_path().child(&self.inner.id);
        device.send(&path.join(topic), payload, qos, retain)
    }

    fn subscribe(&self, pattern: &str, qos: QoS) -> Result<()> {
        with_boundary(
            || self.device(),
            |device| {
                let device = device.ok_or(Error::NotConnected)?;
                device.add_user_route(Scope::Node(self.clone()), pattern, qos)
            },
        )
    }

    fn unsubscribe(&self, pattern: &str) -> Result<()> {
        with_boundary(
            || self.device(),
            |device| {
                let device = device.ok_or(Error::NotConnected)?;
                device.remove_user_route(Scope::Node(self.clone()), pattern)
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
                    self.apply(update)?;
                    tracing::debug!(node = %self.inner.id, key, "attribute updated");
                    match (device, self.path()) {
                        (Some(device), Some(path)) if device.has_session() => {
                            device.publish_snapshot_change(&path, &before, &self.snapshot())
                        }
                        _ => Ok(()),
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
        let device = self
            .device()
            .ok_or_else(|| Error::NotAttached(self.inner.id.to_string()))?;
        device.remove_node(self.inner.id.as_str()).map(|_| ())
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let properties: Vec<String> = self
            .inner
            .properties
            .read()
            .keys()
            .map(ToString::to_string)
            .collect();
        f.debug_struct("Node")
            .field("id", &self.inner.id)
            .field("properties", &properties)
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}

/// Builder for [`Node`].
#[derive(Debug)]
pub struct NodeBuilder {
    id: String,
    name: Option<String>,
    node_type: Option<String>,
    attributes: Vec<(String, String)>,
    properties: Vec<Property>,
}

impl NodeBuilder {
    fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            node_type: None,
            attributes: Vec::new(),
            properties: Vec::new(),
        }
    }

    /// Sets the display name (default: the id).
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets the node type.
    #[must_use]
    pub fn node_type(mut self, node_type: impl Into<String>) -> Self {
        self.node_type = Some(node_type.into());
        self
    }

    /// Adds an extension attribute.
    #[must_use]
    pub fn attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.push((key.into(), value.into()));
        self
    }

    /// Attaches a property at construction.
    #[must_use]
    pub fn with_property(mut self, property: Property) -> Self {
        self.properties.push(property);
        self
    }

    /// Builds the node and attaches its properties.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidIdentifier` for a malformed id,
    /// `Error::InvalidAttributeKey` for a reserved extension key, and the
    /// errors of [`Node::add_property`].
    pub fn build(self) -> Result<Node> {
        let id = Id::new(self.id)?;
        let mut attributes = AttributeStore::new(NODE_KEYS);
        for (key, value) in self.attributes {
            attributes.set(key, value)?;
        }
        let node = Node {
            inner: Arc::new(NodeInner {
                data: Mutex::new(NodeData {
                    name: self.name.unwrap_or_else(|| id.to_string()),
                    node_type: self.node_type,
                    attributes,
                    connected: false,
                }),
                id,
                device: RwLock::new(WeakDevice::default()),
                properties: RwLock::new(IndexMap::new()),
                callbacks: EntityCallbacks::new(),
            }),
        };
        for property in &self.properties {
            node.add_property(property)?;
        }
        Ok(node)
    }
}
