// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The device → node → property hierarchy.
//!
//! Entities are built bottom-up, standalone and without transport side
//! effects, then attached to their parent. A [`Device`] owns the transport
//! session: once connected, it publishes the attributes of its whole tree,
//! keeps the default subscriptions in sync and funnels every metadata change
//! through its state machine.
//!
//! # Examples
//!
//! ```
//! use homie_device::{Device, Node, Property, Topic};
//! use homie_device::types::DataType;
//!
//! # fn example() -> homie_device::Result<()> {
//! let device = Device::builder("dev1")
//!     .name("Weather station")
//!     .implementation("esp32")
//!     .with_node(
//!         Node::builder("outdoor")
//!             .node_type("sensor")
//!             .with_property(
//!                 Property::builder("temperature")
//!                     .data_type(DataType::Float)
//!                     .unit("°C")
//!                     .build()?,
//!             )
//!             .build()?,
//!     )
//!     .build()?;
//!
//! assert_eq!(device.attribute("nodes").as_deref(), Some("outdoor"));
//! assert!(!device.is_connected());
//! # Ok(())
//! # }
//! ```
//!
//! Connecting over MQTT:
//!
//! ```no_run
//! use homie_device::Device;
//! use homie_device::protocol::MqttConfig;
//!
//! # async fn example() -> homie_device::Result<()> {
//! let device = Device::builder("dev1").build()?;
//! let config = MqttConfig::builder().host("192.168.1.50").build()?;
//!
//! device.connect(&config).await?;
//! # Ok(())
//! # }
//! ```

mod entity;
mod lifecycle;
mod node;
mod property;

pub use entity::Topic;
pub use node::{Node, NodeBuilder};
pub use property::{Property, PropertyBuilder};

use std::fmt;
use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use parking_lot::{Mutex, ReentrantMutex, ReentrantMutexGuard, RwLock};

use self::entity::non_empty;
use crate::attribute::{AttributeSnapshot, AttributeStore, DEVICE_KEYS};
use crate::error::{Error, Result};
use crate::protocol::Transport;
use crate::state::DeviceState;
use crate::subscription::{
    BroadcastFn, CallbackResult, CallbackSlot, EntityCallbacks, ErrorFn, Scope,
    SubscriptionRouter,
};
use crate::topic::{self, TopicPath};
use crate::types::{Id, QoS};

/// Version of the Homie convention published as `$homie`.
pub const HOMIE_VERSION: &str = "4.0.0";

/// Default root topic.
pub const DEFAULT_ROOT_TOPIC: &str = "homie";

/// A Homie device: the root of the hierarchy and owner of the transport
/// session.
///
/// `Device` is a cheap handle: clones share the same device.
#[derive(Clone)]
pub struct Device {
    inner: Arc<DeviceInner>,
}

struct DeviceInner {
    id: Id,
    root_topic: String,
    path: TopicPath,
    /// Serializes every mutation of the device and its descendants.
    boundary: ReentrantMutex<()>,
    data: Mutex<DeviceData>,
    nodes: RwLock<IndexMap<Id, Node>>,
    session: RwLock<Option<Arc<dyn Transport>>>,
    router: SubscriptionRouter,
    callbacks: EntityCallbacks<Device>,
    on_broadcast: CallbackSlot<BroadcastFn>,
    on_error: CallbackSlot<ErrorFn>,
}

struct DeviceData {
    name: String,
    implementation: Option<String>,
    extensions: Vec<String>,
    attributes: AttributeStore,
    state: DeviceState,
    connected: bool,
}

enum DeviceUpdate {
    Name(String),
    Implementation(Option<String>),
    Extension(String, String),
}

/// Non-owning link from a node to its device.
#[derive(Default)]
pub(crate) struct WeakDevice(Weak<DeviceInner>);

impl WeakDevice {
    pub(crate) fn upgrade(&self) -> Option<Device> {
        self.0.upgrade().map(|inner| Device { inner })
    }
}

impl Device {
    /// Creates a builder for a device with the given id.
    #[must_use]
    pub fn builder(id: impl Into<String>) -> DeviceBuilder {
        DeviceBuilder::new(id)
    }

    /// Returns the position of the device in the topic namespace.
    #[must_use]
    pub fn topic_path(&self) -> &TopicPath {
        &self.inner.path
    }

    /// Returns the root topic, `homie` unless configured otherwise.
    #[must_use]
    pub fn root_topic(&self) -> &str {
        &self.inner.root_topic
    }

    /// Returns the implementation identifier, if any.
    #[must_use]
    pub fn implementation(&self) -> Option<String> {
        self.inner.data.lock().implementation.clone()
    }

    /// Returns the declared Homie extensions.
    #[must_use]
    pub fn extensions(&self) -> Vec<String> {
        self.inner.data.lock().extensions.clone()
    }

    /// Returns the current lifecycle state.
    #[must_use]
    pub fn state(&self) -> DeviceState {
        self.inner.data.lock().state
    }

    /// Returns the nodes in attachment order.
    #[must_use]
    pub fn nodes(&self) -> Vec<Node> {
        self.inner.nodes.read().values().cloned().collect()
    }

    /// Returns the node with the given id.
    #[must_use]
    pub fn node(&self, id: &str) -> Option<Node> {
        self.inner.nodes.read().get(id).cloned()
    }

    /// Attaches a node to this device.
    ///
    /// Attaching a node that already belongs to this device is a no-op.
    /// On a connected device the node and its properties are published
    /// inside an `init` cycle, their default subscriptions are installed,
    /// `$nodes` is republished and `on_connect` runs for the node, then for
    /// its properties.
    ///
    /// # Errors
    ///
    /// Returns `Error::AlreadyAttached` if the node belongs to another
    /// device, `Error::DuplicateChild` if the id is taken, or the publish
    /// error. On error the node is left detached.
    pub fn add_node(&self, node: &Node) -> Result<()> {
        let _boundary = self.lock();
        if !node.claim_parent(self)? {
            return Ok(());
        }
        {
            let mut nodes = self.inner.nodes.write();
            if nodes.contains_key(node.id()) {
                node.release_parent();
                return Err(Error::DuplicateChild {
                    parent: self.inner.id.to_string(),
                    child: node.id().to_string(),
                });
            }
            nodes.insert(node.id().clone(), node.clone());
        }
        if !self.has_session() {
            return Ok(());
        }

        let result = self.init_cycle(|| {
            node.publish_subtree(self)?;
            self.reconcile_defaults()?;
            self.publish_snapshot(&self.inner.path, &self.snapshot())?;
            self.notify_connected(false, std::slice::from_ref(node));
            Ok(())
        });
        if let Err(err) = result {
            tracing::warn!(device = %self.inner.id, node = %node.id(), error = %err, "attach rolled back");
            self.inner.nodes.write().shift_remove(node.id());
            node.release_parent();
            node.mark_subtree(false);
            if let Err(err) = self.reconcile_defaults() {
                self.report(&err);
            }
            return Err(err);
        }
        Ok(())
    }

    /// Detaches and returns the node with the given id.
    ///
    /// On a connected device the subscriptions of the node and its
    /// properties are removed and `$nodes` is republished inside an `init`
    /// cycle; the subtree is then marked disconnected and notified
    /// top-down.
    ///
    /// # Errors
    ///
    /// Returns `Error::ChildNotFound` if no such node is attached, or a
    /// transport error. The node is detached in either case once found.
    pub fn remove_node(&self, id: &str) -> Result<Node> {
        let _boundary = self.lock();
        let node = self
            .inner
            .nodes
            .write()
            .shift_remove(id)
            .ok_or_else(|| Error::ChildNotFound {
                parent: self.inner.id.to_string(),
                child: id.to_string(),
            })?;

        let result = if self.has_session() {
            self.init_cycle(|| {
                self.drop_routes(|route| route.scope.within(&node))?;
                self.reconcile_defaults()?;
                self.publish_snapshot(&self.inner.path, &self.snapshot())
            })
        } else {
            Ok(())
        };
        node.release_parent();
        node.cascade_disconnected(self);
        result.map(|()| node)
    }

    /// Sets the callback invoked once the device is published.
    ///
    /// The callback runs in the `init` state; calling
    /// [`Device::set_state`] from it overrides the final `ready`.
    pub fn on_connect<F>(&self, callback: F)
    where
        F: Fn(&Device) -> CallbackResult + Send + Sync + 'static,
    {
        self.inner.callbacks.on_connect.set(Arc::new(callback));
    }

    /// Sets the callback invoked when the device session closes.
    pub fn on_disconnect<F>(&self, callback: F)
    where
        F: Fn(&Device) -> CallbackResult + Send + Sync + 'static,
    {
        self.inner.callbacks.on_disconnect.set(Arc::new(callback));
    }

    /// Sets the callback invoked for messages on the device's own
    /// subscriptions, including broadcasts.
    pub fn on_message<F>(&self, callback: F)
    where
        F: Fn(&Device, &str, &[u8]) -> CallbackResult + Send + Sync + 'static,
    {
        self.inner.callbacks.on_message.set(Arc::new(callback));
    }

    /// Sets the callback invoked for `$broadcast/<level>` messages.
    pub fn on_broadcast<F>(&self, callback: F)
    where
        F: Fn(&Device, &str, &[u8]) -> CallbackResult + Send + Sync + 'static,
    {
        self.inner.on_broadcast.set(Arc::new(callback));
    }

    /// Sets the hook receiving errors that cannot be returned to a caller:
    /// callback failures, malformed `set` payloads and transport losses.
    pub fn on_error<F>(&self, callback: F)
    where
        F: Fn(&Error) + Send + Sync + 'static,
    {
        self.inner.on_error.set(Arc::new(callback));
    }

    /// Returns `true` if both handles refer to the same device.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    // ---- crate internals ----

    pub(crate) fn downgrade(&self) -> WeakDevice {
        WeakDevice(Arc::downgrade(&self.inner))
    }

    /// Takes the mutation boundary.
    pub(crate) fn lock(&self) -> ReentrantMutexGuard<'_, ()> {
        self.inner.boundary.lock()
    }

    pub(crate) fn snapshot(&self) -> AttributeSnapshot {
        let nodes = self
            .inner
            .nodes
            .read()
            .keys()
            .map(Id::as_str)
            .collect::<Vec<_>>()
            .join(",");
        let data = self.inner.data.lock();
        let mut derived = vec![
            ("homie", HOMIE_VERSION.to_string()),
            ("name", data.name.clone()),
            ("nodes", nodes),
            ("extensions", data.extensions.join(",")),
        ];
        if let Some(implementation) = &data.implementation {
            derived.push(("implementation", implementation.clone()));
        }
        data.attributes.snapshot(derived)
    }

    fn parse_update(&self, key: &str, value: &str) -> Result<DeviceUpdate> {
        let update = match key {
            "name" => DeviceUpdate::Name(value.to_string()),
            "implementation" => DeviceUpdate::Implementation(non_empty(value)),
            _ => {
                self.inner.data.lock().attributes.check_key(key)?;
                DeviceUpdate::Extension(key.to_string(), value.to_string())
            }
        };
        Ok(update)
    }

    fn apply(&self, update: DeviceUpdate) -> Result<()> {
        let mut data = self.inner.data.lock();
        match update {
            DeviceUpdate::Name(name) => data.name = name,
            DeviceUpdate::Implementation(implementation) => data.implementation = implementation,
            DeviceUpdate::Extension(key, value) if value.is_empty() => {
                data.attributes.remove(&key);
            }
            DeviceUpdate::Extension(key, value) => data.attributes.set(key, value)?,
        }
        Ok(())
    }
}

impl Topic for Device {
    fn id(&self) -> &Id {
        &self.inner.id
    }

    fn name(&self) -> String {
        self.inner.data.lock().name.clone()
    }

    fn path(&self) -> Option<TopicPath> {
        Some(self.inner.path.clone())
    }

    fn is_connected(&self) -> bool {
        self.inner.data.lock().connected
    }

    fn attributes(&self) -> AttributeSnapshot {
        self.snapshot()
    }

    fn publish(&self, topic: &str, payload: &[u8], qos: QoS, retain: bool) -> Result<()> {
        self.send(&self.inner.path.join(topic), payload, qos, retain)
    }

    fn subscribe(&self, pattern: &str, qos: QoS) -> Result<()> {
        let _boundary = self.lock();
        self.add_user_route(Scope::Device, pattern, qos)
    }

    fn unsubscribe(&self, pattern: &str) -> Result<()> {
        let _boundary = self.lock();
        self.remove_user_route(Scope::Device, pattern)
    }

    fn update_attribute_with<F>(&self, key: &str, value: &str, callback: F) -> Result<()>
    where
        F: FnOnce() -> CallbackResult,
    {
        let update = self.parse_update(key, value)?;
        let _boundary = self.lock();
        self.init_cycle(|| {
            callback().map_err(Error::Callback)?;
            let before = self.snapshot();
            self.apply(update)?;
            tracing::debug!(device = %self.inner.id, key, "attribute updated");
            if self.has_session() {
                self.publish_snapshot_change(&self.inner.path, &before, &self.snapshot())
            } else {
                Ok(())
            }
        })
    }

    fn disconnect(&self) -> Result<()> {
        self.shutdown()
    }
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let nodes: Vec<String> = self
            .inner
            .nodes
            .read()
            .keys()
            .map(ToString::to_string)
            .collect();
        f.debug_struct("Device")
            .field("id", &self.inner.id)
            .field("root_topic", &self.inner.root_topic)
            .field("state", &self.state())
            .field("nodes", &nodes)
            .finish_non_exhaustive()
    }
}

/// Builder for [`Device`].
#[derive(Debug)]
pub struct DeviceBuilder {
    id: String,
    name: Option<String>,
    root_topic: String,
    implementation: Option<String>,
    extensions: Vec<String>,
    attributes: Vec<(String, String)>,
    nodes: Vec<Node>,
}

impl DeviceBuilder {
    fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            root_topic: DEFAULT_ROOT_TOPIC.to_string(),
            implementation: None,
            extensions: Vec::new(),
            attributes: Vec::new(),
            nodes: Vec::new(),
        }
    }

    /// Sets the display name (default: the id).
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets the root topic (default: `homie`).
    #[must_use]
    pub fn root_topic(mut self, root_topic: impl Into<String>) -> Self {
        self.root_topic = root_topic.into();
        self
    }

    /// Sets the `$implementation` attribute.
    #[must_use]
    pub fn implementation(mut self, implementation: impl Into<String>) -> Self {
        self.implementation = Some(implementation.into());
        self
    }

    /// Declares a Homie extension, such as `org.homie.legacy-stats:0.1.1:[4.x]`.
    #[must_use]
    pub fn extension(mut self, extension: impl Into<String>) -> Self {
        self.extensions.push(extension.into());
        self
    }

    /// Adds an extension attribute.
    #[must_use]
    pub fn attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.push((key.into(), value.into()));
        self
    }

    /// Attaches a node at construction.
    #[must_use]
    pub fn with_node(mut self, node: Node) -> Self {
        self.nodes.push(node);
        self
    }

    /// Builds the device and attaches its nodes.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidIdentifier` for a malformed id or root topic,
    /// `Error::InvalidAttributeKey` for a reserved extension key, and the
    /// errors of [`Device::add_node`].
    pub fn build(self) -> Result<Device> {
        let id = Id::new(self.id)?;
        topic::validate_root(&self.root_topic)?;
        let mut attributes = AttributeStore::new(DEVICE_KEYS);
        for (key, value) in self.attributes {
            attributes.set(key, value)?;
        }

        let device = Device {
            inner: Arc::new(DeviceInner {
                path: TopicPath::device(&self.root_topic, &id),
                data: Mutex::new(DeviceData {
                    name: self.name.unwrap_or_else(|| id.to_string()),
                    implementation: self.implementation,
                    extensions: self.extensions,
                    attributes,
                    state: DeviceState::default(),
                    connected: false,
                }),
                id,
                root_topic: self.root_topic,
                boundary: ReentrantMutex::new(()),
                nodes: RwLock::new(IndexMap::new()),
                session: RwLock::new(None),
                router: SubscriptionRouter::new(),
                callbacks: EntityCallbacks::new(),
                on_broadcast: CallbackSlot::new(),
                on_error: CallbackSlot::new(),
            }),
        };
        for node in &self.nodes {
            device.add_node(node)?;
        }
        Ok(device)
    }
}
