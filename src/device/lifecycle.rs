// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Session handling and the device state machine.
//!
//! ```text
//!                connect
//! disconnected ──────────► init ──► ready ◄──► sleeping / alert
//!       ▲                    ▲        │
//!       │                    └────────┘  attribute update / attach
//!       └──────────────────────────────  disconnect
//! ```
//!
//! Every transition publishes the retained `$state` attribute. Metadata
//! changes on a connected device run inside an `init` cycle: the device
//! enters `init`, applies and republishes the change, then returns to the
//! operational state it left.

use std::sync::Arc;

use super::entity::{Topic, keep_first};
use super::{Device, Node};
use crate::attribute::AttributeSnapshot;
use crate::error::{Error, Result, TransportError};
use crate::protocol::Transport;
use crate::state::DeviceState;
use crate::subscription::{Route, Scope, SubscriptionKind, rules};
use crate::topic::{self, TopicPath};
use crate::types::QoS;

#[cfg(feature = "mqtt")]
use crate::protocol::{MqttConfig, MqttTransport};

const BROADCAST_PREFIX: &str = "$broadcast/";

impl Device {
    /// Connects to an MQTT broker and publishes the device.
    ///
    /// Connecting an already connected device is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `Error::Transport` if the broker cannot be reached, or the
    /// first publish or subscribe failure of [`Device::connect_with`].
    #[cfg(feature = "mqtt")]
    pub async fn connect(&self, config: &MqttConfig) -> Result<()> {
        if self.has_session() {
            return Ok(());
        }
        let transport = Arc::new(MqttTransport::open(config, self).await?);
        if !self.start_session(Arc::clone(&transport) as Arc<dyn Transport>)? {
            // Another caller connected while the broker was answering
            if let Err(err) = transport.disconnect() {
                tracing::debug!(device = %self.id(), error = %err, "surplus session close failed");
            }
        }
        Ok(())
    }

    /// Connects the device over an already open transport session.
    ///
    /// Installs the default subscriptions, enters `init`, publishes the
    /// device attributes followed by each node and its properties in
    /// attachment order, runs the `on_connect` callbacks (device, then
    /// nodes, then properties) and enters `ready`, unless a callback moved
    /// the device to another state with [`Device::set_state`].
    ///
    /// Connecting an already connected device is a no-op.
    ///
    /// # Errors
    ///
    /// Returns the first publish or subscribe failure; the session is then
    /// closed and the device left disconnected.
    pub fn connect_with(&self, transport: Arc<dyn Transport>) -> Result<()> {
        self.start_session(transport).map(|_| ())
    }

    /// Sets the operational state: `ready`, `sleeping` or `alert`.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidState` for `init` and `disconnected`, which
    /// are driven by the device itself, `Error::NotConnected` without a
    /// session, or the publish error.
    pub fn set_state(&self, state: DeviceState) -> Result<()> {
        if !state.is_operational() {
            return Err(Error::InvalidState(state.to_string()));
        }
        let _boundary = self.lock();
        if !self.has_session() {
            return Err(Error::NotConnected);
        }
        self.transition(state)
    }

    /// Returns `true` while a transport session is open.
    #[must_use]
    pub fn has_session(&self) -> bool {
        self.inner.session.read().is_some()
    }

    /// Dispatches an inbound message to the entities subscribed to it.
    ///
    /// Each entity sees the topic relative to itself. `set` requests update
    /// the property value before `on_set` runs; broadcasts reach
    /// `on_broadcast` with the level below `$broadcast/`. Failures go to
    /// the error hook.
    pub fn handle_message(&self, topic: &str, payload: &[u8]) {
        let _boundary = self.lock();
        let routes = self.inner.router.matching(topic);
        if routes.is_empty() {
            tracing::trace!(device = %self.inner.id, topic = %topic, "no route for inbound topic");
            return;
        }

        let mut notified: Vec<Scope> = Vec::new();
        for route in routes {
            let Some(path) = self.scope_path(&route.scope) else {
                continue;
            };
            let Some(relative) = path.relative(topic) else {
                tracing::trace!(topic = %topic, "topic outside subscriber scope");
                continue;
            };
            if let Err(err) = self.dispatch(&route, relative, payload) {
                self.report(&err);
            }
            if notified.iter().any(|scope| scope.same(&route.scope)) {
                continue;
            }
            let result = match &route.scope {
                Scope::Device => self.inner.callbacks.message(self, relative, payload),
                Scope::Node(node) => node.fire_message(relative, payload),
                Scope::Property(property) => property.fire_message(relative, payload),
            };
            if let Err(err) = result {
                self.report(&Error::Callback(err));
            }
            notified.push(route.scope);
        }
    }

    /// Records a lost transport connection.
    ///
    /// The tree is marked disconnected without `on_disconnect`
    /// notifications and the loss is reported to the error hook. The state
    /// is kept so [`Device::handle_reconnected`] can restore it.
    pub fn handle_connection_lost(&self, reason: &str) {
        let _boundary = self.lock();
        if !self.has_session() {
            return;
        }
        tracing::warn!(device = %self.inner.id, reason, "connection lost");
        self.mark_tree(false);
        self.report(&Error::Transport(TransportError::ConnectionFailed(
            reason.to_string(),
        )));
    }

    /// Restores the session after a reconnection.
    ///
    /// Reinstalls every subscription, then republishes the whole tree inside
    /// an `init` cycle that returns to the state held before the loss.
    ///
    /// # Errors
    ///
    /// Returns the first subscribe or publish failure.
    pub fn handle_reconnected(&self) -> Result<()> {
        let _boundary = self.lock();
        let Some(session) = self.session() else {
            return Ok(());
        };
        tracing::info!(device = %self.inner.id, "session re-established");
        for (pattern, qos) in self.inner.router.patterns() {
            tracing::debug!(pattern = %pattern, "resubscribing");
            session.subscribe(&pattern, qos)?;
        }
        self.cycle_from(self.state(), || self.publish_tree())
    }

    /// Drops a session the transport closed on its own, for example after
    /// giving up on reconnection.
    ///
    /// The tree is marked disconnected, the state becomes `disconnected`
    /// and `Error::Transport(TransportError::Closed)` goes to the error
    /// hook. A later connect opens a fresh session.
    pub fn handle_session_closed(&self, reason: &str) {
        let _boundary = self.lock();
        let Some(session) = self.inner.session.write().take() else {
            return;
        };
        tracing::warn!(device = %self.inner.id, reason, "session closed by transport");
        let dropped = self.inner.router.clear();
        tracing::debug!(patterns = dropped.len(), "subscriptions dropped with the session");
        self.inner.data.lock().state = DeviceState::Disconnected;
        if let Err(err) = session.disconnect() {
            tracing::debug!(error = %err, "closing a dead session");
        }
        self.mark_tree(false);
        self.report(&Error::Transport(TransportError::Closed));
    }

    // ---- crate internals ----

    /// Opens the session on `transport`.
    ///
    /// Returns `Ok(false)` if a session was already open.
    fn start_session(&self, transport: Arc<dyn Transport>) -> Result<bool> {
        let _boundary = self.lock();
        {
            let mut session = self.inner.session.write();
            if session.is_some() {
                return Ok(false);
            }
            *session = Some(transport);
        }
        tracing::info!(device = %self.inner.id, "session opened");

        let result = self.reconcile_defaults().and_then(|()| {
            self.cycle_from(DeviceState::Disconnected, || {
                self.publish_tree()?;
                self.notify_connected(true, &self.nodes());
                Ok(())
            })
        });
        if let Err(err) = result {
            tracing::warn!(device = %self.inner.id, error = %err, "connect failed");
            if let Err(teardown) = self.close_session(false) {
                tracing::debug!(error = %teardown, "teardown after failed connect");
            }
            return Err(err);
        }
        Ok(true)
    }

    /// Closes the session: unsubscribes, publishes `disconnected`, closes
    /// the transport and marks the tree disconnected.
    pub(crate) fn shutdown(&self) -> Result<()> {
        let _boundary = self.lock();
        if !self.has_session() {
            return Ok(());
        }
        self.close_session(true)
    }

    fn close_session(&self, notify: bool) -> Result<()> {
        let mut first = None;
        if let Some(session) = self.session() {
            tracing::debug!(device = %self.inner.id, patterns = self.inner.router.len(), "dropping subscriptions");
            for pattern in self.inner.router.clear() {
                keep_first(&mut first, session.unsubscribe(&pattern).map_err(Error::from));
            }
        }
        keep_first(&mut first, self.transition(DeviceState::Disconnected));
        let session = self.inner.session.write().take();
        if let Some(session) = session {
            keep_first(&mut first, session.disconnect().map_err(Error::from));
        }
        tracing::info!(device = %self.inner.id, "session closed");

        if notify {
            self.cascade_disconnected();
        } else {
            self.mark_tree(false);
        }
        first.map_or(Ok(()), Err)
    }

    pub(crate) fn session(&self) -> Option<Arc<dyn Transport>> {
        self.inner.session.read().clone()
    }

    /// Publishes on the session without holding any lock over the call.
    pub(crate) fn send(&self, topic: &str, payload: &[u8], qos: QoS, retain: bool) -> Result<()> {
        let session = self.session().ok_or(Error::NotConnected)?;
        tracing::debug!(topic = %topic, retain, "publish");
        session.publish(topic, payload, qos, retain)?;
        Ok(())
    }

    /// Publishes one retained `$key` message per snapshot entry.
    pub(crate) fn publish_snapshot(
        &self,
        path: &TopicPath,
        snapshot: &AttributeSnapshot,
    ) -> Result<()> {
        for (key, value) in snapshot.iter() {
            self.send(&path.attribute(key), value.as_bytes(), QoS::AtLeastOnce, true)?;
        }
        Ok(())
    }

    /// Publishes `after`, then clears the retained `$key` of every attribute
    /// that dropped out since `before`.
    pub(crate) fn publish_snapshot_change(
        &self,
        path: &TopicPath,
        before: &AttributeSnapshot,
        after: &AttributeSnapshot,
    ) -> Result<()> {
        self.publish_snapshot(path, after)?;
        for key in before.keys().filter(|key| after.get(key).is_none()) {
            tracing::debug!(topic = %path.attribute(key), "clearing attribute");
            self.send(&path.attribute(key), b"", QoS::AtLeastOnce, true)?;
        }
        Ok(())
    }

    /// Moves to `state`, publishing `$state` while a session is open.
    pub(crate) fn transition(&self, state: DeviceState) -> Result<()> {
        let previous = std::mem::replace(&mut self.inner.data.lock().state, state);
        tracing::debug!(device = %self.inner.id, from = %previous, to = %state, "state transition");
        if self.has_session() {
            self.send(
                &self.inner.path.attribute("state"),
                state.as_str().as_bytes(),
                QoS::AtLeastOnce,
                true,
            )?;
        }
        Ok(())
    }

    /// Runs `body` inside an `init` cycle when a session is open, or
    /// directly otherwise.
    pub(crate) fn init_cycle(&self, body: impl FnOnce() -> Result<()>) -> Result<()> {
        if !self.has_session() {
            return body();
        }
        self.cycle_from(self.state(), body)
    }

    /// Enters `init`, runs `body` and returns to the operational state
    /// matching `prior`, unless `body` left `init` itself.
    ///
    /// Nested cycles run `body` directly; the outermost one restores.
    pub(crate) fn cycle_from(
        &self,
        prior: DeviceState,
        body: impl FnOnce() -> Result<()>,
    ) -> Result<()> {
        if self.state() == DeviceState::Init {
            return body();
        }
        if let Err(err) = self.transition(DeviceState::Init) {
            self.inner.data.lock().state = prior;
            return Err(err);
        }
        let result = body();
        let restored = if self.state() == DeviceState::Init {
            self.transition(prior.restore_target())
        } else {
            Ok(())
        };
        result.and(restored)
    }

    /// Publishes the device attributes, then every node followed by its
    /// properties, in attachment order.
    fn publish_tree(&self) -> Result<()> {
        self.publish_snapshot(&self.inner.path, &self.snapshot())?;
        self.inner.data.lock().connected = true;
        for node in self.nodes() {
            node.publish_subtree(self)?;
        }
        Ok(())
    }

    /// Runs `on_connect` for the device (if `device`), then for `nodes`,
    /// then for their properties.
    pub(crate) fn notify_connected(&self, device: bool, nodes: &[Node]) {
        let mut failures = Vec::new();
        if device && let Err(err) = self.inner.callbacks.connected(self) {
            failures.push(err);
        }
        for node in nodes {
            if let Err(err) = node.fire_connect() {
                failures.push(err);
            }
        }
        for property in nodes.iter().flat_map(Node::properties) {
            if let Err(err) = property.fire_connect() {
                failures.push(err);
            }
        }
        for err in failures {
            self.report(&Error::Callback(err));
        }
    }

    /// Marks the whole tree disconnected and runs `on_disconnect`
    /// top-down for entities that were connected.
    fn cascade_disconnected(&self) {
        let was_connected = std::mem::replace(&mut self.inner.data.lock().connected, false);
        if was_connected && let Err(err) = self.inner.callbacks.disconnected(self) {
            self.report(&Error::Callback(err));
        }
        for node in self.nodes() {
            node.cascade_disconnected(self);
        }
    }

    fn mark_tree(&self, connected: bool) {
        self.inner.data.lock().connected = connected;
        for node in self.nodes() {
            node.mark_subtree(connected);
        }
    }

    /// Brings the default subscriptions in line with the current tree.
    pub(crate) fn reconcile_defaults(&self) -> Result<()> {
        let Some(session) = self.session() else {
            return Ok(());
        };
        let desired = rules::default_subscriptions(self);
        let current = self.inner.router.defaults();

        for (pattern, route) in &current {
            let wanted = desired
                .iter()
                .any(|(p, r)| p == pattern && r.same(route));
            if !wanted && self.inner.router.remove(pattern, route) {
                tracing::debug!(pattern = %pattern, "unsubscribe");
                session.unsubscribe(pattern)?;
            }
        }
        for (pattern, route) in desired {
            let present = current
                .iter()
                .any(|(p, r)| *p == pattern && r.same(&route));
            if present {
                continue;
            }
            let qos = route.qos;
            if self.inner.router.add(&pattern, route.clone()) {
                tracing::debug!(pattern = %pattern, "subscribe");
                if let Err(err) = session.subscribe(&pattern, qos) {
                    self.inner.router.remove(&pattern, &route);
                    return Err(err.into());
                }
            }
        }
        Ok(())
    }

    /// Removes every route accepted by `predicate` and unsubscribes the
    /// patterns left empty.
    pub(crate) fn drop_routes(&self, predicate: impl Fn(&Route) -> bool) -> Result<()> {
        let emptied = self.inner.router.remove_where(predicate);
        let Some(session) = self.session() else {
            return Ok(());
        };
        let mut first = None;
        for pattern in emptied {
            tracing::debug!(pattern = %pattern, "unsubscribe");
            keep_first(&mut first, session.unsubscribe(&pattern).map_err(Error::from));
        }
        first.map_or(Ok(()), Err)
    }

    pub(crate) fn add_user_route(&self, scope: Scope, pattern: &str, qos: QoS) -> Result<()> {
        topic::validate_relative(pattern)?;
        let session = self.session().ok_or(Error::NotConnected)?;
        let absolute = self
            .scope_path(&scope)
            .ok_or(Error::NotConnected)?
            .join(pattern);
        let route = Route {
            scope,
            relative: pattern.to_string(),
            kind: SubscriptionKind::User,
            qos,
        };
        if self.inner.router.add(&absolute, route.clone()) {
            tracing::debug!(pattern = %absolute, "subscribe");
            if let Err(err) = session.subscribe(&absolute, qos) {
                self.inner.router.remove(&absolute, &route);
                return Err(err.into());
            }
        }
        Ok(())
    }

    pub(crate) fn remove_user_route(&self, scope: Scope, pattern: &str) -> Result<()> {
        let session = self.session().ok_or(Error::NotConnected)?;
        let absolute = self
            .scope_path(&scope)
            .ok_or(Error::NotConnected)?
            .join(pattern);
        let route = Route {
            scope,
            relative: pattern.to_string(),
            kind: SubscriptionKind::User,
            qos: QoS::default(),
        };
        if self.inner.router.remove(&absolute, &route) {
            tracing::debug!(pattern = %absolute, "unsubscribe");
            session.unsubscribe(&absolute)?;
        }
        Ok(())
    }

    fn scope_path(&self, scope: &Scope) -> Option<TopicPath> {
        match scope {
            Scope::Device => Some(self.inner.path.clone()),
            Scope::Node(node) => node.path(),
            Scope::Property(property) => property.path(),
        }
    }

    fn dispatch(&self, route: &Route, relative: &str, payload: &[u8]) -> Result<()> {
        match (&route.kind, &route.scope) {
            (SubscriptionKind::Broadcast, Scope::Device) => {
                let level = relative.strip_prefix(BROADCAST_PREFIX).unwrap_or(relative);
                tracing::debug!(device = %self.inner.id, level, "broadcast received");
                match self.inner.on_broadcast.get() {
                    Some(callback) => callback(self, level, payload).map_err(Error::Callback),
                    None => Ok(()),
                }
            }
            (SubscriptionKind::Set, Scope::Property(property)) => {
                let value = property.apply_set(self, payload)?;
                property.fire_set(&value).map_err(Error::Callback)
            }
            _ => Ok(()),
        }
    }

    /// Sends a failure that has no caller to the error hook.
    pub(crate) fn report(&self, err: &Error) {
        tracing::warn!(device = %self.inner.id, error = %err, "device error");
        if let Some(hook) = self.inner.on_error.get() {
            hook(err);
        }
    }
}
