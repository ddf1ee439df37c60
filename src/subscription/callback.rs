// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Callback slots for entity notifications.
//!
//! Each entity has at most one callback per notification kind. Setting a
//! callback replaces the previous one; an empty slot is a no-op.
//!
//! Callbacks run synchronously while the owning device's mutation boundary
//! is held, so they always observe a consistent hierarchy and may call back
//! into the device (including [`crate::Device::disconnect`]).

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::device::{Device, Node, Property};
use crate::error::{BoxError, Error};
use crate::types::PropertyValue;

/// Result returned by user callbacks.
pub type CallbackResult = Result<(), BoxError>;

/// Connect or disconnect notification for an entity of type `E`.
pub type LifecycleFn<E> = dyn Fn(&E) -> CallbackResult + Send + Sync;

/// Inbound message for an entity of type `E`: entity, relative topic,
/// payload.
pub type MessageFn<E> = dyn Fn(&E, &str, &[u8]) -> CallbackResult + Send + Sync;

/// Accepted `set` request: property and its new value.
pub type SetFn = dyn Fn(&Property, &PropertyValue) -> CallbackResult + Send + Sync;

/// Device broadcast: device, broadcast level (topic below `$broadcast/`),
/// payload.
pub type BroadcastFn = dyn Fn(&Device, &str, &[u8]) -> CallbackResult + Send + Sync;

/// Error hook for failures on the inbound and background paths.
pub type ErrorFn = dyn Fn(&Error) + Send + Sync;

/// A replaceable callback.
pub(crate) struct CallbackSlot<F: ?Sized> {
    slot: RwLock<Option<Arc<F>>>,
}

impl<F: ?Sized> CallbackSlot<F> {
    pub(crate) fn new() -> Self {
        Self {
            slot: RwLock::new(None),
        }
    }

    pub(crate) fn set(&self, callback: Arc<F>) {
        *self.slot.write() = Some(callback);
    }

    /// Clones the callback out so the slot lock is released before it runs.
    pub(crate) fn get(&self) -> Option<Arc<F>> {
        self.slot.read().clone()
    }

    pub(crate) fn is_set(&self) -> bool {
        self.slot.read().is_some()
    }
}

impl<F: ?Sized> fmt::Debug for CallbackSlot<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(if self.is_set() { "Some(..)" } else { "None" })
    }
}

/// Callbacks shared by devices, nodes and properties.
pub(crate) struct EntityCallbacks<E: 'static> {
    pub(crate) on_connect: CallbackSlot<LifecycleFn<E>>,
    pub(crate) on_disconnect: CallbackSlot<LifecycleFn<E>>,
    pub(crate) on_message: CallbackSlot<MessageFn<E>>,
}

impl<E: 'static> EntityCallbacks<E> {
    pub(crate) fn new() -> Self {
        Self {
            on_connect: CallbackSlot::new(),
            on_disconnect: CallbackSlot::new(),
            on_message: CallbackSlot::new(),
        }
    }

    pub(crate) fn connected(&self, entity: &E) -> CallbackResult {
        self.on_connect.get().map_or(Ok(()), |callback| callback(entity))
    }

    pub(crate) fn disconnected(&self, entity: &E) -> CallbackResult {
        self.on_disconnect
            .get()
            .map_or(Ok(()), |callback| callback(entity))
    }

    pub(crate) fn message(&self, entity: &E, topic: &str, payload: &[u8]) -> CallbackResult {
        self.on_message
            .get()
            .map_or(Ok(()), |callback| callback(entity, topic, payload))
    }
}

impl<E: 'static> fmt::Debug for EntityCallbacks<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityCallbacks")
            .field("on_connect", &self.on_connect)
            .field("on_disconnect", &self.on_disconnect)
            .field("on_message", &self.on_message)
            .finish()
    }
}
