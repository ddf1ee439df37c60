// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Subscriptions and inbound message routing.
//!
//! Every device owns a router that maps subscribed patterns to the entities
//! that asked for them. Inbound messages are handed to
//! [`crate::Device::handle_message`], which looks up the matching routes and
//! invokes the owning entity's callbacks with the topic rewritten relative
//! to that entity.
//!
//! Besides user subscriptions, the device keeps two default subscriptions
//! in sync with its tree: the device `$broadcast/#` channel and the `set`
//! topic of every settable property.
//!
//! # Usage
//!
//! ```
//! use homie_device::{Device, Node, Property, Topic};
//! use homie_device::types::DataType;
//!
//! # fn example() -> homie_device::Result<()> {
//! let property = Property::builder("p1")
//!     .data_type(DataType::Integer)
//!     .settable(true)
//!     .build()?;
//! property.on_set(|property, value| {
//!     println!("{} set to {value}", property.id());
//!     Ok(())
//! });
//!
//! let device = Device::builder("dev1")
//!     .with_node(Node::builder("n1").with_property(property).build()?)
//!     .build()?;
//! device.on_broadcast(|_, level, payload| {
//!     println!("broadcast {level}: {}", String::from_utf8_lossy(payload));
//!     Ok(())
//! });
//! # Ok(())
//! # }
//! ```

mod callback;
mod router;
pub(crate) mod rules;

pub use callback::{BroadcastFn, CallbackResult, ErrorFn, LifecycleFn, MessageFn, SetFn};
pub(crate) use callback::{CallbackSlot, EntityCallbacks};
pub(crate) use router::{Route, Scope, SubscriptionKind, SubscriptionRouter};
