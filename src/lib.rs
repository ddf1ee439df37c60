// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! `homie_device` - expose devices over MQTT following the Homie convention.
//!
//! A device is described as a three-level hierarchy: a [`Device`] holds
//! [`Node`]s, which hold [`Property`]s. The library derives the `$`-prefixed
//! metadata of the hierarchy, publishes it in the order the convention
//! expects, drives the device `$state` machine and routes inbound messages
//! (property `set` requests, broadcasts, user subscriptions) to the entity
//! they belong to.
//!
//! # Supported Features
//!
//! - **Metadata**: derived `$nodes`, `$properties`, `$datatype`... plus
//!   free-form extension attributes
//! - **State machine**: `init` → `ready`, with `sleeping` and `alert` under
//!   user control, `lost` as last will
//! - **Live changes**: attach, detach and attribute updates on a connected
//!   device run in an incremental `init` cycle
//! - **Typed values**: integer, float, boolean, string, enum, color,
//!   datetime and duration payloads, validated against `$format`
//! - **Transports**: any [`protocol::Transport`]; an MQTT transport built on
//!   `rumqttc` ships behind the default `mqtt` feature
//!
//! # Quick Start
//!
//! ```no_run
//! use homie_device::protocol::MqttConfig;
//! use homie_device::types::DataType;
//! use homie_device::{Device, Node, Property};
//!
//! #[tokio::main]
//! async fn main() -> homie_device::Result<()> {
//!     let switch = Property::builder("on")
//!         .name("Power")
//!         .data_type(DataType::Boolean)
//!         .settable(true)
//!         .value(false)
//!         .build()?;
//!     switch.on_set(|_, value| {
//!         println!("switching to {value}");
//!         Ok(())
//!     });
//!
//!     let device = Device::builder("lamp")
//!         .name("Desk lamp")
//!         .with_node(Node::builder("light").node_type("switch").with_property(switch).build()?)
//!         .build()?;
//!
//!     let config = MqttConfig::from_url("mqtt://192.168.1.50:1883")?;
//!     device.connect(&config).await?;
//!
//!     std::future::pending::<()>().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Custom Transport
//!
//! The core is synchronous and transport-agnostic: implement
//! [`protocol::Transport`] and feed inbound traffic back through
//! [`Device::handle_message`].
//!
//! ```
//! use std::sync::Arc;
//!
//! use homie_device::error::TransportError;
//! use homie_device::protocol::Transport;
//! use homie_device::types::QoS;
//! use homie_device::{Device, Topic};
//!
//! struct Stdout;
//!
//! impl Transport for Stdout {
//!     fn publish(&self, topic: &str, payload: &[u8], _: QoS, _: bool) -> Result<(), TransportError> {
//!         println!("{topic} = {}", String::from_utf8_lossy(payload));
//!         Ok(())
//!     }
//!     fn subscribe(&self, _: &str, _: QoS) -> Result<(), TransportError> {
//!         Ok(())
//!     }
//!     fn unsubscribe(&self, _: &str) -> Result<(), TransportError> {
//!         Ok(())
//!     }
//!     fn disconnect(&self) -> Result<(), TransportError> {
//!         Ok(())
//!     }
//! }
//!
//! let device = Device::builder("dev1").build().unwrap();
//! device.connect_with(Arc::new(Stdout)).unwrap();
//! assert!(device.is_connected());
//! ```

pub mod attribute;
mod device;
pub mod error;
pub mod protocol;
pub mod state;
pub mod subscription;
pub mod topic;
pub mod types;

pub use device::{
    DEFAULT_ROOT_TOPIC, Device, DeviceBuilder, HOMIE_VERSION, Node, NodeBuilder, Property,
    PropertyBuilder, Topic,
};
pub use error::{BoxError, Error, Result, TransportError, ValueError};
pub use state::DeviceState;
pub use types::{DataType, Id, PropertyValue, QoS};
