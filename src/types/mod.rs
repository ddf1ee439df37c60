// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Value types for the Homie topic hierarchy.
//!
//! Each type ensures values are valid at construction time, so a malformed
//! identifier or payload never reaches the transport.
//!
//! # Types
//!
//! - [`Id`] - Device, node and property identifiers (`[A-Za-z0-9-]+`)
//! - [`QoS`] - Delivery guarantee for publishes and subscriptions
//! - [`DataType`] - Property `$datatype`
//! - [`PropertyValue`] - Typed property value with payload encoding

mod data_type;
mod duration;
mod id;
mod qos;
mod value;

pub use data_type::DataType;
pub use id::Id;
pub use qos::QoS;
pub use value::PropertyValue;
