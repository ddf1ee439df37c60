// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Device lifecycle states.
//!
//! A device is always in exactly one [`DeviceState`]. The state is published
//! as the retained `$state` attribute on every transition; transitions
//! themselves are driven by the device (see [`crate::Device::connect_with`],
//! [`crate::Device::set_state`] and attribute updates).
//!
//! # Examples
//!
//! ```
//! use homie_device::state::DeviceState;
//!
//! let state: DeviceState = "sleeping".parse().unwrap();
//! assert_eq!(state, DeviceState::Sleeping);
//! assert!(state.is_operational());
//! assert_eq!(DeviceState::Init.to_string(), "init");
//! ```

mod device_state;

pub use device_state::{DeviceState, LOST_PAYLOAD};
