// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Attribute storage for devices, nodes and properties.
//!
//! Every entity publishes `$`-prefixed attributes. Some keys are reserved:
//! their values are derived from the entity's structural fields (its name,
//! its children, its data type...) and recomputed before every publish.
//! Any other key is a user "extension" attribute kept in an
//! [`AttributeStore`].
//!
//! # Examples
//!
//! ```
//! use homie_device::attribute::{AttributeStore, NODE_KEYS};
//!
//! let mut store = AttributeStore::new(NODE_KEYS);
//! store.set("location", "kitchen").unwrap();
//!
//! // Reserved keys cannot be written directly
//! assert!(store.set("properties", "a,b").is_err());
//!
//! let snapshot = store.snapshot(vec![("name", "Sensor".to_string())]);
//! let keys: Vec<&str> = snapshot.keys().collect();
//! assert_eq!(keys, ["name", "location"]);
//! ```

mod snapshot;
mod store;

pub use snapshot::AttributeSnapshot;
pub use store::AttributeStore;

/// Key reserved at every level of the hierarchy.
pub const ID_KEY: &str = "id";

/// Reserved device attribute keys, in publication order.
///
/// `broadcast` is never published but stays reserved: `$broadcast` is the
/// device's inbound broadcast channel.
pub const DEVICE_KEYS: &[&str] = &[
    "homie",
    "name",
    "state",
    "nodes",
    "extensions",
    "implementation",
    "broadcast",
];

/// Reserved node attribute keys, in publication order.
pub const NODE_KEYS: &[&str] = &["name", "type", "properties"];

/// Reserved property attribute keys, in publication order.
pub const PROPERTY_KEYS: &[&str] = &[
    "name",
    "datatype",
    "format",
    "settable",
    "retained",
    "unit",
];
