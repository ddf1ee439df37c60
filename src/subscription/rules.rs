// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Default subscriptions derived from the device tree.
//!
//! | Rule        | Relative pattern | Installed for            |
//! |-------------|------------------|--------------------------|
//! | `broadcast` | `$broadcast/#`   | the device               |
//! | `set`       | `set`            | every settable property  |
//!
//! The table is evaluated against the current tree whenever its structure
//! or a `settable` flag changes, and the result is reconciled with the
//! router: missing routes are added, stale ones removed.

use super::router::{Route, Scope, SubscriptionKind};
use crate::device::{Device, Topic};
use crate::types::QoS;

/// Relative pattern of the broadcast channel.
pub(crate) const BROADCAST: &str = "$broadcast/#";

/// Relative topic of property write requests.
pub(crate) const SET: &str = "set";

struct Rule {
    name: &'static str,
    relative: &'static str,
    kind: SubscriptionKind,
    targets: fn(&Device) -> Vec<(Scope, String)>,
}

const RULES: &[Rule] = &[
    Rule {
        name: "broadcast",
        relative: BROADCAST,
        kind: SubscriptionKind::Broadcast,
        targets: device_target,
    },
    Rule {
        name: "set",
        relative: SET,
        kind: SubscriptionKind::Set,
        targets: settable_properties,
    },
];

fn device_target(device: &Device) -> Vec<(Scope, String)> {
    vec![(Scope::Device, device.topic_path().join(BROADCAST))]
}

fn settable_properties(device: &Device) -> Vec<(Scope, String)> {
    device
        .nodes()
        .into_iter()
        .flat_map(|node| node.properties())
        .filter(crate::device::Property::settable)
        .filter_map(|property| {
            let pattern = property.path()?.join(SET);
            Some((Scope::Property(property), pattern))
        })
        .collect()
}

/// Evaluates the rule table against `device`.
///
/// Returns `(absolute pattern, route)` pairs in rule order.
pub(crate) fn default_subscriptions(device: &Device) -> Vec<(String, Route)> {
    RULES
        .iter()
        .flat_map(|rule| {
            let targets = (rule.targets)(device);
            tracing::trace!(rule = rule.name, count = targets.len(), "evaluated subscription rule");
            targets.into_iter().map(|(scope, pattern)| {
                let route = Route {
                    scope,
                    relative: rule.relative.to_string(),
                    kind: rule.kind,
                    qos: QoS::AtLeastOnce,
                };
                (pattern, route)
            })
        })
        .collect()
}
