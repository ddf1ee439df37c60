// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Routing of inbound topics to hierarchy entities.
//!
//! The router maps each absolute subscription pattern to the entries that
//! requested it. A pattern is subscribed on the transport when its first
//! entry arrives and unsubscribed when its last entry leaves, so several
//! entities can share one broker subscription.

use indexmap::IndexMap;
use parking_lot::RwLock;

use crate::device::{Node, Property};
use crate::topic;
use crate::types::QoS;

/// The entity a subscription belongs to.
#[derive(Debug, Clone)]
pub(crate) enum Scope {
    /// The device owning the router.
    Device,
    /// A node of the device.
    Node(Node),
    /// A property of the device.
    Property(Property),
}

impl Scope {
    pub(crate) fn same(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Device, Self::Device) => true,
            (Self::Node(a), Self::Node(b)) => a.ptr_eq(b),
            (Self::Property(a), Self::Property(b)) => a.ptr_eq(b),
            _ => false,
        }
    }

    /// Returns `true` if the scope is `node` or one of its properties.
    pub(crate) fn within(&self, node: &Node) -> bool {
        match self {
            Self::Device => false,
            Self::Node(n) => n.ptr_eq(node),
            Self::Property(p) => p.node().is_some_and(|n| n.ptr_eq(node)),
        }
    }
}

/// Why a route exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SubscriptionKind {
    /// Requested through `subscribe` by the user.
    User,
    /// Device broadcast channel.
    Broadcast,
    /// Write requests for a settable property.
    Set,
}

/// One subscription entry.
#[derive(Debug, Clone)]
pub(crate) struct Route {
    pub(crate) scope: Scope,
    pub(crate) relative: String,
    pub(crate) kind: SubscriptionKind,
    pub(crate) qos: QoS,
}

impl Route {
    pub(crate) fn same(&self, other: &Self) -> bool {
        self.kind == other.kind && self.relative == other.relative && self.scope.same(&other.scope)
    }
}

/// Reference-counted pattern table.
#[derive(Debug, Default)]
pub(crate) struct SubscriptionRouter {
    routes: RwLock<IndexMap<String, Vec<Route>>>,
}

impl SubscriptionRouter {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Adds a route under `pattern`.
    ///
    /// Returns `true` if the pattern is new and must be subscribed on the
    /// transport. Adding an identical route twice is a no-op.
    pub(crate) fn add(&self, pattern: &str, route: Route) -> bool {
        let mut routes = self.routes.write();
        match routes.get_mut(pattern) {
            Some(entries) => {
                if !entries.iter().any(|r| r.same(&route)) {
                    entries.push(route);
                }
                false
            }
            None => {
                routes.insert(pattern.to_string(), vec![route]);
                true
            }
        }
    }

    /// Removes the route equal to `route` from `pattern`.
    ///
    /// Returns `true` if the pattern lost its last route and must be
    /// unsubscribed on the transport.
    pub(crate) fn remove(&self, pattern: &str, route: &Route) -> bool {
        let mut routes = self.routes.write();
        let Some(entries) = routes.get_mut(pattern) else {
            return false;
        };
        entries.retain(|r| !r.same(route));
        if entries.is_empty() {
            routes.shift_remove(pattern);
            true
        } else {
            false
        }
    }

    /// Removes every route accepted by `predicate`, returning the patterns
    /// left without routes.
    pub(crate) fn remove_where(&self, predicate: impl Fn(&Route) -> bool) -> Vec<String> {
        let mut routes = self.routes.write();
        let mut emptied = Vec::new();
        routes.retain(|pattern, entries| {
            entries.retain(|r| !predicate(r));
            if entries.is_empty() {
                emptied.push(pattern.clone());
                false
            } else {
                true
            }
        });
        emptied
    }

    /// Drops all routes, returning every pattern that was subscribed.
    pub(crate) fn clear(&self) -> Vec<String> {
        self.routes.write().drain(..).map(|(pattern, _)| pattern).collect()
    }

    /// Returns the routes whose pattern matches `topic`, in subscription
    /// order.
    pub(crate) fn matching(&self, topic: &str) -> Vec<Route> {
        self.routes
            .read()
            .iter()
            .filter(|(pattern, _)| topic::matches(pattern, topic))
            .flat_map(|(_, entries)| entries.iter().cloned())
            .collect()
    }

    /// Returns every subscribed pattern with the highest QoS requested for it.
    pub(crate) fn patterns(&self) -> Vec<(String, QoS)> {
        self.routes
            .read()
            .iter()
            .map(|(pattern, entries)| {
                let qos = entries.iter().map(|r| r.qos).max().unwrap_or_default();
                (pattern.clone(), qos)
            })
            .collect()
    }

    /// Returns the routes installed by the default rule table.
    pub(crate) fn defaults(&self) -> Vec<(String, Route)> {
        self.routes
            .read()
            .iter()
            .flat_map(|(pattern, entries)| {
                entries
                    .iter()
                    .filter(|r| r.kind != SubscriptionKind::User)
                    .map(|r| (pattern.clone(), r.clone()))
            })
            .collect()
    }

    /// Returns the number of distinct subscribed patterns.
    pub(crate) fn len(&self) -> usize {
        self.routes.read().len()
    }
}
