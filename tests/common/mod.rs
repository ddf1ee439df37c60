// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! In-memory transport shared by the integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;

use homie_device::error::TransportError;
use homie_device::protocol::Transport;
use homie_device::types::QoS;
use homie_device::{DataType, Device, Node, Property};
use parking_lot::Mutex;

/// One recorded publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Published {
    pub topic: String,
    pub payload: String,
    pub qos: QoS,
    pub retain: bool,
}

/// Transport recording every request instead of talking to a broker.
#[derive(Debug, Default)]
pub struct RecordingTransport {
    publishes: Mutex<Vec<Published>>,
    subscribed: Mutex<Vec<String>>,
    subscribe_calls: Mutex<HashMap<String, usize>>,
    fail_publish_on: Mutex<Option<String>>,
    disconnected: Mutex<bool>,
}

impl RecordingTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Every publish so far.
    pub fn publishes(&self) -> Vec<Published> {
        self.publishes.lock().clone()
    }

    /// Topics of every publish so far.
    pub fn topics(&self) -> Vec<String> {
        self.publishes.lock().iter().map(|p| p.topic.clone()).collect()
    }

    /// `$state` payloads in publication order.
    pub fn states(&self) -> Vec<String> {
        self.publishes
            .lock()
            .iter()
            .filter(|p| p.topic.ends_with("/$state"))
            .map(|p| p.payload.clone())
            .collect()
    }

    /// Last payload published on `topic`.
    pub fn last(&self, topic: &str) -> Option<String> {
        self.publishes
            .lock()
            .iter()
            .rev()
            .find(|p| p.topic == topic)
            .map(|p| p.payload.clone())
    }

    /// Currently subscribed patterns.
    pub fn subscribed(&self) -> Vec<String> {
        self.subscribed.lock().clone()
    }

    /// Number of subscribe requests issued for `pattern`.
    pub fn subscribe_count(&self, pattern: &str) -> usize {
        self.subscribe_calls.lock().get(pattern).copied().unwrap_or(0)
    }

    /// Makes publishes on topics ending with `suffix` fail.
    pub fn fail_publish_on(&self, suffix: impl Into<String>) {
        *self.fail_publish_on.lock() = Some(suffix.into());
    }

    pub fn heal(&self) {
        *self.fail_publish_on.lock() = None;
    }

    pub fn clear(&self) {
        self.publishes.lock().clear();
    }

    pub fn is_disconnected(&self) -> bool {
        *self.disconnected.lock()
    }
}

impl Transport for RecordingTransport {
    fn publish(
        &self,
        topic: &str,
        payload: &[u8],
        qos: QoS,
        retain: bool,
    ) -> Result<(), TransportError> {
        if let Some(suffix) = self.fail_publish_on.lock().as_deref()
            && topic.ends_with(suffix)
        {
            return Err(TransportError::ConnectionFailed(format!("refused {topic}")));
        }
        self.publishes.lock().push(Published {
            topic: topic.to_string(),
            payload: String::from_utf8_lossy(payload).into_owned(),
            qos,
            retain,
        });
        Ok(())
    }

    fn subscribe(&self, pattern: &str, _qos: QoS) -> Result<(), TransportError> {
        *self
            .subscribe_calls
            .lock()
            .entry(pattern.to_string())
            .or_default() += 1;
        let mut subscribed = self.subscribed.lock();
        if !subscribed.iter().any(|p| p == pattern) {
            subscribed.push(pattern.to_string());
        }
        Ok(())
    }

    fn unsubscribe(&self, pattern: &str) -> Result<(), TransportError> {
        self.subscribed.lock().retain(|p| p != pattern);
        Ok(())
    }

    fn disconnect(&self) -> Result<(), TransportError> {
        *self.disconnected.lock() = true;
        Ok(())
    }
}

/// `homie/dev1` with node `n1` holding the settable integer `p1`.
pub fn sample_device() -> (Device, Node, Property) {
    let p1 = Property::builder("p1")
        .name("Level")
        .data_type(DataType::Integer)
        .format("0:10")
        .settable(true)
        .build()
        .unwrap();
    let n1 = Node::builder("n1")
        .name("Node")
        .node_type("dimmer")
        .with_property(p1.clone())
        .build()
        .unwrap();
    let device = Device::builder("dev1")
        .name("Device")
        .with_node(n1.clone())
        .build()
        .unwrap();
    (device, n1, p1)
}
