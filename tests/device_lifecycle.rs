// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Integration tests for the device state machine over a recording transport.

mod common;

use std::sync::Arc;

use common::{RecordingTransport, sample_device};
use homie_device::{
    DataType, Device, DeviceState, Error, Node, Property, PropertyValue, QoS, Topic,
};
use parking_lot::Mutex;

// ============================================================================
// Connect
// ============================================================================

mod connect {
    use super::*;

    #[test]
    fn publishes_tree_in_order_between_init_and_ready() {
        let (device, _, _) = sample_device();
        let transport = RecordingTransport::new();
        device.connect_with(transport.clone()).unwrap();

        let published: Vec<String> = transport
            .publishes()
            .iter()
            .map(|p| format!("{}={}", p.topic, p.payload))
            .collect();
        assert_eq!(
            published,
            [
                "homie/dev1/$state=init",
                "homie/dev1/$homie=4.0.0",
                "homie/dev1/$name=Device",
                "homie/dev1/$nodes=n1",
                "homie/dev1/$extensions=",
                "homie/dev1/n1/$name=Node",
                "homie/dev1/n1/$type=dimmer",
                "homie/dev1/n1/$properties=p1",
                "homie/dev1/n1/p1/$name=Level",
                "homie/dev1/n1/p1/$datatype=integer",
                "homie/dev1/n1/p1/$format=0:10",
                "homie/dev1/n1/p1/$settable=true",
                "homie/dev1/n1/p1/$retained=true",
                "homie/dev1/$state=ready",
            ]
        );
        assert!(
            transport
                .publishes()
                .iter()
                .all(|p| p.retain && p.qos == QoS::AtLeastOnce)
        );
    }

    #[test]
    fn installs_default_subscriptions() {
        let (device, _, _) = sample_device();
        let transport = RecordingTransport::new();
        device.connect_with(transport.clone()).unwrap();
        assert_eq!(
            transport.subscribed(),
            ["homie/dev1/$broadcast/#", "homie/dev1/n1/p1/set"]
        );
    }

    #[test]
    fn publishes_initial_value_with_retained_flag() {
        let sensor = Property::builder("temp")
            .data_type(DataType::Float)
            .retained(false)
            .value(21.5)
            .build()
            .unwrap();
        let device = Device::builder("dev1")
            .with_node(Node::builder("n1").with_property(sensor).build().unwrap())
            .build()
            .unwrap();
        let transport = RecordingTransport::new();
        device.connect_with(transport.clone()).unwrap();

        let value = transport
            .publishes()
            .into_iter()
            .find(|p| p.topic == "homie/dev1/n1/temp")
            .unwrap();
        assert_eq!(value.payload, "21.5");
        assert!(!value.retain);
    }

    #[test]
    fn on_connect_runs_device_then_nodes_then_properties() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let p1 = Property::builder("p1").build().unwrap();
        let p2 = Property::builder("p2").build().unwrap();
        let n1 = Node::builder("n1").with_property(p1.clone()).build().unwrap();
        let n2 = Node::builder("n2").with_property(p2.clone()).build().unwrap();
        let device = Device::builder("dev1")
            .with_node(n1.clone())
            .with_node(n2.clone())
            .build()
            .unwrap();

        for property in [&p1, &p2] {
            let order = Arc::clone(&order);
            property.on_connect(move |p| {
                order.lock().push(p.id().to_string());
                Ok(())
            });
        }
        for node in [&n1, &n2] {
            let order = Arc::clone(&order);
            node.on_connect(move |n| {
                order.lock().push(n.id().to_string());
                Ok(())
            });
        }
        let sink = Arc::clone(&order);
        device.on_connect(move |d| {
            assert_eq!(d.state(), DeviceState::Init);
            sink.lock().push(d.id().to_string());
            Ok(())
        });

        device.connect_with(RecordingTransport::new()).unwrap();
        assert_eq!(*order.lock(), ["dev1", "n1", "n2", "p1", "p2"]);
    }

    #[test]
    fn on_connect_can_choose_final_state() {
        let (device, _, _) = sample_device();
        device.on_connect(|d| {
            d.set_state(DeviceState::Sleeping)?;
            Ok(())
        });
        let transport = RecordingTransport::new();
        device.connect_with(transport.clone()).unwrap();

        assert_eq!(transport.states(), ["init", "sleeping"]);
        assert_eq!(device.state(), DeviceState::Sleeping);
    }

    #[test]
    fn failed_publish_leaves_device_disconnected() {
        let (device, _, p1) = sample_device();
        let transport = RecordingTransport::new();
        transport.fail_publish_on("/$datatype");

        let result = device.connect_with(transport.clone());
        assert!(matches!(result, Err(Error::Transport(_))));
        assert!(!device.has_session());
        assert!(!device.is_connected());
        assert!(!p1.is_connected());
        assert_eq!(device.state(), DeviceState::Disconnected);
        assert!(transport.subscribed().is_empty());
        assert!(transport.is_disconnected());
    }
}

// ============================================================================
// Attribute updates
// ============================================================================

mod updates {
    use super::*;

    #[test]
    fn unit_update_runs_one_cycle_and_republishes_only_property() {
        let (device, _, p1) = sample_device();
        p1.set_value(3).unwrap();
        let transport = RecordingTransport::new();
        device.connect_with(transport.clone()).unwrap();
        transport.clear();

        p1.update_attribute("unit", "C").unwrap();

        assert_eq!(transport.states(), ["init", "ready"]);
        let attributes: Vec<String> = transport
            .topics()
            .into_iter()
            .filter(|t| !t.ends_with("/$state"))
            .collect();
        assert_eq!(
            attributes,
            [
                "homie/dev1/n1/p1/$name",
                "homie/dev1/n1/p1/$datatype",
                "homie/dev1/n1/p1/$format",
                "homie/dev1/n1/p1/$settable",
                "homie/dev1/n1/p1/$retained",
                "homie/dev1/n1/p1/$unit",
            ]
        );
        assert_eq!(transport.last("homie/dev1/n1/p1/$unit").as_deref(), Some("C"));
        assert_eq!(p1.value(), Some(PropertyValue::Integer(3)));
    }

    #[test]
    fn clearing_unit_empties_its_retained_topic() {
        let (device, _, p1) = sample_device();
        p1.update_attribute("unit", "C").unwrap();
        let transport = RecordingTransport::new();
        device.connect_with(transport.clone()).unwrap();
        transport.clear();

        p1.update_attribute("unit", "").unwrap();

        assert_eq!(p1.attribute("unit"), None);
        assert_eq!(transport.last("homie/dev1/n1/p1/$unit").as_deref(), Some(""));
        let cleared = transport
            .publishes()
            .into_iter()
            .find(|p| p.topic == "homie/dev1/n1/p1/$unit")
            .unwrap();
        assert!(cleared.retain);
        assert_eq!(transport.states(), ["init", "ready"]);
    }

    #[test]
    fn clearing_node_type_and_extensions_empties_their_topics() {
        let (device, n1, _) = sample_device();
        device.update_attribute("location", "kitchen").unwrap();
        let transport = RecordingTransport::new();
        device.connect_with(transport.clone()).unwrap();
        transport.clear();

        n1.update_attribute("type", "").unwrap();
        device.update_attribute("location", "").unwrap();

        assert_eq!(transport.last("homie/dev1/n1/$type").as_deref(), Some(""));
        assert_eq!(transport.last("homie/dev1/$location").as_deref(), Some(""));
        assert_eq!(transport.states(), ["init", "ready", "init", "ready"]);
    }

    #[test]
    fn unchanged_keys_are_not_cleared() {
        let (device, _, p1) = sample_device();
        let transport = RecordingTransport::new();
        device.connect_with(transport.clone()).unwrap();
        transport.clear();

        p1.update_attribute("name", "Brightness").unwrap();

        assert!(transport.publishes().iter().all(|p| !p.payload.is_empty()));
    }

    #[test]
    fn callback_runs_in_init() {
        let (device, _, p1) = sample_device();
        device.connect_with(RecordingTransport::new()).unwrap();

        let observed = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&observed);
        let probe = device.clone();
        p1.update_attribute_with("name", "Brightness", move || {
            *sink.lock() = Some(probe.state());
            Ok(())
        })
        .unwrap();

        assert_eq!(*observed.lock(), Some(DeviceState::Init));
        assert_eq!(device.state(), DeviceState::Ready);
    }

    #[test]
    fn failures_restore_prior_state() {
        let (device, n1, p1) = sample_device();
        let transport = RecordingTransport::new();
        device.connect_with(transport.clone()).unwrap();
        device.set_state(DeviceState::Alert).unwrap();

        let result = p1.update_attribute_with("unit", "C", || Err("vetoed".into()));
        assert!(matches!(result, Err(Error::Callback(_))));
        assert_eq!(p1.unit(), None);
        assert_eq!(device.state(), DeviceState::Alert);

        transport.fail_publish_on("/n1/$name");
        assert!(n1.update_attribute("name", "Other").is_err());
        assert_eq!(device.state(), DeviceState::Alert);
        assert_eq!(transport.states().last().map(String::as_str), Some("alert"));
    }

    #[test]
    fn derived_keys_rejected_without_cycle() {
        let (device, n1, _) = sample_device();
        let transport = RecordingTransport::new();
        device.connect_with(transport.clone()).unwrap();
        transport.clear();

        assert!(matches!(
            n1.update_attribute("properties", "p9"),
            Err(Error::InvalidAttributeKey(_))
        ));
        assert!(matches!(
            device.update_attribute("state", "ready"),
            Err(Error::InvalidAttributeKey(_))
        ));
        assert!(transport.publishes().is_empty());
    }

    #[test]
    fn set_value_publishes_without_cycle() {
        let (device, _, p1) = sample_device();
        let transport = RecordingTransport::new();
        device.connect_with(transport.clone()).unwrap();
        transport.clear();

        p1.set_value(7).unwrap();
        p1.set_value(7).unwrap();

        let published = transport.publishes();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].topic, "homie/dev1/n1/p1");
        assert_eq!(published[0].payload, "7");
        assert!(transport.states().is_empty());
    }

    #[test]
    fn settable_update_toggles_set_subscription() {
        let (device, _, p1) = sample_device();
        let transport = RecordingTransport::new();
        device.connect_with(transport.clone()).unwrap();

        p1.update_attribute("settable", "false").unwrap();
        assert_eq!(transport.subscribed(), ["homie/dev1/$broadcast/#"]);

        p1.update_attribute("settable", "true").unwrap();
        assert!(transport.subscribed().contains(&"homie/dev1/n1/p1/set".to_string()));
    }
}

// ============================================================================
// Attach / detach
// ============================================================================

mod structure {
    use super::*;

    #[test]
    fn detach_and_reattach_settable_property() {
        let (device, n1, p1) = sample_device();
        let transport = RecordingTransport::new();
        device.connect_with(transport.clone()).unwrap();
        let set = "homie/dev1/n1/p1/set";

        let removed = n1.remove_property("p1").unwrap();
        assert!(!transport.subscribed().contains(&set.to_string()));
        assert!(!removed.is_connected());
        assert_eq!(transport.last("homie/dev1/n1/$properties").as_deref(), Some(""));

        n1.add_property(&removed).unwrap();
        assert_eq!(transport.subscribe_count(set), 2);
        assert_eq!(
            transport.subscribed().iter().filter(|p| *p == set).count(),
            1
        );
        assert!(p1.is_connected());
        assert_eq!(transport.last("homie/dev1/n1/$properties").as_deref(), Some("p1"));

        // Attaching again is a no-op
        n1.add_property(&p1).unwrap();
        assert_eq!(transport.subscribe_count(set), 2);
    }

    #[test]
    fn attach_under_connected_device_runs_cycle() {
        let (device, _, _) = sample_device();
        let transport = RecordingTransport::new();
        device.connect_with(transport.clone()).unwrap();
        transport.clear();

        let connected = Arc::new(Mutex::new(false));
        let flag = Arc::clone(&connected);
        let n2 = Node::builder("n2")
            .with_property(Property::builder("p9").settable(true).build().unwrap())
            .build()
            .unwrap();
        n2.on_connect(move |_| {
            *flag.lock() = true;
            Ok(())
        });
        device.add_node(&n2).unwrap();

        assert_eq!(transport.states(), ["init", "ready"]);
        assert_eq!(transport.last("homie/dev1/$nodes").as_deref(), Some("n1,n2"));
        assert!(transport.subscribed().contains(&"homie/dev1/n2/p9/set".to_string()));
        assert!(n2.is_connected());
        assert!(*connected.lock());
    }

    #[test]
    fn failed_attach_rolls_back() {
        let (device, _, _) = sample_device();
        let transport = RecordingTransport::new();
        device.connect_with(transport.clone()).unwrap();
        transport.fail_publish_on("/n2/$name");

        let n2 = Node::builder("n2").build().unwrap();
        assert!(device.add_node(&n2).is_err());
        assert!(device.node("n2").is_none());
        assert!(n2.device().is_none());
        assert!(!n2.is_connected());
        assert_eq!(device.state(), DeviceState::Ready);
    }

    #[test]
    fn detach_cascades_disconnect_top_down() {
        let (device, n1, p1) = sample_device();
        let order = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&order);
        n1.on_disconnect(move |n| {
            sink.lock().push(n.id().to_string());
            Ok(())
        });
        let sink = Arc::clone(&order);
        p1.on_disconnect(move |p| {
            sink.lock().push(p.id().to_string());
            Ok(())
        });
        let transport = RecordingTransport::new();
        device.connect_with(transport.clone()).unwrap();

        n1.disconnect().unwrap();
        assert_eq!(*order.lock(), ["n1", "p1"]);
        assert!(!n1.is_connected());
        assert!(!p1.is_connected());
        assert_eq!(transport.subscribed(), ["homie/dev1/$broadcast/#"]);
        assert_eq!(transport.last("homie/dev1/$nodes").as_deref(), Some(""));
    }

    #[test]
    fn user_routes_of_detached_node_are_dropped() {
        let (device, n1, _) = sample_device();
        let transport = RecordingTransport::new();
        device.connect_with(transport.clone()).unwrap();
        n1.subscribe("cmd/#", QoS::AtMostOnce).unwrap();
        assert!(transport.subscribed().contains(&"homie/dev1/n1/cmd/#".to_string()));

        device.remove_node("n1").unwrap();
        assert!(!transport.subscribed().contains(&"homie/dev1/n1/cmd/#".to_string()));
    }
}

// ============================================================================
// Disconnect and reconnect
// ============================================================================

mod session {
    use super::*;

    #[test]
    fn disconnect_tears_down_and_notifies() {
        let (device, _, p1) = sample_device();
        let order = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&order);
        device.on_disconnect(move |d| {
            sink.lock().push(format!("{}:{}", d.id(), d.state()));
            Ok(())
        });
        let sink = Arc::clone(&order);
        p1.on_disconnect(move |p| {
            sink.lock().push(p.id().to_string());
            Ok(())
        });
        let transport = RecordingTransport::new();
        device.connect_with(transport.clone()).unwrap();

        device.disconnect().unwrap();
        assert!(transport.subscribed().is_empty());
        assert_eq!(transport.states(), ["init", "ready", "disconnected"]);
        assert!(transport.is_disconnected());
        assert_eq!(*order.lock(), ["dev1:disconnected", "p1"]);
        assert!(matches!(
            p1.publish("", b"1", QoS::AtLeastOnce, true),
            Err(Error::NotConnected)
        ));

        // Disconnecting twice is harmless
        device.disconnect().unwrap();
        assert_eq!(order.lock().len(), 2);
    }

    #[test]
    fn disconnect_from_callback_does_not_deadlock() {
        let (device, _, p1) = sample_device();
        let transport = RecordingTransport::new();
        device.connect_with(transport.clone()).unwrap();
        let handle = device.clone();
        p1.on_set(move |_, _| {
            handle.disconnect()?;
            Ok(())
        });

        device.handle_message("homie/dev1/n1/p1/set", b"4");
        assert!(!device.has_session());
        assert_eq!(p1.value(), Some(PropertyValue::Integer(4)));
    }

    #[test]
    fn reconnect_republishes_and_restores_state() {
        let (device, _, p1) = sample_device();
        let errors = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&errors);
        device.on_error(move |err| sink.lock().push(err.to_string()));
        let transport = RecordingTransport::new();
        device.connect_with(transport.clone()).unwrap();
        device.set_state(DeviceState::Sleeping).unwrap();

        device.handle_connection_lost("keep-alive timeout");
        assert!(!device.is_connected());
        assert!(!p1.is_connected());
        assert_eq!(device.state(), DeviceState::Sleeping);
        assert_eq!(errors.lock().len(), 1);

        transport.clear();
        device.handle_reconnected().unwrap();
        assert_eq!(transport.states(), ["init", "sleeping"]);
        assert!(transport.topics().contains(&"homie/dev1/n1/p1/$datatype".to_string()));
        assert_eq!(transport.subscribe_count("homie/dev1/n1/p1/set"), 2);
        assert!(p1.is_connected());
    }
}
