// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Integration tests for the MQTT transport using mockforge-mqtt.

#![cfg(feature = "mqtt")]

use std::sync::Arc;
use std::time::Duration;

use homie_device::protocol::{MqttConfig, ReconnectionPolicy};
use homie_device::types::DataType;
use homie_device::{Device, DeviceState, Error, Node, Property, PropertyValue, Topic};
use mockforge_mqtt::start_mqtt_server;
use parking_lot::Mutex;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet};
use tokio::io::copy_bidirectional;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio::time::sleep;

/// Helper to find an available port for testing.
fn get_test_port() -> u16 {
    use std::sync::atomic::{AtomicU16, Ordering};
    static PORT_COUNTER: AtomicU16 = AtomicU16::new(18950);
    PORT_COUNTER.fetch_add(1, Ordering::SeqCst)
}

/// Starts a mock MQTT broker on the given port.
async fn start_mock_broker(port: u16) {
    let config = mockforge_mqtt::broker::MqttConfig {
        port,
        host: "127.0.0.1".to_string(),
        ..Default::default()
    };

    tokio::spawn(async move {
        let _ = start_mqtt_server(config).await;
    });

    // Give the broker time to start and bind
    sleep(Duration::from_millis(500)).await;
}

fn config_for(port: u16) -> MqttConfig {
    MqttConfig::builder()
        .host("127.0.0.1")
        .port(port)
        .connection_timeout(Duration::from_secs(5))
        .reconnection(ReconnectionPolicy::disabled())
        .build()
        .unwrap()
}

/// Polls `condition` for up to five seconds.
async fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if condition() {
            return true;
        }
        sleep(Duration::from_millis(50)).await;
    }
    condition()
}

/// A plain MQTT client attached straight to the broker, recording what it
/// receives on one filter.
struct Observer {
    client: AsyncClient,
    seen: Arc<Mutex<Vec<(String, String)>>>,
    task: JoinHandle<()>,
}

impl Observer {
    async fn start(port: u16, filter: &str) -> Self {
        let mut options = MqttOptions::new(format!("observer-{port}"), "127.0.0.1", port);
        options.set_keep_alive(Duration::from_secs(5));
        let (client, mut event_loop) = AsyncClient::new(options, 64);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let task = tokio::spawn(async move {
            while let Ok(event) = event_loop.poll().await {
                if let Event::Incoming(Packet::Publish(publish)) = event {
                    let payload = String::from_utf8_lossy(&publish.payload).into_owned();
                    sink.lock().push((publish.topic.clone(), payload));
                }
            }
        });

        client
            .subscribe(filter, rumqttc::QoS::AtLeastOnce)
            .await
            .unwrap();
        // Let the subscription reach the broker
        sleep(Duration::from_millis(300)).await;
        Self { client, seen, task }
    }

    fn payloads(&self, topic: &str) -> Vec<String> {
        self.seen
            .lock()
            .iter()
            .filter(|(t, _)| t == topic)
            .map(|(_, payload)| payload.clone())
            .collect()
    }

    fn count_suffix(&self, suffix: &str) -> usize {
        self.seen
            .lock()
            .iter()
            .filter(|(t, _)| t.ends_with(suffix))
            .count()
    }
}

impl Drop for Observer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// TCP relay between the device and the broker that can drop every
/// connection and stop listening, then listen again on the same port.
struct Relay {
    port: u16,
    broker: u16,
    tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl Relay {
    async fn start(port: u16, broker: u16) -> Self {
        let relay = Self {
            port,
            broker,
            tasks: Arc::new(Mutex::new(Vec::new())),
        };
        relay.restore().await;
        relay
    }

    async fn restore(&self) {
        let listener = bind(self.port).await;
        let broker = self.broker;
        let tasks = Arc::clone(&self.tasks);
        let accept = tokio::spawn(async move {
            while let Ok((mut inbound, _)) = listener.accept().await {
                let Ok(mut outbound) = TcpStream::connect(("127.0.0.1", broker)).await else {
                    continue;
                };
                let pipe = tokio::spawn(async move {
                    let _ = copy_bidirectional(&mut inbound, &mut outbound).await;
                });
                tasks.lock().push(pipe);
            }
        });
        self.tasks.lock().push(accept);
    }

    fn cut(&self) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
    }
}

impl Drop for Relay {
    fn drop(&mut self) {
        self.cut();
    }
}

async fn bind(port: u16) -> TcpListener {
    for _ in 0..40 {
        if let Ok(listener) = TcpListener::bind(("127.0.0.1", port)).await {
            return listener;
        }
        sleep(Duration::from_millis(50)).await;
    }
    panic!("port {port} stayed busy");
}

/// One node holding `count` integer properties.
fn large_device(id: &str, count: u32) -> Device {
    let mut node = Node::builder("sensors");
    for index in 0..count {
        node = node.with_property(
            Property::builder(format!("p{index}"))
                .data_type(DataType::Integer)
                .value(index)
                .build()
                .unwrap(),
        );
    }
    Device::builder(id)
        .with_node(node.build().unwrap())
        .build()
        .unwrap()
}

fn error_log(device: &Device) -> Arc<Mutex<Vec<String>>> {
    let errors = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&errors);
    device.on_error(move |err| sink.lock().push(err.to_string()));
    errors
}

fn sample_device() -> Device {
    let level = Property::builder("level")
        .data_type(DataType::Integer)
        .format("0:100")
        .settable(true)
        .value(50)
        .build()
        .unwrap();
    Device::builder("mqtt-dev")
        .with_node(Node::builder("dimmer").with_property(level).build().unwrap())
        .build()
        .unwrap()
}

// ============================================================================
// Session
// ============================================================================

mod session {
    use super::*;

    #[tokio::test(flavor = "multi_thread")]
    async fn connect_publishes_and_becomes_ready() {
        let port = get_test_port();
        start_mock_broker(port).await;

        let device = sample_device();
        let result = device.connect(&config_for(port)).await;
        assert!(result.is_ok(), "Failed to connect: {:?}", result.err());

        assert!(device.has_session());
        assert!(device.is_connected());
        assert_eq!(device.state(), DeviceState::Ready);

        device.disconnect().unwrap();
        assert!(!device.has_session());
        assert_eq!(device.state(), DeviceState::Disconnected);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn connect_twice_is_noop() {
        let port = get_test_port();
        start_mock_broker(port).await;

        let device = sample_device();
        let config = config_for(port);
        device.connect(&config).await.unwrap();
        device.connect(&config).await.unwrap();
        assert_eq!(device.state(), DeviceState::Ready);
        device.disconnect().unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn updates_and_values_go_through_the_session() {
        let port = get_test_port();
        start_mock_broker(port).await;

        let device = sample_device();
        device.connect(&config_for(port)).await.unwrap();
        let level = device.node("dimmer").unwrap().property("level").unwrap();

        level.update_attribute("unit", "%").unwrap();
        level.set_value(75).unwrap();
        assert_eq!(device.state(), DeviceState::Ready);
        assert_eq!(level.attribute("unit").as_deref(), Some("%"));

        device.disconnect().unwrap();
    }

    #[tokio::test]
    async fn unreachable_broker_fails() {
        let device = sample_device();
        let config = MqttConfig::builder()
            .host("127.0.0.1")
            .port(1)
            .connection_timeout(Duration::from_secs(2))
            .reconnection(ReconnectionPolicy::disabled())
            .build()
            .unwrap();

        let result = device.connect(&config).await;
        assert!(matches!(result, Err(Error::Transport(_))));
        assert!(!device.has_session());
        assert_eq!(device.state(), DeviceState::Disconnected);
    }
}

// ============================================================================
// Routing
// ============================================================================

mod routing {
    use super::*;

    #[tokio::test(flavor = "multi_thread")]
    async fn broker_set_reaches_on_set() {
        let port = get_test_port();
        start_mock_broker(port).await;

        let device = sample_device();
        let level = device.node("dimmer").unwrap().property("level").unwrap();
        let requested = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&requested);
        level.on_set(move |_, value| {
            *sink.lock() = Some(value.clone());
            Ok(())
        });
        device.connect(&config_for(port)).await.unwrap();
        sleep(Duration::from_millis(300)).await;

        let observer = Observer::start(port, "homie/mqtt-dev/dimmer/level").await;
        observer
            .client
            .publish("homie/mqtt-dev/dimmer/level/set", rumqttc::QoS::AtLeastOnce, false, "80")
            .await
            .unwrap();

        assert!(wait_for(|| requested.lock().is_some()).await, "on_set never ran");
        assert_eq!(*requested.lock(), Some(PropertyValue::Integer(80)));
        assert_eq!(level.value(), Some(PropertyValue::Integer(80)));
        assert!(
            wait_for(|| observer.payloads("homie/mqtt-dev/dimmer/level").contains(&"80".to_string()))
                .await
        );

        device.disconnect().unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn tree_larger_than_request_capacity_connects() {
        let port = get_test_port();
        start_mock_broker(port).await;
        let observer = Observer::start(port, "homie/large-dev/#").await;

        let device = large_device("large-dev", 60);
        let config = MqttConfig::builder()
            .host("127.0.0.1")
            .port(port)
            .request_capacity(8)
            .reconnection(ReconnectionPolicy::disabled())
            .build()
            .unwrap();
        let result = device.connect(&config).await;
        assert!(result.is_ok(), "Failed to connect: {:?}", result.err());
        assert_eq!(device.state(), DeviceState::Ready);

        assert!(wait_for(|| observer.count_suffix("/$datatype") == 60).await);
        assert!(
            wait_for(|| observer.payloads("homie/large-dev/$state").last().map(String::as_str)
                == Some("ready"))
            .await
        );

        device.disconnect().unwrap();
    }
}

// ============================================================================
// Reconnection
// ============================================================================

mod reconnection {
    use super::*;

    #[tokio::test(flavor = "multi_thread")]
    async fn lost_connection_is_restored_and_republished() {
        let broker = get_test_port();
        let relay_port = get_test_port();
        start_mock_broker(broker).await;
        let relay = Relay::start(relay_port, broker).await;
        let observer = Observer::start(broker, "homie/big-dev/#").await;

        let device = large_device("big-dev", 60);
        let errors = error_log(&device);
        let config = MqttConfig::builder()
            .host("127.0.0.1")
            .port(relay_port)
            .request_capacity(8)
            .reconnection(
                ReconnectionPolicy::new()
                    .with_initial_delay(Duration::from_millis(100))
                    .with_max_delay(Duration::from_millis(200)),
            )
            .build()
            .unwrap();
        device.connect(&config).await.unwrap();
        device.set_state(DeviceState::Alert).unwrap();
        assert!(wait_for(|| observer.count_suffix("/$datatype") == 60).await);

        relay.cut();
        assert!(wait_for(|| !device.is_connected()).await, "loss never noticed");
        assert!(device.has_session());
        assert_eq!(device.state(), DeviceState::Alert);
        assert!(
            wait_for(|| observer.payloads("homie/big-dev/$state").contains(&"lost".to_string()))
                .await,
            "last will not delivered"
        );

        relay.restore().await;
        assert!(wait_for(|| device.is_connected()).await, "never reconnected");
        assert!(wait_for(|| observer.count_suffix("/$datatype") == 120).await);
        assert!(
            wait_for(|| observer.payloads("homie/big-dev/$state").last().map(String::as_str)
                == Some("alert"))
            .await
        );
        assert_eq!(device.state(), DeviceState::Alert);
        assert!(errors.lock().iter().any(|e| e.contains("connection failed")));

        device.disconnect().unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn giving_up_closes_the_session() {
        let broker = get_test_port();
        let relay_port = get_test_port();
        start_mock_broker(broker).await;
        let relay = Relay::start(relay_port, broker).await;

        let device = sample_device();
        let errors = error_log(&device);
        let config = config_for(relay_port);
        device.connect(&config).await.unwrap();

        relay.cut();
        assert!(wait_for(|| !device.has_session()).await, "session kept after giving up");
        assert!(!device.is_connected());
        assert_eq!(device.state(), DeviceState::Disconnected);
        assert!(errors.lock().iter().any(|e| e.contains("session closed")));

        relay.restore().await;
        device.connect(&config).await.unwrap();
        assert!(device.has_session());
        assert!(device.is_connected());
        assert_eq!(device.state(), DeviceState::Ready);

        device.disconnect().unwrap();
    }
}

// ============================================================================
// Configuration
// ============================================================================

mod configuration {
    use super::*;

    #[test]
    fn parse_mqtt_url_with_port() {
        let config = MqttConfig::from_url("mqtt://192.168.1.50:1884").unwrap();
        assert_eq!(config.host(), "192.168.1.50");
        assert_eq!(config.port(), 1884);
    }

    #[test]
    fn parse_bare_host_uses_default_port() {
        let config = MqttConfig::from_url("broker.local").unwrap();
        assert_eq!(config.host(), "broker.local");
        assert_eq!(config.port(), 1883);
    }

    #[test]
    fn invalid_url_rejected() {
        assert!(MqttConfig::from_url("mqtt://host:notaport").is_err());
    }
}
