// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! MQTT transport built on `rumqttc`.
//!
//! The session registers `<root>/<device>/$state = lost` as retained last
//! will and drives the event loop on a tokio task. The event loop feeds
//! inbound publishes and connection changes back into the device.
//!
//! Outgoing requests are queued in order on an unbounded channel and a
//! forwarding task hands them to the client with its awaiting API, so a
//! large tree never overflows the client's bounded request channel, even
//! when the republish runs on the event loop task after a reconnection.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use rumqttc::{AsyncClient, Event, EventLoop, LastWill, MqttOptions, Outgoing, Packet};
use tokio::sync::{mpsc, oneshot};

use super::{MqttConfig, ReconnectionPolicy, Transport};
use crate::device::{Device, Topic, WeakDevice};
use crate::error::TransportError;
use crate::state::LOST_PAYLOAD;
use crate::types::QoS;

/// A request waiting for the forwarding task.
#[derive(Debug)]
enum Outbound {
    Publish {
        topic: String,
        payload: Vec<u8>,
        qos: rumqttc::QoS,
        retain: bool,
    },
    Subscribe {
        pattern: String,
        qos: rumqttc::QoS,
    },
    Unsubscribe(String),
    Disconnect,
}

/// An open MQTT session for one device.
///
/// Created by [`crate::Device::connect`]; other code only sees it through
/// the [`Transport`] trait.
pub struct MqttTransport {
    requests: mpsc::UnboundedSender<Outbound>,
    closing: Arc<AtomicBool>,
}

impl MqttTransport {
    /// Connects to the broker on behalf of `device` and waits for the
    /// broker to acknowledge the session.
    pub(crate) async fn open(config: &MqttConfig, device: &Device) -> Result<Self, TransportError> {
        let client_id = config.client_id_for(device.id());
        let will_topic = device.topic_path().attribute("state");
        let options = mqtt_options(config, &client_id, &will_topic);

        let (client, event_loop) = AsyncClient::new(options, config.request_capacity());
        let closing = Arc::new(AtomicBool::new(false));
        let (requests, pending) = mpsc::unbounded_channel();

        // Channel to signal when ConnAck is received
        let (connack_tx, connack_rx) = oneshot::channel();

        tokio::spawn(handle_session_events(
            event_loop,
            device.downgrade(),
            config.reconnection().clone(),
            Arc::clone(&closing),
            connack_tx,
        ));

        let timeout = config.connection_timeout();
        match tokio::time::timeout(timeout, connack_rx).await {
            Ok(Ok(())) => {
                tracing::info!(
                    host = %config.host(),
                    port = %config.port(),
                    client_id = %client_id,
                    "Connected to MQTT broker"
                );
                tokio::spawn(forward_requests(client, pending));
                Ok(Self { requests, closing })
            }
            Ok(Err(_)) => Err(TransportError::ConnectionFailed(
                "MQTT event loop terminated before the broker acknowledged".to_string(),
            )),
            Err(_) => {
                closing.store(true, Ordering::Release);
                let _ = client.try_disconnect();
                Err(TransportError::Timeout(
                    u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                ))
            }
        }
    }

    fn enqueue(&self, request: Outbound) -> Result<(), TransportError> {
        self.requests
            .send(request)
            .map_err(|_| TransportError::Closed)
    }
}

impl Transport for MqttTransport {
    fn publish(
        &self,
        topic: &str,
        payload: &[u8],
        qos: QoS,
        retain: bool,
    ) -> Result<(), TransportError> {
        self.enqueue(Outbound::Publish {
            topic: topic.to_string(),
            payload: payload.to_vec(),
            qos: qos.into(),
            retain,
        })
    }

    fn subscribe(&self, pattern: &str, qos: QoS) -> Result<(), TransportError> {
        self.enqueue(Outbound::Subscribe {
            pattern: pattern.to_string(),
            qos: qos.into(),
        })
    }

    fn unsubscribe(&self, pattern: &str) -> Result<(), TransportError> {
        self.enqueue(Outbound::Unsubscribe(pattern.to_string()))
    }

    fn disconnect(&self) -> Result<(), TransportError> {
        self.closing.store(true, Ordering::Release);
        if self.enqueue(Outbound::Disconnect).is_err() {
            tracing::debug!("MQTT session already stopped");
        }
        Ok(())
    }
}

impl std::fmt::Debug for MqttTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MqttTransport")
            .field("closing", &self.closing.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}

fn mqtt_options(config: &MqttConfig, client_id: &str, will_topic: &str) -> MqttOptions {
    let mut options = MqttOptions::new(client_id, config.host(), config.port());
    options.set_keep_alive(config.keep_alive());
    options.set_clean_session(true);
    options.set_last_will(LastWill::new(
        will_topic,
        LOST_PAYLOAD,
        rumqttc::QoS::AtLeastOnce,
        true,
    ));

    if let Some(credentials) = config.credentials() {
        options.set_credentials(&credentials.username, &credentials.password);
    }
    options
}

/// Hands queued requests to the client in order, waiting for room in its
/// request channel. Stops after a disconnect or once the event loop is gone.
async fn forward_requests(client: AsyncClient, mut pending: mpsc::UnboundedReceiver<Outbound>) {
    while let Some(request) = pending.recv().await {
        let result = match request {
            Outbound::Publish {
                topic,
                payload,
                qos,
                retain,
            } => client.publish(topic, qos, retain, payload).await,
            Outbound::Subscribe { pattern, qos } => client.subscribe(pattern, qos).await,
            Outbound::Unsubscribe(pattern) => client.unsubscribe(pattern).await,
            Outbound::Disconnect => {
                if let Err(e) = client.disconnect().await {
                    tracing::debug!(error = %e, "MQTT disconnect not delivered");
                }
                break;
            }
        };
        if let Err(e) = result {
            let err = TransportError::from(e);
            tracing::debug!(error = %err, "MQTT event loop gone, dropping queued requests");
            break;
        }
    }
}

/// Drives the `rumqttc` event loop for one session.
///
/// The first ConnAck completes [`MqttTransport::open`]; later ones follow a
/// lost connection and make the device republish itself. When the policy
/// gives up, the device is told its session is gone.
async fn handle_session_events(
    mut event_loop: EventLoop,
    device: WeakDevice,
    policy: ReconnectionPolicy,
    closing: Arc<AtomicBool>,
    connack_tx: oneshot::Sender<()>,
) {
    let mut connack_tx = Some(connack_tx);
    let mut lost = false;
    let mut attempt = 0_u32;

    loop {
        match event_loop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(connack))) => {
                tracing::debug!(?connack, "MQTT broker connected");
                attempt = 0;
                if let Some(tx) = connack_tx.take() {
                    let _ = tx.send(());
                } else if lost {
                    lost = false;
                    let Some(device) = device.upgrade() else { break };
                    if let Err(err) = device.handle_reconnected() {
                        device.report(&err);
                    }
                }
            }
            Ok(Event::Incoming(Packet::SubAck(suback))) => {
                tracing::debug!(?suback, "MQTT subscription acknowledged");
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                let Some(device) = device.upgrade() else { break };
                tracing::trace!(topic = %publish.topic, "MQTT message received");
                device.handle_message(&publish.topic, &publish.payload);
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) if closing.load(Ordering::Acquire) => {
                tracing::debug!("MQTT session closed");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                if closing.load(Ordering::Acquire) || connack_tx.is_some() {
                    tracing::debug!(error = %e, "MQTT event loop stopped");
                    break;
                }
                let Some(owner) = device.upgrade() else { break };
                if !lost {
                    lost = true;
                    owner.handle_connection_lost(&e.to_string());
                }
                drop(owner);

                if !policy.should_retry(attempt) {
                    tracing::error!(attempts = attempt, "Giving up on MQTT reconnection");
                    closing.store(true, Ordering::Release);
                    if let Some(owner) = device.upgrade() {
                        owner.handle_session_closed(&e.to_string());
                    }
                    break;
                }
                let delay = policy.delay_for_attempt(attempt);
                attempt += 1;
                tracing::warn!(attempt, ?delay, "Reconnecting to MQTT broker");
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn options_carry_config() {
        let config = MqttConfig::builder()
            .host("broker.local")
            .port(1884)
            .keep_alive(Duration::from_secs(45))
            .build()
            .unwrap();
        let options = mqtt_options(&config, "homie-dev1-1234abcd", "homie/dev1/$state");

        assert_eq!(options.client_id(), "homie-dev1-1234abcd");
        assert_eq!(options.keep_alive(), Duration::from_secs(45));
        assert_eq!(options.broker_address(), ("broker.local".to_string(), 1884));
        assert!(options.clean_session());
        assert!(options.last_will().is_some());
    }

    #[tokio::test]
    async fn open_fails_without_broker() {
        let config = MqttConfig::builder()
            .host("127.0.0.1")
            .port(1)
            .connection_timeout(Duration::from_secs(2))
            .reconnection(ReconnectionPolicy::disabled())
            .build()
            .unwrap();
        let device = Device::builder("dev1").build().unwrap();

        let result = MqttTransport::open(&config, &device).await;
        assert!(result.is_err());
    }
}
