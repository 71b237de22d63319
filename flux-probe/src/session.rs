// Copyright 2025 The Drasi Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! MQTT session backing a probe run.
//!
//! A single spawned task drives the `rumqttc` event loop. It resolves a
//! oneshot on CONNACK, so [`MqttSession::connect`] only returns once the
//! broker accepted the connection, and it reports delivery counters through
//! a watch channel until the DISCONNECT goes out.

use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use log::{debug, error, info, warn};
use rumqttc::{AsyncClient, Event, EventLoop, Incoming, Outgoing, QoS};
use tokio::sync::{oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::config::ProbeConfig;
use crate::publisher::{DeliveryProgress, TelemetryPublisher};
use crate::reading::Telemetry;

/// A connected MQTT client.
pub struct MqttSession {
    client: AsyncClient,
    client_id: String,
    linger: Duration,
    progress: watch::Receiver<DeliveryProgress>,
    /// Event loop driver (set on connect, cleared on disconnect).
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl MqttSession {
    /// Connect to the configured broker and wait for its CONNACK.
    ///
    /// Fails without retrying when the broker is unreachable, refuses the
    /// connection, or does not answer within `connect_timeout`.
    pub async fn connect(config: &ProbeConfig) -> Result<Self> {
        info!(
            "[{}] Connecting to MQTT broker at {}",
            config.client_id,
            config.broker_addr()
        );

        let (client, eventloop) = AsyncClient::new(config.mqtt_options(), config.request_capacity);
        let (connack_tx, connack_rx) = oneshot::channel();
        let (progress_tx, progress_rx) = watch::channel(DeliveryProgress::default());

        let driver = tokio::spawn(drive_event_loop(
            config.client_id.clone(),
            eventloop,
            connack_tx,
            progress_tx,
        ));

        let failure = match timeout(config.connect_timeout, connack_rx).await {
            Ok(Ok(Ok(()))) => None,
            Ok(Ok(Err(reason))) => Some(reason),
            Ok(Err(_)) => Some("event loop stopped before CONNACK".to_string()),
            Err(_) => Some(format!("no CONNACK within {:?}", config.connect_timeout)),
        };
        if let Some(reason) = failure {
            driver.abort();
            bail!("Connection to {} failed: {reason}", config.broker_addr());
        }

        info!("[{}] Connected to {}", config.client_id, config.broker_addr());
        Ok(Self {
            client,
            client_id: config.client_id.clone(),
            linger: config.linger,
            progress: progress_rx,
            driver: Mutex::new(Some(driver)),
        })
    }

    /// Client ID announced in CONNECT.
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Latest delivery counters. They stay readable after the event loop
    /// has stopped.
    pub fn progress(&self) -> DeliveryProgress {
        *self.progress.borrow()
    }
}

#[async_trait]
impl TelemetryPublisher for MqttSession {
    async fn publish(&self, message: &Telemetry, qos: QoS) -> Result<()> {
        self.client
            .publish(message.topic.as_str(), qos, false, message.payload.clone())
            .await
            .with_context(|| format!("Failed to publish to {}", message.topic))
    }

    async fn settle(&self, expected: usize, qos: QoS, window: Duration) -> Result<DeliveryProgress> {
        let mut progress = self.progress.clone();
        let waited = timeout(window, async {
            progress
                .wait_for(|p| p.is_settled(expected, qos))
                .await
                .map(|p| *p)
        })
        .await;

        match waited {
            Ok(Ok(reached)) => Ok(reached),
            Ok(Err(_)) => {
                let reached = *progress.borrow();
                warn!(
                    "[{}] Session closed before delivery was confirmed (sent {}, acknowledged {}, expected {expected})",
                    self.client_id, reached.sent, reached.acknowledged
                );
                Ok(reached)
            }
            Err(_) => {
                let reached = *progress.borrow();
                warn!(
                    "[{}] Delivery not confirmed within {window:?} (sent {}, acknowledged {}, expected {expected})",
                    self.client_id, reached.sent, reached.acknowledged
                );
                Ok(reached)
            }
        }
    }

    async fn disconnect(&self) -> Result<()> {
        let Some(mut handle) = self.driver.lock().await.take() else {
            return Ok(());
        };

        if let Err(e) = self.client.disconnect().await {
            // The driver already exited; nothing left to close.
            debug!("[{}] Disconnect request not queued: {e}", self.client_id);
        }

        match timeout(self.linger, &mut handle).await {
            Ok(Ok(())) => {
                info!("[{}] Disconnected", self.client_id);
                Ok(())
            }
            Ok(Err(e)) => Err(anyhow!("MQTT event loop task failed: {e}")),
            Err(_) => {
                handle.abort();
                warn!(
                    "[{}] Event loop did not stop within {:?}, aborted",
                    self.client_id, self.linger
                );
                Ok(())
            }
        }
    }
}

impl Drop for MqttSession {
    fn drop(&mut self) {
        if let Some(handle) = self.driver.get_mut().take() {
            handle.abort();
        }
    }
}

async fn drive_event_loop(
    client_id: String,
    mut eventloop: EventLoop,
    connack_tx: oneshot::Sender<Result<(), String>>,
    progress_tx: watch::Sender<DeliveryProgress>,
) {
    let mut connack_tx = Some(connack_tx);
    debug!("[{client_id}] MQTT event loop started");

    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Incoming::ConnAck(ack))) => {
                debug!("[{client_id}] CONNACK received: {:?}", ack.code);
                if let Some(tx) = connack_tx.take() {
                    let _ = tx.send(Ok(()));
                }
            }
            Ok(Event::Outgoing(Outgoing::Publish(pkid))) => {
                debug!("[{client_id}] PUBLISH sent (pkid={pkid})");
                progress_tx.send_modify(|p| p.sent += 1);
            }
            Ok(Event::Incoming(Incoming::PubAck(_) | Incoming::PubComp(_))) => {
                progress_tx.send_modify(|p| p.acknowledged += 1);
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                debug!("[{client_id}] DISCONNECT sent");
                break;
            }
            Ok(_) => {} // PINGREQ/PINGRESP, PUBREC/PUBREL
            Err(e) => {
                match connack_tx.take() {
                    Some(tx) => {
                        let _ = tx.send(Err(e.to_string()));
                    }
                    None => error!("[{client_id}] MQTT connection error: {e}"),
                }
                break;
            }
        }
    }
}
