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

//! Connect, publish the plan, wait for delivery, disconnect.

use anyhow::Result;
use log::{error, info, warn};

use crate::config::ProbeConfig;
use crate::plan::PublishPlan;
use crate::publisher::{DeliveryProgress, TelemetryPublisher};
use crate::session::MqttSession;

/// Outcome of a probe run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeReport {
    pub client_id: String,
    /// Topics whose publish was queued, in order.
    pub published: Vec<String>,
    /// Topics whose publish failed to queue.
    pub failed: Vec<String>,
    pub progress: DeliveryProgress,
    /// Every queued publish was delivered before the linger window closed.
    pub settled: bool,
}

/// A single connect-publish-disconnect run against a broker.
pub struct Probe {
    config: ProbeConfig,
    plan: PublishPlan,
}

impl Probe {
    /// Create a probe. Fails when the plan is empty or names an invalid topic.
    pub fn new(config: ProbeConfig, plan: PublishPlan) -> Result<Self> {
        plan.validate()?;
        Ok(Self { config, plan })
    }

    /// Connection settings used by [`Probe::run`].
    pub fn config(&self) -> &ProbeConfig {
        &self.config
    }

    /// Messages published on each run.
    pub fn plan(&self) -> &PublishPlan {
        &self.plan
    }

    /// Connect to the broker and run the plan. A connect failure is returned
    /// before anything is published.
    pub async fn run(&self) -> Result<ProbeReport> {
        let session = MqttSession::connect(&self.config).await?;
        self.run_with(&session).await
    }

    /// Run the plan through an already connected publisher. The publisher is
    /// always disconnected before returning.
    pub async fn run_with<P>(&self, publisher: &P) -> Result<ProbeReport>
    where
        P: TelemetryPublisher + ?Sized,
    {
        let id = &self.config.client_id;
        let qos = self.config.qos;
        let mut published = Vec::with_capacity(self.plan.len());
        let mut failed = Vec::new();

        for message in self.plan.messages() {
            match publisher.publish(message, qos).await {
                Ok(()) => {
                    info!("[{id}] Published to {}: {}", message.topic, message.payload_str());
                    published.push(message.topic.clone());
                }
                Err(e) => {
                    error!("[{id}] {e:#}");
                    failed.push(message.topic.clone());
                }
            }
        }

        let progress = if published.is_empty() {
            DeliveryProgress::default()
        } else {
            info!("[{id}] Waiting up to {:?} for delivery", self.config.linger);
            match publisher.settle(published.len(), qos, self.config.linger).await {
                Ok(progress) => progress,
                Err(e) => {
                    error!("[{id}] {e:#}");
                    DeliveryProgress::default()
                }
            }
        };
        let settled = !published.is_empty() && progress.is_settled(published.len(), qos);

        if let Err(e) = publisher.disconnect().await {
            warn!("[{id}] Disconnect failed: {e:#}");
        }

        Ok(ProbeReport {
            client_id: id.clone(),
            published,
            failed,
            progress,
            settled,
        })
    }
}
