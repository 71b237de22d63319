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

//! Publishing seam between a probe run and the transport carrying it.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use rumqttc::QoS;

use crate::reading::Telemetry;

/// Delivery counters observed on the wire.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryProgress {
    /// PUBLISH packets written to the broker.
    pub sent: usize,
    /// PUBACK (QoS 1) or PUBCOMP (QoS 2) packets received.
    pub acknowledged: usize,
}

impl DeliveryProgress {
    /// Whether `expected` publishes are fully delivered at `qos`.
    pub fn is_settled(&self, expected: usize, qos: QoS) -> bool {
        match qos {
            QoS::AtMostOnce => self.sent >= expected,
            QoS::AtLeastOnce | QoS::ExactlyOnce => {
                self.sent >= expected && self.acknowledged >= expected
            }
        }
    }
}

/// Something a probe can publish telemetry through.
#[async_trait]
pub trait TelemetryPublisher: Send + Sync {
    /// Queue one message for publishing.
    async fn publish(&self, message: &Telemetry, qos: QoS) -> Result<()>;

    /// Wait up to `window` for `expected` messages to be delivered and return
    /// the progress reached. Running out of time or losing the connection is
    /// not an error; the counters show how far delivery got.
    async fn settle(&self, expected: usize, qos: QoS, window: Duration) -> Result<DeliveryProgress>;

    /// Close the connection. Calling it twice is a no-op.
    async fn disconnect(&self) -> Result<()>;
}
