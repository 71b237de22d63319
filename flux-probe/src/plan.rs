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

//! Ordered set of messages a probe run publishes.

use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use serde_json::Value;

use crate::reading::{SpeedReading, Telemetry, TempReading};

/// Maximum length of an MQTT topic name in bytes.
const MAX_TOPIC_LEN: usize = 65_535;

/// One entry of a JSON plan file.
#[derive(Debug, Clone, Deserialize)]
struct PlanEntry {
    topic: String,
    payload: Value,
}

/// Messages published by a probe run, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishPlan {
    messages: Vec<Telemetry>,
}

impl PublishPlan {
    /// Wrap already encoded messages. Call [`PublishPlan::validate`] before use.
    pub fn new(messages: Vec<Telemetry>) -> Self {
        Self { messages }
    }

    /// Readings that trip the stock flux rules: `speed > 80` on
    /// `sensor/speed`, then `value > 30` on `sensor/temp`.
    pub fn flux_rules() -> Result<Self> {
        let messages = vec![
            Telemetry::from_reading(&SpeedReading { speed: 120 })
                .context("Failed to encode speed reading")?,
            Telemetry::from_reading(&TempReading { value: 35.0 })
                .context("Failed to encode temp reading")?,
        ];
        Ok(Self { messages })
    }

    /// Parse a plan from a JSON array of `{"topic": ..., "payload": ...}`.
    /// Object keys in payloads keep the order they were written in.
    pub fn from_json_str(raw: &str) -> Result<Self> {
        let entries: Vec<PlanEntry> =
            serde_json::from_str(raw).context("Failed to parse publish plan")?;

        let messages = entries
            .iter()
            .map(|entry| Telemetry::new(entry.topic.clone(), &entry.payload))
            .collect::<serde_json::Result<Vec<_>>>()
            .context("Failed to encode plan payload")?;

        let plan = Self { messages };
        plan.validate()?;
        Ok(plan)
    }

    /// Load a plan file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read publish plan {}", path.display()))?;
        Self::from_json_str(&raw).with_context(|| format!("Invalid publish plan {}", path.display()))
    }

    /// Check every topic is a publishable MQTT topic name.
    pub fn validate(&self) -> Result<()> {
        if self.messages.is_empty() {
            bail!("publish plan is empty");
        }
        for (idx, msg) in self.messages.iter().enumerate() {
            validate_topic(&msg.topic).with_context(|| format!("plan entry {idx}"))?;
        }
        Ok(())
    }

    /// Messages in publish order.
    pub fn messages(&self) -> &[Telemetry] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

/// Topic names may not be empty, carry wildcards or NUL, or exceed 64 KiB.
pub fn validate_topic(topic: &str) -> Result<()> {
    if topic.is_empty() {
        bail!("topic must not be empty");
    }
    if topic.len() > MAX_TOPIC_LEN {
        bail!("topic is {} bytes, limit is {MAX_TOPIC_LEN}", topic.len());
    }
    if topic.contains(['+', '#']) {
        bail!("topic '{topic}' contains a wildcard");
    }
    if topic.contains('\0') {
        bail!("topic contains a NUL character");
    }
    Ok(())
}
