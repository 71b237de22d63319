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

//! MQTT telemetry probe for the flux rule engine.
//!
//! Connects to a broker, publishes sensor readings that should trip the
//! configured rules, waits a bounded window for delivery, and disconnects.
//!
//! # Example
//!
//! ```ignore
//! use flux_probe::{Probe, ProbeConfig, PublishPlan};
//!
//! let config = ProbeConfig::builder("127.0.0.1")
//!     .port(1883)
//!     .client_id("flux_test_client")
//!     .build();
//!
//! let probe = Probe::new(config, PublishPlan::flux_rules()?)?;
//! let report = probe.run().await?;
//! ```

pub mod config;
pub mod plan;
pub mod probe;
pub mod publisher;
pub mod reading;
pub mod session;

pub use config::{ProbeConfig, ProbeConfigBuilder};
pub use plan::PublishPlan;
pub use probe::{Probe, ProbeReport};
pub use publisher::{DeliveryProgress, TelemetryPublisher};
pub use reading::{Reading, SpeedReading, Telemetry, TempReading};
pub use session::MqttSession;
