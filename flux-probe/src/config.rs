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

//! Configuration for the telemetry probe.

use std::env;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use rumqttc::{MqttOptions, QoS};

pub const DEFAULT_BROKER_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 1883;
pub const DEFAULT_CLIENT_ID: &str = "flux_test_client";

/// Connection and timing settings for a probe run.
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    /// MQTT broker hostname or IP (default: `127.0.0.1`).
    pub broker_host: String,
    /// MQTT broker port (default: 1883).
    pub port: u16,
    /// MQTT client ID (default: `"flux_test_client"`).
    pub client_id: String,
    /// Optional MQTT username for authentication.
    pub username: Option<String>,
    /// Optional MQTT password for authentication.
    pub password: Option<String>,
    /// Keep-alive interval announced in CONNECT.
    pub keep_alive: Duration,
    /// How long to wait for the broker's CONNACK.
    pub connect_timeout: Duration,
    /// Upper bound on the wait for delivery after publishing, and on the
    /// disconnect handshake.
    pub linger: Duration,
    /// QoS used for every publish.
    pub qos: QoS,
    /// Capacity of the client's request channel.
    pub request_capacity: usize,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self::builder(DEFAULT_BROKER_HOST).build()
    }
}

impl ProbeConfig {
    /// Start building a config for the given broker host.
    pub fn builder(broker_host: impl Into<String>) -> ProbeConfigBuilder {
        ProbeConfigBuilder {
            broker_host: broker_host.into(),
            port: DEFAULT_PORT,
            client_id: DEFAULT_CLIENT_ID.to_string(),
            username: None,
            password: None,
            keep_alive: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(5),
            linger: Duration::from_secs(2),
            qos: QoS::AtMostOnce,
            request_capacity: 10,
        }
    }

    /// Load the config from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load the config through an arbitrary variable lookup. Unset variables
    /// keep their defaults; malformed ones are rejected.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let mut builder =
            Self::builder(get("MQTT_BROKER_URL").unwrap_or_else(|| DEFAULT_BROKER_HOST.into()));

        if let Some(port) = get("MQTT_PORT") {
            let port = port
                .trim()
                .parse::<u16>()
                .with_context(|| format!("Invalid MQTT_PORT: {port}"))?;
            builder = builder.port(port);
        }
        if let Some(client_id) = get("MQTT_CLIENT_ID") {
            builder = builder.client_id(client_id);
        }
        if let Some(username) = get("MQTT_USERNAME") {
            builder = builder.username(username);
        }
        if let Some(password) = get("MQTT_PASSWORD") {
            builder = builder.password(password);
        }
        if let Some(qos) = get("MQTT_QOS") {
            builder = builder.qos(parse_qos(&qos)?);
        }
        if let Some(secs) = get("MQTT_KEEP_ALIVE_SECS") {
            builder = builder.keep_alive(Duration::from_secs(parse_number(
                "MQTT_KEEP_ALIVE_SECS",
                &secs,
            )?));
        }
        if let Some(secs) = get("PROBE_CONNECT_TIMEOUT_SECS") {
            builder = builder.connect_timeout(Duration::from_secs(parse_number(
                "PROBE_CONNECT_TIMEOUT_SECS",
                &secs,
            )?));
        }
        if let Some(ms) = get("PROBE_LINGER_MS") {
            builder = builder.linger(Duration::from_millis(parse_number("PROBE_LINGER_MS", &ms)?));
        }

        builder.try_build()
    }

    /// Broker address as `host:port`, for logging.
    pub fn broker_addr(&self) -> String {
        format!("{}:{}", self.broker_host, self.port)
    }

    /// Convert into `rumqttc` connection options.
    pub fn mqtt_options(&self) -> MqttOptions {
        let mut mqtt_opts = MqttOptions::new(&self.client_id, &self.broker_host, self.port);
        mqtt_opts.set_keep_alive(self.keep_alive);
        mqtt_opts.set_clean_session(true);

        if let (Some(user), Some(pass)) = (&self.username, &self.password) {
            mqtt_opts.set_credentials(user, pass);
        }
        mqtt_opts
    }
}

/// Parse a numeric QoS level (`0`, `1` or `2`).
pub fn parse_qos(raw: &str) -> Result<QoS> {
    match raw.trim() {
        "0" => Ok(QoS::AtMostOnce),
        "1" => Ok(QoS::AtLeastOnce),
        "2" => Ok(QoS::ExactlyOnce),
        other => Err(anyhow!("Invalid MQTT_QOS: {other} (expected 0, 1 or 2)")),
    }
}

fn parse_number(key: &str, raw: &str) -> Result<u64> {
    raw.trim()
        .parse::<u64>()
        .with_context(|| format!("Invalid {key}: {raw}"))
}

/// Builder for [`ProbeConfig`].
pub struct ProbeConfigBuilder {
    broker_host: String,
    port: u16,
    client_id: String,
    username: Option<String>,
    password: Option<String>,
    keep_alive: Duration,
    connect_timeout: Duration,
    linger: Duration,
    qos: QoS,
    request_capacity: usize,
}

impl ProbeConfigBuilder {
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = client_id.into();
        self
    }

    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn keep_alive(mut self, keep_alive: Duration) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn linger(mut self, linger: Duration) -> Self {
        self.linger = linger;
        self
    }

    pub fn qos(mut self, qos: QoS) -> Self {
        self.qos = qos;
        self
    }

    pub fn request_capacity(mut self, capacity: usize) -> Self {
        self.request_capacity = capacity;
        self
    }

    /// Build the config. Fails when a value `rumqttc` would reject is set.
    pub fn try_build(self) -> Result<ProbeConfig> {
        if self.client_id.is_empty() || self.client_id.starts_with(' ') {
            bail!("client_id must not be empty or start with a space");
        }
        // rumqttc panics on keep-alive intervals below one second.
        if !self.keep_alive.is_zero() && self.keep_alive < Duration::from_secs(1) {
            bail!("keep_alive must be zero or at least one second");
        }
        if self.request_capacity == 0 {
            bail!("request_capacity must be at least 1");
        }
        Ok(self.build())
    }

    /// Build the config.
    pub fn build(self) -> ProbeConfig {
        ProbeConfig {
            broker_host: self.broker_host,
            port: self.port,
            client_id: self.client_id,
            username: self.username,
            password: self.password,
            keep_alive: self.keep_alive,
            connect_timeout: self.connect_timeout,
            linger: self.linger,
            qos: self.qos,
            request_capacity: self.request_capacity,
        }
    }
}
