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

//! Sensor readings and their JSON payload encoding.

use std::io;

use serde::{Deserialize, Serialize};
use serde_json::ser::Formatter;

/// A reading that knows which topic the rule engine expects it on.
pub trait Reading: Serialize {
    /// Topic the reading is published to by default.
    const TOPIC: &'static str;
}

/// Vehicle speed sample, matched by rules such as `speed > 80`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpeedReading {
    pub speed: i64,
}

impl Reading for SpeedReading {
    const TOPIC: &'static str = "sensor/speed";
}

/// Temperature sample, matched by rules such as `value > 30`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TempReading {
    pub value: f64,
}

impl Reading for TempReading {
    const TOPIC: &'static str = "sensor/temp";
}

/// A single outgoing publish: topic plus encoded payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Telemetry {
    pub topic: String,
    pub payload: Vec<u8>,
}

impl Telemetry {
    /// Encode `body` for `topic`.
    pub fn new<T: Serialize + ?Sized>(
        topic: impl Into<String>,
        body: &T,
    ) -> serde_json::Result<Self> {
        Ok(Self {
            topic: topic.into(),
            payload: encode_payload(body)?,
        })
    }

    /// Encode a reading for its default topic.
    pub fn from_reading<R: Reading>(reading: &R) -> serde_json::Result<Self> {
        Self::new(R::TOPIC, reading)
    }

    /// Payload as text, for logging.
    pub fn payload_str(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }
}

/// Serialize `body` as single-line JSON with `": "` and `", "` separators,
/// e.g. `{"speed": 120}`.
pub fn encode_payload<T: Serialize + ?Sized>(body: &T) -> serde_json::Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(64);
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, SpacedFormatter);
    body.serialize(&mut ser)?;
    Ok(buf)
}

struct SpacedFormatter;

impl Formatter for SpacedFormatter {
    fn begin_array_value<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_key<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_value<W>(&mut self, writer: &mut W) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        writer.write_all(b": ")
    }
}
