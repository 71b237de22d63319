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

//! Drives `MqttSession` against a minimal in-process broker speaking just
//! enough MQTT 3.1.1: CONNACK, PUBACK, PINGRESP.

use std::time::Duration;

use flux_probe::{MqttSession, Probe, ProbeConfig, PublishPlan, TelemetryPublisher};
use rumqttc::QoS;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio::time::timeout;

#[derive(Debug, Default)]
struct Received {
    client_id: String,
    publishes: Vec<(String, Vec<u8>, u8)>,
    disconnected: bool,
}

struct Packet {
    header: u8,
    body: Vec<u8>,
}

async fn read_packet(stream: &mut TcpStream) -> std::io::Result<Option<Packet>> {
    let mut first = [0u8; 1];
    if stream.read(&mut first).await? == 0 {
        return Ok(None);
    }

    let mut len = 0usize;
    let mut shift = 0;
    loop {
        let byte = stream.read_u8().await?;
        len |= ((byte & 0x7f) as usize) << shift;
        if byte & 0x80 == 0 {
            break;
        }
        shift += 7;
    }

    let mut body = vec![0u8; len];
    stream.read_exact(&mut body).await?;
    Ok(Some(Packet {
        header: first[0],
        body,
    }))
}

/// Accept one client and answer with the given CONNACK return code.
async fn serve_one(listener: TcpListener, connack_code: u8) -> Received {
    serve_until(listener, connack_code, None).await
}

/// Like [`serve_one`], but when `close_after` is set the broker sends no
/// PUBACKs and drops the socket once that many PUBLISH packets arrived.
async fn serve_until(listener: TcpListener, connack_code: u8, close_after: Option<usize>) -> Received {
    let (mut stream, _) = listener.accept().await.unwrap();
    let mut received = Received::default();

    while let Ok(Some(packet)) = read_packet(&mut stream).await {
        let body = &packet.body;
        match packet.header >> 4 {
            // CONNECT: protocol name (6) + level (1) + flags (1) + keep alive (2)
            1 => {
                let id_len = u16::from_be_bytes([body[10], body[11]]) as usize;
                received.client_id = String::from_utf8(body[12..12 + id_len].to_vec()).unwrap();
                stream
                    .write_all(&[0x20, 0x02, 0x00, connack_code])
                    .await
                    .unwrap();
                if connack_code != 0 {
                    break;
                }
            }
            3 => {
                let qos = (packet.header >> 1) & 0x03;
                let topic_len = u16::from_be_bytes([body[0], body[1]]) as usize;
                let topic = String::from_utf8(body[2..2 + topic_len].to_vec()).unwrap();
                let mut offset = 2 + topic_len;
                if qos > 0 {
                    let pkid = [body[offset], body[offset + 1]];
                    offset += 2;
                    if qos == 1 && close_after.is_none() {
                        stream
                            .write_all(&[0x40, 0x02, pkid[0], pkid[1]])
                            .await
                            .unwrap();
                    }
                }
                received.publishes.push((topic, body[offset..].to_vec(), qos));
                if close_after == Some(received.publishes.len()) {
                    break;
                }
            }
            12 => stream.write_all(&[0xd0, 0x00]).await.unwrap(),
            14 => {
                received.disconnected = true;
                break;
            }
            _ => {}
        }
    }
    received
}

async fn start_broker(connack_code: u8) -> (u16, JoinHandle<Received>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    (port, tokio::spawn(serve_one(listener, connack_code)))
}

fn config(port: u16) -> ProbeConfig {
    ProbeConfig::builder("127.0.0.1")
        .port(port)
        .connect_timeout(Duration::from_secs(2))
        .build()
}

#[tokio::test]
async fn test_flux_readings_reach_broker_in_order() {
    let (port, broker) = start_broker(0).await;

    let probe = Probe::new(config(port), PublishPlan::flux_rules().unwrap()).unwrap();
    let report = probe.run().await.unwrap();
    let received = timeout(Duration::from_secs(5), broker).await.unwrap().unwrap();

    assert_eq!(received.client_id, "flux_test_client");
    assert_eq!(
        received.publishes,
        vec![
            ("sensor/speed".to_string(), br#"{"speed": 120}"#.to_vec(), 0),
            ("sensor/temp".to_string(), br#"{"value": 35.0}"#.to_vec(), 0),
        ]
    );
    assert!(received.disconnected);
    assert!(report.settled);
    assert_eq!(report.progress.sent, 2);
}

#[tokio::test]
async fn test_qos1_settles_on_puback() {
    let (port, broker) = start_broker(0).await;

    let config = ProbeConfig::builder("127.0.0.1")
        .port(port)
        .qos(QoS::AtLeastOnce)
        .build();
    let probe = Probe::new(config, PublishPlan::flux_rules().unwrap()).unwrap();
    let report = probe.run().await.unwrap();
    let received = timeout(Duration::from_secs(5), broker).await.unwrap().unwrap();

    assert!(report.settled);
    assert_eq!(report.progress.acknowledged, 2);
    assert!(received.publishes.iter().all(|(_, _, qos)| *qos == 1));
    assert!(received.disconnected);
}

#[tokio::test]
async fn test_dropped_connection_keeps_delivery_counters() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let broker = tokio::spawn(serve_until(listener, 0, Some(2)));

    let config = ProbeConfig::builder("127.0.0.1")
        .port(port)
        .qos(QoS::AtLeastOnce)
        .build();
    let probe = Probe::new(config, PublishPlan::flux_rules().unwrap()).unwrap();
    let report = probe.run().await.unwrap();
    let received = timeout(Duration::from_secs(5), broker).await.unwrap().unwrap();

    assert_eq!(received.publishes.len(), 2);
    assert!(!received.disconnected);
    assert_eq!(report.published, ["sensor/speed", "sensor/temp"]);
    assert_eq!(report.progress.sent, 2);
    assert_eq!(report.progress.acknowledged, 0);
    assert!(!report.settled);
}

#[tokio::test]
async fn test_unreachable_broker_fails_to_connect() {
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };

    let probe = Probe::new(config(port), PublishPlan::flux_rules().unwrap()).unwrap();
    let err = probe.run().await.unwrap_err();
    assert!(err
        .to_string()
        .contains(&format!("Connection to 127.0.0.1:{port} failed")));
}

#[tokio::test]
async fn test_refused_connack_fails_to_connect() {
    let (port, broker) = start_broker(5).await;

    let result = MqttSession::connect(&config(port)).await;
    assert!(result.is_err());

    let received = timeout(Duration::from_secs(5), broker).await.unwrap().unwrap();
    assert!(received.publishes.is_empty());
}

#[tokio::test]
async fn test_silent_broker_times_out() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let holder = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;
        drop(stream);
    });

    let config = ProbeConfig::builder("127.0.0.1")
        .port(port)
        .connect_timeout(Duration::from_millis(300))
        .build();
    let err = MqttSession::connect(&config).await.err().unwrap();
    assert!(err.to_string().contains("no CONNACK"));
    holder.abort();
}

#[tokio::test]
async fn test_disconnect_twice_is_noop() {
    let (port, broker) = start_broker(0).await;

    let session = MqttSession::connect(&config(port)).await.unwrap();
    assert_eq!(session.client_id(), "flux_test_client");
    session.disconnect().await.unwrap();
    session.disconnect().await.unwrap();

    let received = timeout(Duration::from_secs(5), broker).await.unwrap().unwrap();
    assert!(received.disconnected);
    assert!(received.publishes.is_empty());
}
