//! Measured exchanges run between handshake and disconnect

use base64::{engine::general_purpose::STANDARD, Engine as _};
use rumqttc::Packet;
use thiserror::Error;
use tracing::{debug, info};

use crate::cli::Scenario;
use crate::mqtt::{ClientError, Connected, InboundMessage, Session};

#[derive(Debug, Error)]
pub enum ScenarioError {
    #[error(transparent)]
    Client(#[from] ClientError),
    #[error("Invalid base64 payload: {0}")]
    Payload(#[from] base64::DecodeError),
}

/// Lines printed under the report when a scenario runs verbose
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub notes: Vec<String>,
}

impl Outcome {
    fn note(&mut self, verbose: bool, line: String) {
        debug!("{}", line);
        if verbose {
            self.notes.push(line);
        }
    }
}

/// Runs `scenario` on a connected session. `None` is connect-only.
pub async fn run(
    session: &mut Session<Connected>,
    scenario: Option<&Scenario>,
) -> Result<Outcome, ScenarioError> {
    let mut outcome = Outcome::default();
    let Some(scenario) = scenario else {
        return Ok(outcome);
    };
    let verbose = scenario.verbose();

    match scenario {
        Scenario::Publish {
            topic,
            message,
            qos,
            ..
        } => {
            let delivery = session
                .publish(topic, message.as_bytes().to_vec(), *qos)
                .await?;
            if delivery.needs_ack() {
                debug!("Waiting for PUBACK of packet id {:?}", delivery.packet_id());
            }
            match session.wait_delivery(delivery).await? {
                Some(ack) => outcome.note(verbose, format!("Puback: packet id {}", ack.packet_id)),
                None => outcome.note(verbose, format!("Published to {} at qos 0", topic)),
            }
        }
        Scenario::Subscribe {
            topic,
            qos,
            publish,
            wait,
            ..
        } => {
            // decoded up front so a bad payload fails before any milestone is spent
            let payload = publish
                .as_deref()
                .map(|encoded| STANDARD.decode(encoded))
                .transpose()?;

            if *wait {
                session.set_message_handler(Box::new(|message: &InboundMessage| {
                    info!("Handler received {}", message);
                }));
            }

            let ack = session.subscribe(topic, qos).await?;
            if let Packet::SubAck(suback) = &ack.packet {
                outcome.note(
                    verbose,
                    format!(
                        "Suback: packet id {}, return codes {:?}",
                        ack.packet_id, suback.return_codes
                    ),
                );
            }

            if let (Some(payload), Some(first)) = (payload, topic.first()) {
                let delivery = session.publish(first, payload, 1).await?;
                if let Some(ack) = session.wait_delivery(delivery).await? {
                    outcome.note(verbose, format!("Puback: packet id {}", ack.packet_id));
                }
            }

            if *wait {
                let message = session.await_message().await?;
                session.clear_message_handler();
                outcome.note(verbose, format!("Message: {}", message));
            }
        }
        Scenario::Ping { .. } => {
            session.ping().await?;
            outcome.note(verbose, "Pong received".to_string());
        }
    }
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mqtt::codec::PacketReader;
    use crate::mqtt::ClientConfig;
    use crate::trace::{MilestoneKind, TraceRecorder};
    use bytes::BytesMut;
    use rumqttc::{PingResp, PubAck, Publish, QoS, SubAck, SubscribeReasonCode};
    use std::sync::Arc;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;
    use tokio_util::sync::CancellationToken;

    /// Answers every request the scenarios make and echoes the first publish back
    async fn echo_broker() -> (String, tokio::task::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let handle = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (read, mut write) = stream.into_split();
            let mut reader = PacketReader::new(read, 1024 * 1024);
            loop {
                let mut out = BytesMut::new();
                match reader.next_packet().await {
                    Ok(Packet::Connect(_)) => {
                        write.write_all(&[0x20, 0x02, 0x00, 0x00]).await.unwrap();
                    }
                    Ok(Packet::Subscribe(subscribe)) => {
                        let codes = subscribe
                            .filters
                            .iter()
                            .map(|f| SubscribeReasonCode::Success(f.qos))
                            .collect();
                        SubAck::new(subscribe.pkid, codes).write(&mut out).unwrap();
                    }
                    Ok(Packet::Publish(publish)) => {
                        if publish.qos == QoS::AtLeastOnce {
                            PubAck::new(publish.pkid).write(&mut out).unwrap();
                        }
                        let mut echo = Publish::new(
                            publish.topic.clone(),
                            QoS::AtLeastOnce,
                            publish.payload.to_vec(),
                        );
                        echo.pkid = 77;
                        echo.write(&mut out).unwrap();
                    }
                    Ok(Packet::PingReq) => {
                        PingResp.write(&mut out).unwrap();
                    }
                    Ok(_) => {}
                    Err(_) => break,
                }
                if !out.is_empty() {
                    write.write_all(&out).await.unwrap();
                }
            }
        });
        (addr, handle)
    }

    async fn connected(addr: &str, recorder: TraceRecorder) -> Session<Connected> {
        Session::create(
            Arc::new(ClientConfig::default()),
            recorder,
            CancellationToken::new(),
        )
        .dial(addr)
        .await
        .unwrap()
    }

    fn kinds(recorder: &TraceRecorder) -> Vec<MilestoneKind> {
        recorder.points().iter().map(|p| p.kind).collect()
    }

    #[tokio::test]
    async fn subscribe_publish_and_wait() {
        let (addr, _broker) = echo_broker().await;
        let recorder = TraceRecorder::new();
        let mut session = connected(&addr, recorder.clone()).await;

        let scenario = Scenario::Subscribe {
            topic: vec!["bench/a".to_string(), "bench/b".to_string()],
            qos: vec![1, 0],
            publish: Some(STANDARD.encode("hello")),
            wait: true,
            verbose: true,
        };
        let outcome = run(&mut session, Some(&scenario)).await.unwrap();
        session.disconnect().await;

        assert_eq!(
            kinds(&recorder),
            vec![
                MilestoneKind::TcpDial,
                MilestoneKind::Connect,
                MilestoneKind::Connack,
                MilestoneKind::Subscribe,
                MilestoneKind::Suback,
                MilestoneKind::Publish,
                MilestoneKind::Puback,
                MilestoneKind::Message,
            ]
        );
        assert_eq!(outcome.notes.len(), 3);
        assert!(outcome.notes[2].contains("bench/a"));
    }

    #[tokio::test]
    async fn ping_records_round_trip() {
        let (addr, _broker) = echo_broker().await;
        let recorder = TraceRecorder::new();
        let mut session = connected(&addr, recorder.clone()).await;

        let outcome = run(&mut session, Some(&Scenario::Ping { verbose: false }))
            .await
            .unwrap();
        assert!(outcome.notes.is_empty());
        assert!(recorder.get(MilestoneKind::Ping).is_some());
        assert!(recorder.get(MilestoneKind::Pong).is_some());
    }

    #[tokio::test]
    async fn bad_payload_fails_before_subscribing() {
        let (addr, _broker) = echo_broker().await;
        let recorder = TraceRecorder::new();
        let mut session = connected(&addr, recorder.clone()).await;

        let scenario = Scenario::Subscribe {
            topic: vec!["bench/a".to_string()],
            qos: vec![0],
            publish: Some("not base64!".to_string()),
            wait: false,
            verbose: false,
        };
        let err = run(&mut session, Some(&scenario)).await.unwrap_err();
        assert!(matches!(err, ScenarioError::Payload(_)));
        assert!(recorder.get(MilestoneKind::Subscribe).is_none());
    }

    #[tokio::test]
    async fn connect_only_runs_nothing() {
        let (addr, _broker) = echo_broker().await;
        let recorder = TraceRecorder::new();
        let mut session = connected(&addr, recorder.clone()).await;

        let outcome = run(&mut session, None).await.unwrap();
        assert_eq!(outcome, Outcome::default());
        assert_eq!(recorder.points().len(), 3);
    }
}
