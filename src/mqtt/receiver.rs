//! Background receive path
//!
//! Runs from CONNACK until the session drops it. Every inbound packet is decoded and
//! routed:
//!
//! ```text
//! SUBACK / PUBACK ──► CorrelationTable::resolve  (+ Suback / Puback milestone)
//! PINGRESP        ──► pong slot                  (+ Pong milestone)
//! PUBLISH         ──► MessageHandler + message slot (arrival instant attached)
//! ```
//!
//! The first failure is parked in the single-slot failure channel before all pending
//! requests are abandoned, so a woken waiter always finds the cause.

use rumqttc::{Packet, PubAck, QoS};
use std::sync::Arc;
use std::time::Instant;
use tokio::io::{AsyncRead, WriteHalf};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::codec::{packet_name, write_packet, PacketReader};
use super::correlation::CorrelationTable;
use super::error::ClientError;
use super::message::{InboundMessage, MessageHandler};
use super::transport::BoxedStream;
use crate::trace::{MilestoneKind, TraceRecorder};

pub type SharedWriter = Arc<Mutex<WriteHalf<BoxedStream>>>;

pub struct ReceivePath<R> {
    pub reader: PacketReader<R>,
    pub writer: SharedWriter,
    pub pending: Arc<CorrelationTable>,
    pub recorder: TraceRecorder,
    pub handler: MessageHandler,
    pub messages: mpsc::Sender<(InboundMessage, Instant)>,
    pub pongs: mpsc::Sender<()>,
    pub failures: mpsc::Sender<ClientError>,
}

impl<R> ReceivePath<R>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(mut self) {
        info!("Receive path started");
        loop {
            let outcome = match self.reader.next_packet().await {
                Ok(packet) => self.dispatch(packet).await,
                Err(e) => Err(e),
            };
            if let Err(e) = outcome {
                self.fail(e);
                return;
            }
        }
    }

    async fn dispatch(&mut self, packet: Packet) -> Result<(), ClientError> {
        let received = Instant::now();
        debug!("Received {}", packet_name(&packet));

        match packet {
            Packet::SubAck(ref ack) => {
                self.deliver(ack.pkid, MilestoneKind::Suback, received, packet.clone());
            }
            Packet::PubAck(ref ack) => {
                self.deliver(ack.pkid, MilestoneKind::Puback, received, packet.clone());
            }
            Packet::PingResp => {
                self.recorder.add_point(MilestoneKind::Pong, received);
                if self.pongs.try_send(()).is_err() {
                    debug!("Pong slot full, dropping unrequested PINGRESP");
                }
            }
            Packet::Publish(publish) => {
                match publish.qos {
                    QoS::AtMostOnce => {}
                    QoS::AtLeastOnce => {
                        let ack = PubAck::new(publish.pkid);
                        let mut writer = self.writer.lock().await;
                        write_packet(&mut *writer, "PUBACK", |buf| ack.write(buf)).await?;
                    }
                    QoS::ExactlyOnce => {
                        warn!("QoS 2 message on {} will not be acknowledged", publish.topic)
                    }
                }

                let message = InboundMessage::from_publish(&publish);
                self.handler.dispatch(&message);
                if self.messages.try_send((message, received)).is_err() {
                    debug!("Message slot full, keeping the first message");
                }
            }
            other => {
                debug!("Ignoring unexpected {}", packet_name(&other));
            }
        }
        Ok(())
    }

    fn deliver(&self, packet_id: u16, kind: MilestoneKind, received: Instant, packet: Packet) {
        if self.pending.is_pending(packet_id) {
            self.recorder.add_point(kind, received);
        }
        if !self.pending.resolve(packet_id, packet) {
            debug!("{} for packet id {} matched no request", kind, packet_id);
        }
    }

    fn fail(&self, e: ClientError) {
        match e {
            ClientError::ConnectionClosed => info!("Receive path stopped: {}", e),
            _ => error!("Receive path failed: {}", e),
        }
        if self.failures.try_send(e).is_err() {
            debug!("Failure slot already occupied");
        }
        self.pending.abandon_all();
    }
}
