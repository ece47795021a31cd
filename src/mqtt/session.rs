//! Connection state machine for one measured attempt
//!
//! Each state is a statum marker, so only the operations valid in a state exist on it.
//! Every transition records its milestone into the attempt's [`TraceRecorder`] right
//! before the I/O it measures. Any failure is terminal: the session is consumed (or
//! left connected but unusable) and the caller abandons the attempt.
//!
//! ```text
//! Idle ──resolve──► Resolved ──open_transport──► Transported ──handshake──► Connected ──disconnect──► Disconnected
//!   │                                                                        │
//!   └──────────────────────────── dial ──────────────────────────────────────┘
//!                                                         subscribe / publish / ping / await_message
//! ```
//!
//! From `Connected` on, a [`ReceivePath`] task decodes inbound traffic. Reply waits race
//! the session's cancellation token; there are no timeouts.

use rumqttc::tokio_rustls::TlsConnector;
use rumqttc::{
    Connect, ConnectReturnCode, Disconnect, Packet, PingReq, Publish, QoS, Subscribe,
    SubscribeFilter, SubscribeReasonCode,
};
use statum::{machine, state};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::codec::{packet_name, qos_from_level, write_packet, PacketReader};
use super::config::ClientConfig;
use super::correlation::{AckResult, CorrelationTable, PacketIds};
use super::error::ClientError;
use super::message::{InboundMessage, MessageCallback, MessageHandler};
use super::receiver::{ReceivePath, SharedWriter};
use super::transport::{self, BoxedStream, Target};
use crate::trace::{Milestone, MilestoneKind, TraceRecorder};

#[state]
#[derive(Debug, Clone)]
pub enum SessionState {
    Idle,         // Nothing opened yet
    Resolved,     // Broker address known
    Transported,  // TCP (and TLS) established
    Connected,    // CONNACK accepted, receive path running
    Disconnected, // DISCONNECT sent, transport released
}

#[machine]
pub struct Session<S: SessionState> {
    config: Arc<ClientConfig>,
    recorder: TraceRecorder,
    pending: Arc<CorrelationTable>,
    handler: MessageHandler,
    cancel: CancellationToken,
    tls: Option<TlsConnector>,
    target: Option<Target>,
    remote: Option<SocketAddr>,
    local: Option<SocketAddr>,
    stream: Option<BoxedStream>,
    link: Option<Link>,
}

/// Live half of a connected session
struct Link {
    writer: SharedWriter,
    packet_ids: PacketIds,
    messages: mpsc::Receiver<(InboundMessage, Instant)>,
    pongs: mpsc::Receiver<()>,
    failures: mpsc::Receiver<ClientError>,
    receiver: JoinHandle<()>,
}

impl Drop for Link {
    fn drop(&mut self) {
        self.receiver.abort();
    }
}

/// Handoff returned by [`Session::publish`]. QoS 0 publishes carry no reply.
#[derive(Debug)]
pub struct Delivery {
    packet_id: Option<u16>,
    reply: Option<oneshot::Receiver<AckResult>>,
}

impl Delivery {
    pub fn packet_id(&self) -> Option<u16> {
        self.packet_id
    }

    pub fn needs_ack(&self) -> bool {
        self.reply.is_some()
    }
}

impl<S: SessionState> Session<S> {
    pub fn trace_points(&self) -> Vec<Milestone> {
        self.recorder.points()
    }

    pub fn recorder(&self) -> &TraceRecorder {
        &self.recorder
    }

    pub fn target(&self) -> Option<&Target> {
        self.target.as_ref()
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local
    }

    /// Installs the callback invoked for every inbound application message
    pub fn set_message_handler(&self, callback: MessageCallback) {
        self.handler.set(callback);
    }

    pub fn clear_message_handler(&self) {
        self.handler.clear();
    }

    pub fn pending_requests(&self) -> usize {
        self.pending.len()
    }

    async fn guarded<F: Future>(&self, future: F) -> Result<F::Output, ClientError> {
        cancellable(&self.cancel, future).await
    }
}

impl Session<Idle> {
    pub fn create(
        config: Arc<ClientConfig>,
        recorder: TraceRecorder,
        cancel: CancellationToken,
    ) -> Self {
        debug!("Creating session for client id {}", config.client_id);
        Self::new(
            config,
            recorder,
            Arc::new(CorrelationTable::new()),
            MessageHandler::default(),
            cancel,
            None, // tls
            None, // target
            None, // remote
            None, // local
            None, // stream
            None, // link
        )
    }

    /// Shares a connector (and its resumption cache) across attempts
    pub fn with_tls_connector(mut self, connector: TlsConnector) -> Self {
        self.tls = Some(connector);
        self
    }

    /// Resolve, connect the transport and complete the MQTT handshake
    pub async fn dial(self, target: &str) -> Result<Session<Connected>, ClientError> {
        self.resolve(target)
            .await?
            .open_transport()
            .await?
            .handshake()
            .await
    }

    pub async fn resolve(mut self, target: &str) -> Result<Session<Resolved>, ClientError> {
        let target: Target = target.parse()?;

        let addr = match target.literal_ip() {
            Some(ip) => SocketAddr::new(ip, target.port),
            None => {
                self.recorder.mark(MilestoneKind::DnsLookup);
                self.guarded(transport::resolve(&target)).await??
            }
        };

        info!("Resolved {} to {}", target, addr);
        self.target = Some(target);
        self.remote = Some(addr);
        Ok(self.transition())
    }
}

impl Session<Resolved> {
    pub async fn open_transport(mut self) -> Result<Session<Transported>, ClientError> {
        let (addr, target) = match (self.remote, self.target.clone()) {
            (Some(addr), Some(target)) => (addr, target),
            _ => {
                return Err(ClientError::InvalidRequest(
                    "session has no resolved address".to_string(),
                ))
            }
        };

        self.recorder.mark(MilestoneKind::TcpDial);
        let tcp = self
            .guarded(transport::connect_tcp(addr, &self.config.tcp))
            .await??;
        self.local = tcp.local_addr().ok();

        let stream: BoxedStream = if target.is_secure() {
            let connector = match self.tls.clone() {
                Some(connector) => connector,
                None => transport::tls_connector(&self.config.tls)?,
            };
            self.recorder.mark(MilestoneKind::TlsDial);
            self.guarded(transport::upgrade(&connector, &target.host, tcp))
                .await??
        } else {
            Box::new(tcp)
        };

        self.stream = Some(stream);
        Ok(self.transition())
    }
}

impl Session<Transported> {
    /// Sends CONNECT, waits for CONNACK and starts the receive path
    pub async fn handshake(mut self) -> Result<Session<Connected>, ClientError> {
        let stream = self
            .stream
            .take()
            .ok_or_else(|| ClientError::InvalidRequest("session has no transport".to_string()))?;
        let (read_half, mut write_half) = tokio::io::split(stream);

        let mut connect = Connect::new(self.config.client_id.clone());
        connect.keep_alive = self.config.keep_alive_secs;
        connect.clean_session = self.config.clean_session;
        if !self.config.username.is_empty() {
            connect.set_login(self.config.username.clone(), self.config.password.clone());
        }

        self.recorder.mark(MilestoneKind::Connect);
        self.guarded(write_packet(&mut write_half, "CONNECT", |buf| {
            connect.write(buf)
        }))
        .await??;

        let mut reader = PacketReader::new(read_half, self.config.max_packet_size);
        match self.guarded(reader.next_packet()).await?? {
            Packet::ConnAck(ack) if ack.code == ConnectReturnCode::Success => {}
            Packet::ConnAck(ack) => {
                warn!("Broker refused connection: {:?}", ack.code);
                return Err(ClientError::ProtocolRejected { code: ack.code });
            }
            other => {
                return Err(ClientError::DecodeError(format!(
                    "expected CONNACK, received {}",
                    packet_name(&other)
                )))
            }
        }
        self.recorder.mark(MilestoneKind::Connack);
        info!("MQTT session established as {}", self.config.client_id);

        let writer: SharedWriter = Arc::new(tokio::sync::Mutex::new(write_half));
        let (message_tx, message_rx) = mpsc::channel(1);
        let (pong_tx, pong_rx) = mpsc::channel(1);
        let (failure_tx, failure_rx) = mpsc::channel(1);

        let receiver = ReceivePath {
            reader,
            writer: writer.clone(),
            pending: self.pending.clone(),
            recorder: self.recorder.clone(),
            handler: self.handler.clone(),
            messages: message_tx,
            pongs: pong_tx,
            failures: failure_tx,
        }
        .spawn();

        self.link = Some(Link {
            writer,
            packet_ids: PacketIds::new(),
            messages: message_rx,
            pongs: pong_rx,
            failures: failure_rx,
            receiver,
        });
        Ok(self.transition())
    }
}

impl Session<Connected> {
    /// Subscribes to `topics` with the matching QoS levels and waits for the SUBACK.
    /// Topics refused by the broker are reported together; accepted ones stay active.
    pub async fn subscribe(
        &mut self,
        topics: &[String],
        levels: &[u8],
    ) -> Result<AckResult, ClientError> {
        if topics.is_empty() || topics.len() != levels.len() {
            return Err(ClientError::InvalidRequest(format!(
                "{} topic(s) but {} QoS level(s)",
                topics.len(),
                levels.len()
            )));
        }
        let filters = topics
            .iter()
            .zip(levels)
            .map(|(topic, level)| Ok(SubscribeFilter::new(topic.clone(), qos_from_level(*level)?)))
            .collect::<Result<Vec<_>, ClientError>>()?;

        let link = self.link.as_mut().ok_or(ClientError::ConnectionClosed)?;
        surface_failure(link)?;

        let packet_id = link.packet_ids.next_id();
        let reply = self.pending.register(packet_id)?;
        let subscribe = Subscribe {
            pkid: packet_id,
            filters,
        };

        self.recorder.mark(MilestoneKind::Subscribe);
        info!("Subscribing to {:?} (packet id {})", topics, packet_id);
        let written = cancellable(&self.cancel, async {
            let mut writer = link.writer.lock().await;
            write_packet(&mut *writer, "SUBSCRIBE", |buf| subscribe.write(buf)).await
        })
        .await
        .and_then(|r| r);
        if let Err(e) = written {
            self.pending.evict(packet_id);
            return Err(e);
        }

        let ack = await_reply(&self.cancel, &self.pending, link, packet_id, reply).await?;
        let refused: Vec<String> = match &ack.packet {
            Packet::SubAck(suback) => topics
                .iter()
                .zip(&suback.return_codes)
                .filter(|(_, code)| matches!(code, SubscribeReasonCode::Failure))
                .map(|(topic, _)| topic.clone())
                .collect(),
            other => {
                return Err(ClientError::DecodeError(format!(
                    "expected SUBACK, received {}",
                    packet_name(other)
                )))
            }
        };
        if !refused.is_empty() {
            warn!("Broker refused subscription to {:?}", refused);
            return Err(ClientError::SubscriptionRefused { topics: refused });
        }
        Ok(ack)
    }

    /// Writes a PUBLISH. For QoS 1 the returned [`Delivery`] must be passed to
    /// [`Session::wait_delivery`] to observe the PUBACK.
    pub async fn publish(
        &mut self,
        topic: &str,
        payload: Vec<u8>,
        level: u8,
    ) -> Result<Delivery, ClientError> {
        let qos = qos_from_level(level)?;
        let link = self.link.as_mut().ok_or(ClientError::ConnectionClosed)?;
        surface_failure(link)?;

        let mut publish = Publish::new(topic, qos, payload);
        let delivery = if qos == QoS::AtMostOnce {
            Delivery {
                packet_id: None,
                reply: None,
            }
        } else {
            let packet_id = link.packet_ids.next_id();
            publish.pkid = packet_id;
            Delivery {
                packet_id: Some(packet_id),
                reply: Some(self.pending.register(packet_id)?),
            }
        };

        self.recorder.mark(MilestoneKind::Publish);
        info!("Publishing {} byte(s) to {}", publish.payload.len(), topic);
        let written = cancellable(&self.cancel, async {
            let mut writer = link.writer.lock().await;
            write_packet(&mut *writer, "PUBLISH", |buf| publish.write(buf)).await
        })
        .await
        .and_then(|r| r);
        if let Err(e) = written {
            if let Some(packet_id) = delivery.packet_id {
                self.pending.evict(packet_id);
            }
            return Err(e);
        }
        Ok(delivery)
    }

    /// Blocks on the PUBACK for `delivery`; `None` for QoS 0
    pub async fn wait_delivery(
        &mut self,
        delivery: Delivery,
    ) -> Result<Option<AckResult>, ClientError> {
        let (packet_id, reply) = match (delivery.packet_id, delivery.reply) {
            (Some(packet_id), Some(reply)) => (packet_id, reply),
            _ => return Ok(None),
        };
        let link = self.link.as_mut().ok_or(ClientError::ConnectionClosed)?;
        await_reply(&self.cancel, &self.pending, link, packet_id, reply)
            .await
            .map(Some)
    }

    pub async fn ping(&mut self) -> Result<(), ClientError> {
        let link = self.link.as_mut().ok_or(ClientError::ConnectionClosed)?;
        surface_failure(link)?;

        self.recorder.mark(MilestoneKind::Ping);
        cancellable(&self.cancel, async {
            let mut writer = link.writer.lock().await;
            write_packet(&mut *writer, "PINGREQ", |buf| PingReq.write(buf)).await
        })
        .await??;

        match cancellable(&self.cancel, link.pongs.recv()).await? {
            Some(()) => Ok(()),
            None => Err(receive_failure(link)),
        }
    }

    /// Waits for the first application message pushed by the broker
    pub async fn await_message(&mut self) -> Result<InboundMessage, ClientError> {
        let link = self.link.as_mut().ok_or(ClientError::ConnectionClosed)?;
        surface_failure(link)?;

        match cancellable(&self.cancel, link.messages.recv()).await? {
            Some((message, arrived)) => {
                self.recorder.add_point(MilestoneKind::Message, arrived);
                info!("Received message: {}", message);
                Ok(message)
            }
            None => Err(receive_failure(link)),
        }
    }

    /// Best effort DISCONNECT, then releases the transport
    pub async fn disconnect(mut self) -> Session<Disconnected> {
        if let Some(link) = self.link.take() {
            let mut writer = link.writer.lock().await;
            if let Err(e) = write_packet(&mut *writer, "DISCONNECT", |buf| Disconnect.write(buf)).await
            {
                debug!("Ignoring disconnect failure: {}", e);
            }
            if let Err(e) = writer.shutdown().await {
                debug!("Ignoring shutdown failure: {}", e);
            }
            drop(writer);
        }
        self.pending.abandon_all();
        info!("Disconnected");
        self.transition()
    }
}

impl Session<Disconnected> {}

async fn cancellable<F: Future>(
    cancel: &CancellationToken,
    future: F,
) -> Result<F::Output, ClientError> {
    tokio::select! {
        _ = cancel.cancelled() => Err(ClientError::Cancelled),
        output = future => Ok(output),
    }
}

/// Waits for the reply to `packet_id`. A stopped receive path ends the wait even when
/// its failure was already surfaced, and the entry is evicted on every error.
async fn await_reply(
    cancel: &CancellationToken,
    pending: &CorrelationTable,
    link: &mut Link,
    packet_id: u16,
    reply: oneshot::Receiver<AckResult>,
) -> Result<AckResult, ClientError> {
    let waited = cancellable(cancel, async {
        tokio::select! {
            biased;
            ack = reply => ack.map_err(|_| None),
            failure = link.failures.recv() => {
                Err(Some(failure.unwrap_or(ClientError::ConnectionClosed)))
            }
        }
    })
    .await;

    match waited {
        Ok(Ok(ack)) => Ok(ack),
        Ok(Err(failure)) => {
            pending.evict(packet_id);
            Err(failure.unwrap_or_else(|| receive_failure(link)))
        }
        Err(e) => {
            pending.evict(packet_id);
            Err(e)
        }
    }
}

/// Error parked by the receive path. Once the path has exited and its error was
/// taken, the connection reports closed.
fn surface_failure(link: &mut Link) -> Result<(), ClientError> {
    match link.failures.try_recv() {
        Ok(e) => Err(e),
        Err(mpsc::error::TryRecvError::Disconnected) => Err(ClientError::ConnectionClosed),
        Err(mpsc::error::TryRecvError::Empty) => Ok(()),
    }
}

fn receive_failure(link: &mut Link) -> ClientError {
    link.failures
        .try_recv()
        .unwrap_or(ClientError::ConnectionClosed)
}
