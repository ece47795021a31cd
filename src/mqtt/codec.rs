//! Adapter over rumqttc's MQTT 3.1.1 packet codec
//!
//! Outbound packets are encoded into a scratch buffer and written in one call.
//! Inbound packets are decoded incrementally from a read half.

use bytes::BytesMut;
use rumqttc::mqttbytes::{self, v4};
use rumqttc::{Packet, QoS};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, trace};

use super::error::ClientError;

const READ_CHUNK: usize = 4096;

/// Decodes packets from a byte stream, buffering partial frames
pub struct PacketReader<R> {
    reader: R,
    buffer: BytesMut,
    max_packet_size: usize,
}

impl<R: AsyncRead + Unpin> PacketReader<R> {
    pub fn new(reader: R, max_packet_size: usize) -> Self {
        Self {
            reader,
            buffer: BytesMut::with_capacity(READ_CHUNK),
            max_packet_size,
        }
    }

    /// Reads until one complete packet is available
    pub async fn next_packet(&mut self) -> Result<Packet, ClientError> {
        loop {
            match v4::read(&mut self.buffer, self.max_packet_size) {
                Ok(packet) => {
                    trace!("Decoded packet: {:?}", packet);
                    return Ok(packet);
                }
                Err(mqttbytes::Error::InsufficientBytes(_)) => {}
                Err(e) => return Err(ClientError::DecodeError(e.to_string())),
            }

            self.buffer.reserve(READ_CHUNK);
            let read = self
                .reader
                .read_buf(&mut self.buffer)
                .await
                .map_err(|e| ClientError::DecodeError(e.to_string()))?;
            if read == 0 {
                debug!(
                    "Stream closed with {} undecoded bytes",
                    self.buffer.len()
                );
                return Err(ClientError::ConnectionClosed);
            }
        }
    }
}

/// Encodes with `encode` and writes the frame
pub async fn write_packet<W, F>(
    writer: &mut W,
    name: &'static str,
    encode: F,
) -> Result<(), ClientError>
where
    W: AsyncWrite + Unpin,
    F: FnOnce(&mut BytesMut) -> Result<usize, mqttbytes::Error>,
{
    let mut buffer = BytesMut::new();
    encode(&mut buffer).map_err(|e| ClientError::write(name, e))?;
    writer
        .write_all(&buffer)
        .await
        .map_err(|e| ClientError::write(name, e))?;
    writer.flush().await.map_err(|e| ClientError::write(name, e))?;
    trace!("Wrote {} ({} bytes)", name, buffer.len());
    Ok(())
}

/// Maps a numeric QoS. Level 2 is outside what this client implements.
pub fn qos_from_level(level: u8) -> Result<QoS, ClientError> {
    match level {
        0 => Ok(QoS::AtMostOnce),
        1 => Ok(QoS::AtLeastOnce),
        other => Err(ClientError::UnsupportedQos(other)),
    }
}

pub fn packet_name(packet: &Packet) -> &'static str {
    match packet {
        Packet::Connect(_) => "CONNECT",
        Packet::ConnAck(_) => "CONNACK",
        Packet::Publish(_) => "PUBLISH",
        Packet::PubAck(_) => "PUBACK",
        Packet::PubRec(_) => "PUBREC",
        Packet::PubRel(_) => "PUBREL",
        Packet::PubComp(_) => "PUBCOMP",
        Packet::Subscribe(_) => "SUBSCRIBE",
        Packet::SubAck(_) => "SUBACK",
        Packet::Unsubscribe(_) => "UNSUBSCRIBE",
        Packet::UnsubAck(_) => "UNSUBACK",
        Packet::PingReq => "PINGREQ",
        Packet::PingResp => "PINGRESP",
        Packet::Disconnect => "DISCONNECT",
    }
}
