//! Failure taxonomy of a connection attempt. Every variant is terminal.

use rumqttc::ConnectReturnCode;
use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Invalid target '{target}': {reason}")]
    InvalidTarget { target: String, reason: String },

    #[error("Failed to resolve {host}: {source}")]
    ResolutionError {
        host: String,
        #[source]
        source: io::Error,
    },

    #[error("Failed to connect to {addr}: {source}")]
    TransportError {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("TLS handshake failed: {0}")]
    HandshakeError(String),

    #[error("Broker rejected connection: {code:?}")]
    ProtocolRejected { code: ConnectReturnCode },

    #[error("Subscription refused for topic(s): {}", topics.join(", "))]
    SubscriptionRefused { topics: Vec<String> },

    #[error("Failed to decode inbound packet: {0}")]
    DecodeError(String),

    #[error("Failed to write {packet}: {reason}")]
    WriteError { packet: &'static str, reason: String },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("QoS {0} is not supported")]
    UnsupportedQos(u8),

    #[error("Packet identifier {0} is already awaiting a reply")]
    DuplicatePacketId(u16),

    #[error("Connection closed by broker")]
    ConnectionClosed,

    #[error("Attempt cancelled")]
    Cancelled,
}

impl ClientError {
    pub fn write(packet: &'static str, reason: impl ToString) -> Self {
        ClientError::WriteError {
            packet,
            reason: reason.to_string(),
        }
    }
}
