use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Per-connection settings handed to a [`super::session::Session`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub username: String,
    pub password: String,
    pub client_id: String,
    pub clean_session: bool,
    /// 0 disables the broker's keep-alive timer; nothing pings in the background
    pub keep_alive_secs: u16,
    /// Largest inbound frame accepted by the receive path
    pub max_packet_size: usize,
    pub tcp: TcpOptions,
    pub tls: TlsOptions,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            username: String::new(),
            password: String::new(),
            client_id: "mqttstat".to_string(),
            clean_session: true,
            keep_alive_secs: 0,
            max_packet_size: 1024 * 1024,
            tcp: TcpOptions::default(),
            tls: TlsOptions::default(),
        }
    }
}

/// Socket tuning applied before the transport connect
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TcpOptions {
    pub keepalive: bool,
    pub nodelay: bool,
    /// `None` leaves the OS default in place
    pub linger_secs: Option<u64>,
    /// 0 leaves the OS default in place
    pub recv_buffer: u32,
    pub send_buffer: u32,
}

impl Default for TcpOptions {
    fn default() -> Self {
        Self {
            keepalive: true,
            nodelay: true,
            linger_secs: None,
            recv_buffer: 0,
            send_buffer: 0,
        }
    }
}

impl TcpOptions {
    pub fn linger(&self) -> Option<Duration> {
        self.linger_secs.map(Duration::from_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsOptions {
    pub skip_verify: bool,
    /// Keep the resumption cache across rounds
    pub session_ticket: bool,
    pub ca_file: Option<PathBuf>,
}

impl Default for TlsOptions {
    fn default() -> Self {
        Self {
            skip_verify: true,
            session_ticket: false,
            ca_file: None,
        }
    }
}
