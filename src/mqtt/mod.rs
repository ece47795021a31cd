//! # MQTT Measurement Client
//!
//! A deliberately small MQTT 3.1.1 client that exists to be timed. It drives one
//! connection attempt through resolution, transport setup, the protocol handshake and
//! optional subscribe/publish/ping exchanges, recording a milestone at every step.
//!
//! ## Module Architecture
//!
//! ```text
//! mqtt/
//! ├── config.rs       - Client, socket and TLS settings
//! ├── codec.rs        - Framing over rumqttc's packet codec
//! ├── correlation.rs  - Packet id → pending reply table
//! ├── error.rs        - Failure taxonomy
//! ├── message.rs      - Inbound messages and the message callback
//! ├── receiver.rs     - Background receive path
//! ├── session.rs      - Connection state machine
//! └── transport.rs    - Addressing, TCP tuning, TLS upgrade
//! ```
//!
//! ## Scope
//!
//! No QoS 2, no session store, no reconnects. Every failure ends the attempt and
//! nothing blocks on a timer: a broker that never answers hangs the attempt until the
//! cancellation token fires.

pub mod codec;
pub mod config;
pub mod correlation;
pub mod error;
pub mod message;
pub mod receiver;
pub mod session;
pub mod transport;

pub use config::{ClientConfig, TcpOptions, TlsOptions};
pub use correlation::{AckResult, CorrelationTable};
pub use error::ClientError;
pub use message::InboundMessage;
pub use session::{Connected, Delivery, Idle, Session};
