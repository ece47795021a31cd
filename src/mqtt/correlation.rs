//! Request/reply matching keyed by MQTT packet identifier
//!
//! The foreground registers an identifier before writing a SUBSCRIBE or a QoS 1
//! PUBLISH and waits on the returned receiver. The receive path resolves the entry
//! when the SUBACK/PUBACK arrives. Replies for unknown identifiers are dropped.
//!
//! Entries are not removed on their own when a wait is abandoned. A waiter that gives
//! up calls [`CorrelationTable::evict`]; when the receive path dies it calls
//! [`CorrelationTable::abandon_all`], which drops every sender so blocked waiters wake
//! with a receive error instead of hanging.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use rumqttc::Packet;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use super::error::ClientError;

/// Decoded reply handed back to the waiter untouched
#[derive(Debug, Clone)]
pub struct AckResult {
    pub packet_id: u16,
    pub packet: Packet,
}

#[derive(Debug, Default)]
pub struct CorrelationTable {
    pending: DashMap<u16, oneshot::Sender<AckResult>>,
}

impl CorrelationTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates the pending entry for `packet_id`
    pub fn register(&self, packet_id: u16) -> Result<oneshot::Receiver<AckResult>, ClientError> {
        match self.pending.entry(packet_id) {
            Entry::Occupied(_) => Err(ClientError::DuplicatePacketId(packet_id)),
            Entry::Vacant(slot) => {
                let (tx, rx) = oneshot::channel();
                slot.insert(tx);
                debug!("Registered packet id {}", packet_id);
                Ok(rx)
            }
        }
    }

    /// Removes the entry for `packet_id` and delivers `packet` to its waiter.
    /// Returns `false` when nothing was pending under that identifier.
    pub fn resolve(&self, packet_id: u16, packet: Packet) -> bool {
        match self.pending.remove(&packet_id) {
            Some((_, tx)) => {
                if tx.send(AckResult { packet_id, packet }).is_err() {
                    debug!("Waiter for packet id {} already gone", packet_id);
                }
                true
            }
            None => {
                debug!("Discarding reply for unknown packet id {}", packet_id);
                false
            }
        }
    }

    pub fn is_pending(&self, packet_id: u16) -> bool {
        self.pending.contains_key(&packet_id)
    }

    pub fn evict(&self, packet_id: u16) -> bool {
        self.pending.remove(&packet_id).is_some()
    }

    /// Drops every pending sender. Returns how many waiters were abandoned.
    pub fn abandon_all(&self) -> usize {
        let abandoned = self.pending.len();
        self.pending.clear();
        if abandoned > 0 {
            warn!("Abandoned {} pending request(s)", abandoned);
        }
        abandoned
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

/// Wrapping 16 bit identifier source. Zero is not a valid MQTT packet id.
#[derive(Debug, Default)]
pub struct PacketIds {
    last: u16,
}

impl PacketIds {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&mut self) -> u16 {
        self.last = self.last.wrapping_add(1);
        if self.last == 0 {
            self.last = 1;
        }
        self.last
    }
}
