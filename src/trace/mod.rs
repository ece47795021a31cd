//! Milestone recording for a single connection attempt
//!
//! A [`TraceRecorder`] is an append-only log of named, timestamped milestones. One
//! recorder is created per attempt and handed to the session, which writes request-side
//! milestones from the foreground and reply-side milestones from the receive path.
//!
//! ```text
//! DNSLookup ─► TCPDial ─► TLSDial ─► Connect ─► Connack ─► Subscribe ─► Suback
//!                                                   ─► Publish ─► Puback ─► Ping ─► Pong ─► Message
//! ```

use chrono::{DateTime, Local, TimeDelta};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use tracing::debug;

/// Named lifecycle points, in their logical order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MilestoneKind {
    DnsLookup,
    TcpDial,
    TlsDial,
    Connect,
    Connack,
    Subscribe,
    Suback,
    Publish,
    Puback,
    Ping,
    Pong,
    Message,
}

impl MilestoneKind {
    pub const ALL: [MilestoneKind; 12] = [
        MilestoneKind::DnsLookup,
        MilestoneKind::TcpDial,
        MilestoneKind::TlsDial,
        MilestoneKind::Connect,
        MilestoneKind::Connack,
        MilestoneKind::Subscribe,
        MilestoneKind::Suback,
        MilestoneKind::Publish,
        MilestoneKind::Puback,
        MilestoneKind::Ping,
        MilestoneKind::Pong,
        MilestoneKind::Message,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MilestoneKind::DnsLookup => "DNSLookup",
            MilestoneKind::TcpDial => "TCPDial",
            MilestoneKind::TlsDial => "TLSDial",
            MilestoneKind::Connect => "Connect",
            MilestoneKind::Connack => "Connack",
            MilestoneKind::Subscribe => "Subscribe",
            MilestoneKind::Suback => "Suback",
            MilestoneKind::Publish => "Publish",
            MilestoneKind::Puback => "Puback",
            MilestoneKind::Ping => "Ping",
            MilestoneKind::Pong => "Pong",
            MilestoneKind::Message => "Message",
        }
    }
}

impl fmt::Display for MilestoneKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One recorded point. `at` drives all arithmetic, `wall` is only for display.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Milestone {
    pub kind: MilestoneKind,
    pub at: Instant,
    pub wall: DateTime<Local>,
}

impl fmt::Display for Milestone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind, self.wall.format("%Y-%m-%d %H:%M:%S%.6f"))
    }
}

/// Shared handle to the milestone log of one attempt
///
/// Cloning shares the log. Appends are serialized by an internal mutex so the
/// foreground and the receive path can both write.
#[derive(Debug, Clone, Default)]
pub struct TraceRecorder {
    points: Arc<Mutex<Vec<Milestone>>>,
}

impl TraceRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `kind` at `at`. A kind is kept once; later duplicates are dropped and
    /// `false` is returned.
    pub fn add_point(&self, kind: MilestoneKind, at: Instant) -> bool {
        let now = Instant::now();
        let behind = TimeDelta::from_std(now.saturating_duration_since(at)).unwrap_or_default();
        let wall = Local::now() - behind;

        let mut points = self.points.lock().unwrap_or_else(PoisonError::into_inner);
        if points.iter().any(|p| p.kind == kind) {
            debug!("Ignoring duplicate milestone {}", kind);
            return false;
        }
        points.push(Milestone { kind, at, wall });
        debug!("Recorded milestone {}", kind);
        true
    }

    /// Appends `kind` at the current instant
    pub fn mark(&self, kind: MilestoneKind) -> bool {
        self.add_point(kind, Instant::now())
    }

    /// Snapshot of the log in insertion order
    pub fn points(&self) -> Vec<Milestone> {
        self.points
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn get(&self, kind: MilestoneKind) -> Option<Milestone> {
        self.points
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|p| p.kind == kind)
            .copied()
    }

    pub fn is_empty(&self) -> bool {
        self.points
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn keeps_insertion_order() {
        let recorder = TraceRecorder::new();
        let base = Instant::now();
        recorder.add_point(MilestoneKind::TcpDial, base);
        recorder.add_point(MilestoneKind::Connect, base + Duration::from_millis(5));
        recorder.add_point(MilestoneKind::Connack, base + Duration::from_millis(40));

        let kinds: Vec<_> = recorder.points().iter().map(|p| p.kind).collect();
        assert_eq!(
            kinds,
            vec![
                MilestoneKind::TcpDial,
                MilestoneKind::Connect,
                MilestoneKind::Connack
            ]
        );
    }

    #[test]
    fn first_point_of_a_kind_wins() {
        let recorder = TraceRecorder::new();
        let base = Instant::now();
        assert!(recorder.add_point(MilestoneKind::Message, base));
        assert!(!recorder.add_point(MilestoneKind::Message, base + Duration::from_secs(1)));

        assert_eq!(recorder.points().len(), 1);
        assert_eq!(recorder.get(MilestoneKind::Message).map(|m| m.at), Some(base));
    }

    #[test]
    fn clones_share_the_log() {
        let recorder = TraceRecorder::new();
        let receive_side = recorder.clone();
        assert!(receive_side.is_empty());
        recorder.mark(MilestoneKind::Subscribe);
        receive_side.mark(MilestoneKind::Suback);

        assert_eq!(recorder.points().len(), 2);
        assert!(!receive_side.is_empty());
    }

    #[test]
    fn concurrent_appends_are_serialized() {
        let recorder = TraceRecorder::new();
        let handles: Vec<_> = MilestoneKind::ALL
            .iter()
            .map(|kind| {
                let recorder = recorder.clone();
                let kind = *kind;
                std::thread::spawn(move || recorder.mark(kind))
            })
            .collect();
        for handle in handles {
            assert!(handle.join().unwrap());
        }
        assert_eq!(recorder.points().len(), MilestoneKind::ALL.len());
    }

    #[test]
    fn display_uses_wire_names() {
        assert_eq!(MilestoneKind::DnsLookup.to_string(), "DNSLookup");
        assert_eq!(MilestoneKind::Puback.to_string(), "Puback");
    }
}
