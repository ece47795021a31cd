//! Turns a milestone log into the ordered phases shown in the report
//!
//! Phases are walked in logical order regardless of insertion order. Each field runs
//! from its opening milestone to the next field's opening milestone, or to its reply
//! milestone when it is the last one, so the costs always add up to the span from the
//! first to the last milestone. The connection group (DNS, TCP, TLS, MQTT connect)
//! always ends at CONNACK.
//!
//! `MQTT Message Received` is the exception: it starts where the previous field ended,
//! measuring how long the broker stayed idle before pushing a message.

use std::time::{Duration, Instant};
use thiserror::Error;

use crate::trace::{Milestone, MilestoneKind};

pub const DNS_LOOKUP: &str = "DNS Lookup";
pub const TCP_CONNECTION: &str = "TCP Connection";
pub const TLS_HANDSHAKE: &str = "TLS Handshake";
pub const MQTT_CONNECTION: &str = "MQTT Connection";
pub const MQTT_SUBSCRIBE: &str = "MQTT Subscribe";
pub const MQTT_PUBLISH: &str = "MQTT Publish";
pub const MQTT_PING: &str = "MQTT Ping";
pub const MQTT_MESSAGE_RECEIVED: &str = "MQTT Message Received";

/// Extra columns around a phase name: two leading spaces, one trailing
pub const COLUMN_PADDING: usize = 3;

pub const OPEN_GLYPH: &str = "[";
pub const CONTINUE_GLYPH: &str = "|";
pub const CLOSE_GLYPH: &str = "]";

pub fn column_width(name: &str) -> usize {
    name.chars().count() + COLUMN_PADDING
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub name: &'static str,
    pub cost: Duration,
    pub begin: &'static str,
    pub end: &'static str,
    pub width: usize,
    /// Instant the phase starts
    pub start: Instant,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SegmentError {
    #[error("No milestones were recorded")]
    Empty,

    #[error("Attempt ended before CONNACK, nothing to segment")]
    Incomplete,
}

/// Segmented attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stat {
    pub fields: Vec<Field>,
    pub begin: Instant,
    pub end: Instant,
}

impl Stat {
    pub fn total(&self) -> Duration {
        self.end.saturating_duration_since(self.begin)
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.fields.iter().any(|f| f.name == name)
    }
}

pub fn segment(points: &[Milestone]) -> Result<Stat, SegmentError> {
    if points.is_empty() {
        return Err(SegmentError::Empty);
    }
    let at = |kind: MilestoneKind| points.iter().find(|p| p.kind == kind).map(|p| p.at);
    let connack = at(MilestoneKind::Connack).ok_or(SegmentError::Incomplete)?;

    let mut segmenter = Segmenter::default();
    for (kind, name) in [
        (MilestoneKind::DnsLookup, DNS_LOOKUP),
        (MilestoneKind::TcpDial, TCP_CONNECTION),
        (MilestoneKind::TlsDial, TLS_HANDSHAKE),
        (MilestoneKind::Connect, MQTT_CONNECTION),
    ] {
        if let Some(t) = at(kind) {
            segmenter.open(name, t);
        }
    }
    if segmenter.fields.is_empty() {
        return Err(SegmentError::Incomplete);
    }
    segmenter.close(connack);

    for (request, reply, name) in [
        (MilestoneKind::Subscribe, MilestoneKind::Suback, MQTT_SUBSCRIBE),
        (MilestoneKind::Publish, MilestoneKind::Puback, MQTT_PUBLISH),
        (MilestoneKind::Ping, MilestoneKind::Pong, MQTT_PING),
    ] {
        if let Some(t) = at(request) {
            segmenter.open(name, t);
            if let Some(r) = at(reply) {
                segmenter.close(r);
            }
        }
    }

    if let Some(t) = at(MilestoneKind::Message) {
        segmenter.open_from_previous_end(MQTT_MESSAGE_RECEIVED);
        segmenter.close(t);
    }

    segmenter.finish()
}

#[derive(Default)]
struct Segmenter {
    fields: Vec<Field>,
    end: Option<Instant>,
}

impl Segmenter {
    fn open(&mut self, name: &'static str, t: Instant) {
        if let Some(previous) = self.fields.last_mut() {
            previous.cost = t.saturating_duration_since(previous.start);
        }
        self.push(name, t);
    }

    fn open_from_previous_end(&mut self, name: &'static str) {
        if let Some(start) = self.end {
            self.push(name, start);
        }
    }

    fn push(&mut self, name: &'static str, start: Instant) {
        let begin = if self.fields.is_empty() {
            OPEN_GLYPH
        } else {
            CONTINUE_GLYPH
        };
        self.fields.push(Field {
            name,
            cost: Duration::ZERO,
            begin,
            end: "",
            width: column_width(name),
            start,
        });
        self.end = Some(start);
    }

    fn close(&mut self, t: Instant) {
        if let Some(current) = self.fields.last_mut() {
            current.cost = t.saturating_duration_since(current.start);
            self.end = Some(current.start + current.cost);
        }
    }

    fn finish(mut self) -> Result<Stat, SegmentError> {
        let (first, end) = match (self.fields.first(), self.end) {
            (Some(first), Some(end)) => (first.start, end),
            _ => return Err(SegmentError::Incomplete),
        };
        if let Some(last) = self.fields.last_mut() {
            last.end = CLOSE_GLYPH;
        }
        Ok(Stat {
            fields: self.fields,
            begin: first,
            end,
        })
    }
}
