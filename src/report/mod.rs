//! # Timing Report
//!
//! Post-processing of one finished attempt:
//!
//! ```text
//! [Milestone] ──segment──► Stat { [Field] } ──┬──► waterfall::render
//!                                             └──► bars::render_bars
//! ```
//!
//! Renderers work on plain text widths and call a [`Palette`] to decorate names,
//! figures and bars. [`Plain`] leaves text untouched; the terminal adapter adds color.

pub mod bars;
pub mod duration;
pub mod segment;
pub mod waterfall;

use std::fmt::Write;
use std::net::SocketAddr;

pub use bars::render_bars;
pub use segment::{segment, Field, SegmentError, Stat};
pub use waterfall::render;

use crate::trace::Milestone;

/// Decoration hooks used by the renderers
pub trait Palette {
    /// Phase names and header labels
    fn label(&self, text: &str) -> String;
    /// Durations and other values
    fn figure(&self, text: &str) -> String;
    /// A percentage bar; `flagged` marks more than an even share of the total
    fn bar(&self, text: &str, flagged: bool) -> String;
}

/// Undecorated output
#[derive(Debug, Clone, Copy, Default)]
pub struct Plain;

impl Palette for Plain {
    fn label(&self, text: &str) -> String {
        text.to_string()
    }

    fn figure(&self, text: &str) -> String {
        text.to_string()
    }

    fn bar(&self, text: &str, _flagged: bool) -> String {
        text.to_string()
    }
}

/// Connection details printed above the diagrams
#[derive(Debug, Clone)]
pub struct ReportHeader<'a> {
    pub server: &'a str,
    pub local: Option<SocketAddr>,
    pub username: &'a str,
    pub password: &'a str,
    pub client_id: &'a str,
    pub clean_session: bool,
}

impl ReportHeader<'_> {
    pub fn render_with(&self, palette: &dyn Palette) -> String {
        let mut out = String::new();
        let local = self
            .local
            .map(|addr| addr.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        let _ = writeln!(
            out,
            "Connected to {} from {}\n",
            palette.figure(self.server),
            local
        );
        if !self.username.is_empty() {
            let _ = writeln!(out, "{} : {}", palette.label("Username"), palette.figure(self.username));
        }
        if !self.password.is_empty() {
            let masked = "*".repeat(self.password.chars().count());
            let _ = writeln!(out, "{} : {}", palette.label("Password"), palette.figure(&masked));
        }
        if !self.client_id.is_empty() {
            let _ = writeln!(out, "{} : {}", palette.label("ClientID"), palette.figure(self.client_id));
        }
        let _ = writeln!(
            out,
            "{} : {}",
            palette.label("CleanSession"),
            palette.figure(&self.clean_session.to_string())
        );
        out
    }
}

/// Header, waterfall, bars and the idle-time note when a message phase is present
pub fn render_report(header: &ReportHeader<'_>, stat: &Stat, palette: &dyn Palette) -> String {
    let mut out = header.render_with(palette);
    out.push('\n');
    out.push_str(&waterfall::render_with(&stat.fields, palette));
    out.push('\n');
    out.push_str(&bars::render_bars_with(&stat.fields, palette));
    if stat.has_field(segment::MQTT_MESSAGE_RECEIVED) {
        let _ = writeln!(
            out,
            "\n{} is measured from the end of the previous phase: it is broker idle time, not client latency.",
            segment::MQTT_MESSAGE_RECEIVED
        );
    }
    out
}

/// Raw milestone listing for `--trace` and failed attempts
pub fn render_trace(points: &[Milestone]) -> String {
    let mut out = String::new();
    for point in points {
        let _ = writeln!(out, "{}", point);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::{MilestoneKind, TraceRecorder};
    use std::time::{Duration, Instant};

    fn header() -> ReportHeader<'static> {
        ReportHeader {
            server: "tcp://127.0.0.1:1883",
            local: "127.0.0.1:50000".parse().ok(),
            username: "user",
            password: "secret",
            client_id: "mqttstat",
            clean_session: true,
        }
    }

    #[test]
    fn header_masks_password() {
        let text = header().render_with(&Plain);
        assert!(text.starts_with("Connected to tcp://127.0.0.1:1883 from 127.0.0.1:50000\n"));
        assert!(text.contains("Username : user\n"));
        assert!(text.contains("Password : ******\n"));
        assert!(!text.contains("secret"));
        assert!(text.contains("CleanSession : true\n"));
    }

    #[test]
    fn report_notes_idle_time_only_with_message_phase() {
        let recorder = TraceRecorder::new();
        let base = Instant::now();
        recorder.add_point(MilestoneKind::TcpDial, base);
        recorder.add_point(MilestoneKind::Connect, base + Duration::from_millis(1));
        recorder.add_point(MilestoneKind::Connack, base + Duration::from_millis(2));
        let without = segment(&recorder.points()).unwrap();
        assert!(!render_report(&header(), &without, &Plain).contains("broker idle time"));

        recorder.add_point(MilestoneKind::Message, base + Duration::from_millis(9));
        let with = segment(&recorder.points()).unwrap();
        let text = render_report(&header(), &with, &Plain);
        assert!(text.contains("broker idle time"));
        assert!(text.contains(&render(&with.fields)));
        assert!(text.contains(&render_bars(&with.fields)));
    }

    #[test]
    fn trace_dump_lists_every_point() {
        let recorder = TraceRecorder::new();
        recorder.mark(MilestoneKind::TcpDial);
        recorder.mark(MilestoneKind::Connect);
        let dump = render_trace(&recorder.points());
        let lines: Vec<&str> = dump.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("TCPDial "));
        assert!(lines[1].starts_with("Connect "));
    }
}
