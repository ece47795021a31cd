//! Waterfall diagram
//!
//! ```text
//!   TCP Connection   MQTT Connection
//! [      5ms       |      35ms       ]
//!                  |                 |
//!                 5ms                |
//!                                  40ms
//! ```
//!
//! Row 0 holds the phase names, row 1 each phase's own cost between its glyphs, and
//! the remaining rows stack cumulative totals under the boundary where each phase
//! ends. All arithmetic is on plain character widths; the palette only decorates.

use std::time::Duration;

use super::duration::{format_duration, text_width};
use super::segment::Field;
use super::{Palette, Plain};

/// Splits `count` spaces around a centered item, extra space to the right
pub fn split(count: usize) -> (usize, usize) {
    let pre = count / 2;
    (pre, count - pre)
}

pub fn render(fields: &[Field]) -> String {
    render_with(fields, &Plain)
}

pub fn render_with(fields: &[Field], palette: &dyn Palette) -> String {
    if fields.is_empty() {
        return String::new();
    }

    let mut lines = vec![String::new(); fields.len() + 3];
    let mut elapsed = Duration::ZERO;
    let mut total = String::new();
    let mut offset = 0;
    let mut position = 0;

    for (i, field) in fields.iter().enumerate() {
        pad(&mut lines[0], 2);
        lines[0].push_str(&palette.label(field.name));
        pad(&mut lines[0], 1);

        let cost = format_duration(field.cost);
        let needed = text_width(field.begin) + text_width(&cost);
        if needed > field.width {
            // durations are never truncated; the header absorbs the overflow
            pad(&mut lines[0], needed - field.width);
        }
        let (pre, post) = split(field.width.saturating_sub(needed));
        lines[1].push_str(field.begin);
        pad(&mut lines[1], pre);
        lines[1].push_str(&palette.figure(&cost));
        pad(&mut lines[1], post);
        lines[1].push_str(field.end);

        offset += field.width;
        for j in 0..i {
            pad(&mut lines[2 + j], field.width - 1);
            lines[2 + j].push('|');
        }

        pad(
            &mut lines[2 + i],
            offset.saturating_sub(position + text_width(&total)),
        );
        lines[2 + i].push('|');

        elapsed += field.cost;
        total = format_duration(elapsed);
        position = offset.saturating_sub(text_width(&total) / 2);
        pad(&mut lines[3 + i], position);
        lines[3 + i].push_str(&palette.figure(&total));
    }

    let mut out = lines.join("\n");
    out.push('\n');
    out
}

fn pad(line: &mut String, count: usize) {
    line.extend(std::iter::repeat(' ').take(count));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::segment::{column_width, MQTT_CONNECTION, TCP_CONNECTION};
    use std::time::Instant;

    fn field(name: &'static str, cost_ms: u64, begin: &'static str, end: &'static str) -> Field {
        Field {
            name,
            cost: Duration::from_millis(cost_ms),
            begin,
            end,
            width: column_width(name),
            start: Instant::now(),
        }
    }

    fn sp(n: usize) -> String {
        " ".repeat(n)
    }

    #[test]
    fn split_biases_right() {
        assert_eq!(split(13), (6, 7));
        assert_eq!(split(12), (6, 6));
        assert_eq!(split(0), (0, 0));
    }

    #[test]
    fn renders_two_phase_connection() {
        let fields = vec![
            field(TCP_CONNECTION, 5, "[", ""),
            field(MQTT_CONNECTION, 35, "|", "]"),
        ];
        let expected = [
            "  TCP Connection   MQTT Connection ".to_string(),
            "[      5ms       |      35ms       ]".to_string(),
            format!("{}|{}|", sp(17), sp(17)),
            format!("{}5ms{}|", sp(16), sp(16)),
            format!("{}40ms", sp(33)),
        ]
        .join("\n")
            + "\n";

        assert_eq!(render(&fields), expected);
    }

    #[test]
    fn rendering_is_idempotent() {
        let fields = vec![
            field(TCP_CONNECTION, 5, "[", ""),
            field(MQTT_CONNECTION, 35, "|", "]"),
        ];
        assert_eq!(render(&fields), render(&fields));
    }

    #[test]
    fn wide_duration_pads_header_instead_of_truncating() {
        let mut narrow = field("DNS", 0, "[", "]");
        narrow.cost = Duration::from_nanos(1_234_567);
        let out = render(&[narrow]);
        let lines: Vec<&str> = out.lines().collect();

        assert!(lines[1].contains("1.234567ms"));
        // width 6, "[" + 10 chars needs 11: five extra header spaces
        assert_eq!(lines[0], format!("  DNS {}", sp(5)));
        assert_eq!(lines[1], "[1.234567ms]");
    }

    #[test]
    fn one_marker_row_per_field() {
        let fields = vec![
            field(TCP_CONNECTION, 5, "[", ""),
            field(MQTT_CONNECTION, 35, "|", ""),
            field("MQTT Subscribe", 14, "|", "]"),
        ];
        assert_eq!(render(&fields).lines().count(), fields.len() + 3);
    }

    #[test]
    fn empty_input_renders_nothing() {
        assert_eq!(render(&[]), "");
    }
}
