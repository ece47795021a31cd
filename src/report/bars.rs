//! Share of total time per phase as a bar of block glyphs
//!
//! A bar is flagged when its percentage exceeds an even split (`100 / fields`).

use std::fmt::Write;
use std::time::Duration;

use super::duration::format_duration;
use super::segment::Field;
use super::{Palette, Plain};

pub const BLOCK: char = '█';

/// Truncated percentage of `total`. Zero when `total` is zero.
pub fn percentage(cost: Duration, total: Duration) -> usize {
    if total.is_zero() {
        return 0;
    }
    (cost.as_nanos() * 100 / total.as_nanos()) as usize
}

pub fn render_bars(fields: &[Field]) -> String {
    render_bars_with(fields, &Plain)
}

pub fn render_bars_with(fields: &[Field], palette: &dyn Palette) -> String {
    let total: Duration = fields.iter().map(|f| f.cost).sum();
    let fair_share = 100 / fields.len().max(1);

    let mut out = String::new();
    for field in fields {
        let percent = percentage(field.cost, total);
        let bar: String = std::iter::repeat(BLOCK).take(percent).collect();
        let _ = writeln!(
            out,
            "{:<21}  {:>15}\t{}",
            field.name,
            format_duration(field.cost),
            palette.bar(&bar, percent > fair_share)
        );
    }
    out
}
