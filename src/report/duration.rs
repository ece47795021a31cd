//! Compact duration text: `0s`, `850ns`, `12.5µs`, `35ms`, `2.5s`, `1m3s`, `1h0m0s`

use std::time::Duration;

const NANOS_PER_MICRO: u128 = 1_000;
const NANOS_PER_MILLI: u128 = 1_000_000;
const NANOS_PER_SEC: u128 = 1_000_000_000;

pub fn format_duration(d: Duration) -> String {
    let nanos = d.as_nanos();
    if nanos == 0 {
        return "0s".to_string();
    }
    if nanos < NANOS_PER_MICRO {
        return format!("{}ns", nanos);
    }
    if nanos < NANOS_PER_MILLI {
        return format!("{}µs", fraction(nanos, 3));
    }
    if nanos < NANOS_PER_SEC {
        return format!("{}ms", fraction(nanos, 6));
    }

    let secs = nanos / NANOS_PER_SEC;
    let hours = secs / 3600;
    let minutes = (secs / 60) % 60;
    let seconds = secs % 60;

    let mut out = String::new();
    if hours > 0 {
        out.push_str(&format!("{}h", hours));
    }
    if hours > 0 || minutes > 0 {
        out.push_str(&format!("{}m", minutes));
    }
    let sub_second = nanos % NANOS_PER_SEC;
    out.push_str(&fraction(seconds * NANOS_PER_SEC + sub_second, 9));
    out.push('s');
    out
}

/// Displayed width in characters
pub fn text_width(text: &str) -> usize {
    text.chars().count()
}

/// `value / 10^digits` with trailing zeros of the fraction removed
fn fraction(value: u128, digits: u32) -> String {
    let scale = 10u128.pow(digits);
    let whole = value / scale;
    let rest = value % scale;
    if rest == 0 {
        return whole.to_string();
    }
    let decimals = format!("{:0width$}", rest, width = digits as usize);
    format!("{}.{}", whole, decimals.trim_end_matches('0'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(Duration::ZERO, "0s")]
    #[case(Duration::from_nanos(850), "850ns")]
    #[case(Duration::from_nanos(12_500), "12.5µs")]
    #[case(Duration::from_micros(1), "1µs")]
    #[case(Duration::from_millis(35), "35ms")]
    #[case(Duration::from_nanos(1_234_567), "1.234567ms")]
    #[case(Duration::from_millis(2_500), "2.5s")]
    #[case(Duration::from_secs(63), "1m3s")]
    #[case(Duration::from_secs(120), "2m0s")]
    #[case(Duration::from_secs(3600), "1h0m0s")]
    #[case(Duration::from_nanos(1_000_000_001), "1.000000001s")]
    fn formats_like_compact_units(#[case] input: Duration, #[case] expected: &str) {
        assert_eq!(format_duration(input), expected);
    }

    #[test]
    fn width_counts_characters() {
        assert_eq!(text_width("12.5µs"), 6);
        assert_eq!(text_width("35ms"), 4);
    }
}
