//! Small parsing helpers for command arguments.
//!
//! Nothing here touches the camera or the session.

use std::ops::RangeInclusive;

/// Allowed sensor gain, in dB.
pub const GAIN_RANGE: RangeInclusive<f64> = 0.0..=45.0;

/// Allowed exposure time, in microseconds.
pub const EXPOSURE_RANGE: RangeInclusive<f64> = 20.0..=1_000_000.0;

/// Allowed number of active wells.
pub const WELLS_RANGE: RangeInclusive<u32> = 1..=24;

/// Allowed save-frame target.
pub const SAVE_TARGET_RANGE: RangeInclusive<u32> = 1..=u32::MAX;

/// Result of [extract_keyed_value].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyedValue {
    /// Byte offset of the keyword in the searched text.
    pub position: usize,
    pub value: u64,
}

/// Find `keyword` in `text` and parse the integer following the next `=`.
///
/// The `=` may appear anywhere at or after the keyword. Everything after it
/// (trimmed of whitespace) must be ASCII digits. Returns `None` if the
/// keyword is absent, if there is no `=` after it, or if the value is not a
/// plain non-negative integer.
pub fn extract_keyed_value(text: &str, keyword: &str) -> Option<KeyedValue> {
    let position = text.find(keyword)?;
    let eq = position + text[position..].find('=')?;
    let num = text[eq + 1..].trim();
    if num.is_empty() || !num.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let value = num.parse().ok()?;
    Some(KeyedValue { position, value })
}

/// Clamp `value` into `range`.
pub fn clamp_to<T: PartialOrd + Copy>(value: T, range: &RangeInclusive<T>) -> T {
    if value < *range.start() {
        *range.start()
    } else if value > *range.end() {
        *range.end()
    } else {
        value
    }
}

/// Clamp a signed integer into an unsigned range.
pub fn clamp_int(value: i64, range: &RangeInclusive<u32>) -> u32 {
    let lo = i64::from(*range.start());
    let hi = i64::from(*range.end());
    // In range of u32 after clamping.
    value.clamp(lo, hi) as u32
}

/// `1`/`true` and `0`/`false`, ignoring case and surrounding whitespace.
pub fn parse_bool(text: &str) -> Option<bool> {
    match text.trim().to_lowercase().as_str() {
        "1" | "true" => Some(true),
        "0" | "false" => Some(false),
        _ => None,
    }
}

/// A finite floating point value.
pub fn parse_float(text: &str) -> Option<f64> {
    text.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

pub fn parse_int(text: &str) -> Option<i64> {
    text.trim().parse().ok()
}
