//! Parsing and rendering of short human duration strings (`"60s"`, `"5m"`).
//!
//! Used both for config values (`proxy.approval_timeout: 60s`) and for
//! rendering `duration=` fields in audit log lines.

use std::time::Duration;

/// Parse a duration string of the form `<number><unit>` where unit is one of
/// `ms`, `s`, `m`, `h`. Returns `None` on malformed input — callers are
/// expected to fall back to a safe default and log a warning.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    let split_at = s.find(|c: char| !c.is_ascii_digit() && c != '.')?;
    let (number, unit) = s.split_at(split_at);
    let value: f64 = number.parse().ok()?;
    if value < 0.0 {
        return None;
    }
    let millis = match unit {
        "ms" => value,
        "s" => value * 1_000.0,
        "m" => value * 60_000.0,
        "h" => value * 3_600_000.0,
        _ => return None,
    };
    Some(Duration::from_millis(millis.round() as u64))
}

/// Render a duration the way audit log lines do: milliseconds under a
/// second, one decimal of seconds up to a minute, otherwise `<m>m<s>s`.
pub fn render_duration(d: Duration) -> String {
    let millis = d.as_millis();
    if millis < 1_000 {
        format!("{millis}ms")
    } else if millis < 60_000 {
        format!("{:.1}s", d.as_secs_f64())
    } else {
        let total_secs = d.as_secs();
        format!("{}m{}s", total_secs / 60, total_secs % 60)
    }
}
