//! Line format shared by every audit event: `<ts> <category> <EVENT> k=v …`.

use std::fmt::Write as _;

/// The two audit categories named in the design: host-command requests and
/// network domain requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    Hostexec,
    Domain,
}

impl Category {
    fn as_str(self) -> &'static str {
        match self {
            Category::Hostexec => "HOSTEXEC",
            Category::Domain => "DOMAIN",
        }
    }
}

/// Whether `value` needs double-quoting per the design's quoting rule.
fn needs_quoting(value: &str) -> bool {
    value
        .chars()
        .any(|c| matches!(c, ' ' | '=' | '"' | '\n' | '\t'))
}

/// Quote and escape a field value for the audit line: `"` → `\"`, `\n` → `\n`
/// (literal backslash-n), `\t` → `\t`.
fn quote(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            other => out.push(other),
        }
    }
    out.push('"');
    out
}

/// Render one `key=value` pair, quoting the value only when necessary.
pub fn render_field(key: &str, value: &str) -> String {
    if needs_quoting(value) {
        format!("{key}={}", quote(value))
    } else {
        format!("{key}={value}")
    }
}

/// Build a full audit line: RFC3339 UTC timestamp, category, event kind, and
/// fields in the caller-supplied (fixed-per-event-kind) order.
pub fn format_line(category: Category, event: &str, fields: &[(&str, String)]) -> String {
    let timestamp = chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true);
    let mut line = String::new();
    write!(line, "{timestamp} {} {event}", category.as_str()).expect("String write cannot fail");
    for (key, value) in fields {
        line.push(' ');
        line.push_str(&render_field(key, value));
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_field_plain() {
        assert_eq!(render_field("cmd", "docker"), "cmd=docker");
    }

    #[test]
    fn test_render_field_quotes_spaces() {
        assert_eq!(render_field("cmd", "docker compose up"), "cmd=\"docker compose up\"");
    }

    #[test]
    fn test_render_field_escapes_embedded_quote() {
        assert_eq!(render_field("reason", "said \"no\""), "reason=\"said \\\"no\\\"\"");
    }

    #[test]
    fn test_render_field_escapes_newline_and_tab() {
        assert_eq!(render_field("x", "a\nb\tc"), "x=\"a\\nb\\tc\"");
    }

    #[test]
    fn test_format_line_has_category_and_event() {
        let line = format_line(Category::Hostexec, "REQUEST", &[("cmd", "ls".to_string())]);
        assert!(line.contains(" HOSTEXEC REQUEST cmd=ls"));
    }
}
