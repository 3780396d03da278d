//! Host-string normalization shared by the policy engine and the proxy.
//!
//! Every hostname that enters the guardian — from a CONNECT target, a policy
//! entry, or a human approval decision — is normalized the same way before
//! comparison, so `Example.com:443`, `example.com`, and `EXAMPLE.COM` are all
//! the same key.

/// Lower-case a host and strip a trailing `:port`, if present.
///
/// IPv6 literals (`[::1]:8080`) keep their brackets; only the port past the
/// closing bracket is stripped.
pub fn normalize_host(raw: &str) -> String {
    let raw = raw.trim();
    let host = if let Some(rest) = raw.strip_prefix('[') {
        match rest.find(']') {
            Some(end) => &raw[..end + 2],
            None => raw,
        }
    } else {
        match raw.rfind(':') {
            // A bare IPv6 literal without brackets has more than one colon;
            // only treat the last colon as a port separator for host:port.
            Some(idx) if raw[..idx].matches(':').count() == 0 => &raw[..idx],
            _ => raw,
        }
    };
    host.to_ascii_lowercase()
}

/// Whether `host` matches a wildcard pattern of the form `*.suffix`.
///
/// Matches when `host == suffix` or `host` ends with `"." + suffix`. The
/// pattern must start with `*.`; anything else is not a wildcard and should
/// be compared for exact equality instead.
pub fn wildcard_matches(pattern: &str, host: &str) -> bool {
    match pattern.strip_prefix("*.") {
        Some(suffix) => host == suffix || host.ends_with(&format!(".{suffix}")),
        None => false,
    }
}

/// Sanitize a cloister name the way the container runtime expects: lowercase
/// alphanumerics and `-`, runs of anything else collapsed to a single `-`,
/// leading/trailing `-` trimmed, truncated to 63 characters, falling back to
/// `"default"` when the result would be empty.
pub fn sanitize_cloister_name(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut last_was_dash = false;
    for ch in raw.chars().flat_map(|c| c.to_lowercase()) {
        if ch.is_ascii_alphanumeric() {
            out.push(ch);
            last_was_dash = false;
        } else if !last_was_dash {
            out.push('-');
            last_was_dash = true;
        }
    }
    let trimmed = out.trim_matches('-');
    let truncated: String = trimmed.chars().take(63).collect();
    let truncated = truncated.trim_end_matches('-');
    if truncated.is_empty() {
        "default".to_string()
    } else {
        truncated.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_host_strips_port_and_case() {
        assert_eq!(normalize_host("Example.com:443"), "example.com");
        assert_eq!(normalize_host("EXAMPLE.COM"), "example.com");
        assert_eq!(normalize_host(" api.example.com "), "api.example.com");
    }

    #[test]
    fn test_normalize_host_ipv6() {
        assert_eq!(normalize_host("[::1]:8080"), "[::1]");
        assert_eq!(normalize_host("[::1]"), "[::1]");
    }

    #[test]
    fn test_wildcard_matches() {
        assert!(wildcard_matches("*.example.com", "api.example.com"));
        assert!(wildcard_matches("*.example.com", "example.com"));
        assert!(!wildcard_matches("*.example.com", "evilexample.com"));
        assert!(!wildcard_matches("example.com", "api.example.com"));
    }

    #[test]
    fn test_sanitize_cloister_name() {
        assert_eq!(sanitize_cloister_name("My App_Main!!"), "my-app-main");
        assert_eq!(sanitize_cloister_name("---"), "default");
        assert_eq!(sanitize_cloister_name(""), "default");
        assert_eq!(
            sanitize_cloister_name("feature/add-widgets"),
            "feature-add-widgets"
        );
    }
}
