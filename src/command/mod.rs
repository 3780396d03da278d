//! Canonical-command rendering and the auto/manual/deny pattern matcher.
//! The canonical string is used only for pattern matching and display — the
//! request server always executes `args[]` directly and never shells out to
//! a concatenated string.

pub mod registry;

pub use registry::CommandMatcherRegistry;

use regex::Regex;
use tracing::warn;

/// Whether `arg` can be rendered bare, without single-quoting.
fn is_bare_safe(arg: &str) -> bool {
    !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "_-./:@+=".contains(c))
}

/// Single-quote `arg` the POSIX way, escaping embedded single quotes as
/// `'\''`.
fn single_quote(arg: &str) -> String {
    let mut out = String::with_capacity(arg.len() + 2);
    out.push('\'');
    for c in arg.chars() {
        if c == '\'' {
            out.push_str("'\\''");
        } else {
            out.push(c);
        }
    }
    out.push('\'');
    out
}

fn render_arg(arg: &str) -> String {
    if arg.is_empty() {
        "''".to_string()
    } else if is_bare_safe(arg) {
        arg.to_string()
    } else {
        single_quote(arg)
    }
}

/// Whether any argument contains a NUL byte — rejected by the request
/// server before canonicalization is ever attempted.
pub fn contains_nul(args: &[String]) -> bool {
    args.iter().any(|a| a.contains('\0'))
}

/// Reconstruct a canonical, shell-quoted command string from `argv`.
/// Deterministic and stable: quoting an already-safe string is the
/// identity.
pub fn canonicalize(args: &[String]) -> String {
    args.iter().map(|a| render_arg(a)).collect::<Vec<_>>().join(" ")
}

/// Which bucket a canonical command fell into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchCategory {
    Auto,
    Manual,
}

/// Result of matching a canonical command against the configured patterns.
#[derive(Debug, Clone)]
pub enum MatchResult {
    Matched { category: MatchCategory, pattern: String },
    Deny,
}

struct CompiledPattern {
    regex: Regex,
    source: String,
}

/// Compiled `auto_approve` / `manual_approve` regex sets for one project
/// (or the global config). Auto patterns are checked, in configured order,
/// before manual patterns; the first hit wins. Invalid regexes are skipped
/// with a warning rather than failing the whole set.
pub struct CommandMatcher {
    auto: Vec<CompiledPattern>,
    manual: Vec<CompiledPattern>,
}

impl CommandMatcher {
    pub fn compile(auto_patterns: &[String], manual_patterns: &[String]) -> Self {
        Self {
            auto: compile_all(auto_patterns),
            manual: compile_all(manual_patterns),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.auto.is_empty() && self.manual.is_empty()
    }

    pub fn match_command(&self, cmd: &str) -> MatchResult {
        for p in &self.auto {
            if p.regex.is_match(cmd) {
                return MatchResult::Matched {
                    category: MatchCategory::Auto,
                    pattern: p.source.clone(),
                };
            }
        }
        for p in &self.manual {
            if p.regex.is_match(cmd) {
                return MatchResult::Matched {
                    category: MatchCategory::Manual,
                    pattern: p.source.clone(),
                };
            }
        }
        MatchResult::Deny
    }
}

fn compile_all(patterns: &[String]) -> Vec<CompiledPattern> {
    patterns
        .iter()
        .filter_map(|source| match Regex::new(source) {
            Ok(regex) => Some(CompiledPattern {
                regex,
                source: source.clone(),
            }),
            Err(err) => {
                warn!(pattern = %source, error = %err, "skipping invalid command pattern");
                None
            }
        })
        .collect()
}
