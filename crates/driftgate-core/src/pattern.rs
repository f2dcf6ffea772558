//! Ref and path filter patterns.
//!
//! Patterns use the GitHub workflow filter syntax:
//! - `*` matches zero or more characters except `/`
//! - `**` matches zero or more of any character
//! - `?` and `+` apply to the preceding character (zero-or-one, one-or-more)
//! - `[...]` is a character class
//!
//! Everything else is literal, so `v[0-9]+.[0-9]+.[0-9]+` matches `v1.2.3`
//! but not `v1x2x3`.

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// A compiled filter pattern. Matching is anchored at both ends.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FilterPattern {
    source: String,
    regex: Regex,
}

impl FilterPattern {
    pub fn new(pattern: impl Into<String>) -> Result<Self> {
        let source = pattern.into();
        if source.is_empty() {
            return Err(Error::InvalidInput("empty filter pattern".to_string()));
        }
        let translated = translate(&source)?;
        let regex = Regex::new(&translated).map_err(|e| {
            Error::InvalidInput(format!("invalid filter pattern '{}': {}", source, e))
        })?;
        Ok(Self { source, regex })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn matches(&self, candidate: &str) -> bool {
        self.regex.is_match(candidate)
    }
}

/// True if any pattern in the list matches.
pub fn matches_any(patterns: &[FilterPattern], candidate: &str) -> bool {
    patterns.iter().any(|p| p.matches(candidate))
}

impl PartialEq for FilterPattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl Eq for FilterPattern {}

impl std::fmt::Display for FilterPattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.source)
    }
}

impl TryFrom<String> for FilterPattern {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<FilterPattern> for String {
    fn from(pattern: FilterPattern) -> Self {
        pattern.source
    }
}

fn translate(pattern: &str) -> Result<String> {
    let mut out = String::with_capacity(pattern.len() * 2 + 2);
    out.push('^');

    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' => {
                if chars.peek() == Some(&'*') {
                    chars.next();
                    out.push_str(".*");
                } else {
                    out.push_str("[^/]*");
                }
            }
            '?' | '+' => {
                if out.len() == 1 {
                    return Err(Error::InvalidInput(format!(
                        "filter pattern '{}' starts with a quantifier",
                        pattern
                    )));
                }
                out.push(c);
            }
            '[' => {
                out.push('[');
                let mut closed = false;
                for inner in chars.by_ref() {
                    if inner == ']' {
                        closed = true;
                        break;
                    }
                    if inner == '\\' || inner == '[' {
                        out.push('\\');
                    }
                    out.push(inner);
                }
                if !closed {
                    return Err(Error::InvalidInput(format!(
                        "unterminated character class in '{}'",
                        pattern
                    )));
                }
                out.push(']');
            }
            other => out.push_str(&regex::escape(&other.to_string())),
        }
    }

    out.push('$');
    Ok(out)
}
