//! Key sanitization for untrusted table cells
//!
//! Two layers guard every value that ends up in a lookup query:
//!
//! 1. **Whitelist validation** — `KeySanitizer::validate` accepts or rejects a
//!    raw cell. It never repairs input; anything outside the configured
//!    charset or length limit yields `None`.
//! 2. **Literal escaping** — `escape_literal` prepares an already-validated
//!    key for interpolation into a quoted query literal.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Default maximum key length, matching 50-character code columns
pub const DEFAULT_MAX_KEY_LEN: usize = 50;

/// Character class accepted by the sanitizer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Charset {
    /// ASCII letters, digits, hyphen, underscore
    #[default]
    Strict,
    /// Strict plus dot and space
    Relaxed,
}

impl Charset {
    fn allows(self, ch: char) -> bool {
        if ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_') {
            return true;
        }
        self == Charset::Relaxed && matches!(ch, '.' | ' ')
    }
}

/// Sanitizer policy knobs, normally read from settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SanitizerPolicy {
    /// Accepted character class
    #[serde(default)]
    pub charset: Charset,

    /// Maximum key length in characters, measured after trimming
    #[serde(default = "default_max_len")]
    pub max_len: usize,
}

fn default_max_len() -> usize {
    DEFAULT_MAX_KEY_LEN
}

impl Default for SanitizerPolicy {
    fn default() -> Self {
        Self {
            charset: Charset::Strict,
            max_len: DEFAULT_MAX_KEY_LEN,
        }
    }
}

/// A lookup key that passed whitelist validation
///
/// Only `KeySanitizer::validate` can construct one.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SanitizedKey(String);

impl SanitizedKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SanitizedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for SanitizedKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Whitelist validator for raw key cells
#[derive(Debug, Clone, Copy, Default)]
pub struct KeySanitizer {
    policy: SanitizerPolicy,
}

impl KeySanitizer {
    pub fn new(policy: SanitizerPolicy) -> Self {
        Self { policy }
    }

    pub fn strict() -> Self {
        Self::new(SanitizerPolicy::default())
    }

    pub fn relaxed() -> Self {
        Self::new(SanitizerPolicy {
            charset: Charset::Relaxed,
            ..SanitizerPolicy::default()
        })
    }

    pub fn policy(&self) -> SanitizerPolicy {
        self.policy
    }

    /// Validate a raw cell value
    ///
    /// Surrounding whitespace is trimmed; the remainder must be non-empty,
    /// within `max_len` characters, and made only of charset characters.
    /// A `None` cell is treated like an empty one.
    pub fn validate(&self, raw: Option<&str>) -> Option<SanitizedKey> {
        let trimmed = raw?.trim();
        if trimmed.is_empty() {
            return None;
        }
        if trimmed.chars().count() > self.policy.max_len {
            return None;
        }
        if !trimmed.chars().all(|ch| self.policy.charset.allows(ch)) {
            return None;
        }
        Some(SanitizedKey(trimmed.to_string()))
    }
}

/// Escape a validated key for use inside a single-quoted query literal
///
/// Doubles single quotes, escapes backslashes, and drops control characters
/// (NUL, CR, LF, and the rest of the Unicode `Cc` class). Whitelisted keys
/// contain none of these; the escaping applies regardless.
pub fn escape_literal(key: &SanitizedKey) -> String {
    escape_str(key.as_str())
}

pub(crate) fn escape_str(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '\'' => out.push_str("''"),
            '\\' => out.push_str("\\\\"),
            c if c.is_control() => {}
            c => out.push(c),
        }
    }
    out
}
