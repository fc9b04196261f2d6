//! Opaque version tokens.
//!
//! A version names the last server revision a client has seen. It is sent
//! back in `if-match` / `if-none-match` headers; the `*` wildcard matches any
//! revision and is used for forced writes.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque revision token of a persisted object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Version(String);

impl Version {
    /// The wildcard token matching any revision.
    pub const WILDCARD: &'static str = "*";

    /// Wraps a token.
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// The wildcard version (`*`).
    #[must_use]
    pub fn any() -> Self {
        Self(Self::WILDCARD.to_string())
    }

    /// Whether this is the `*` wildcard.
    pub fn is_wildcard(&self) -> bool {
        self.0 == Self::WILDCARD
    }

    /// The raw token.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Formats the token for a conditional header: quoted, except the wildcard.
    pub fn to_header_value(&self) -> String {
        if self.is_wildcard() {
            self.0.clone()
        } else {
            format!("\"{}\"", self.0)
        }
    }

    /// Parses an ETag-style header value, stripping a weak prefix and quotes.
    /// Returns `None` for an empty value.
    pub fn from_header_value(value: &str) -> Option<Self> {
        let value = value.trim();
        let value = value.strip_prefix("W/").unwrap_or(value);
        let value = value
            .strip_prefix('"')
            .and_then(|v| v.strip_suffix('"'))
            .unwrap_or(value);
        if value.is_empty() {
            None
        } else {
            Some(Self(value.to_string()))
        }
    }

    /// Reads a version from a JSON value; servers send either strings or numbers.
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::String(s) if !s.is_empty() => Some(Self(s.clone())),
            serde_json::Value::Number(n) => Some(Self(n.to_string())),
            _ => None,
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Version {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}
