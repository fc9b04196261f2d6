//! Identifier types used throughout docbind.
//!
//! Object identifiers name an entity's server location and have the shape
//! `/db/<bucket>/<key>` where the key is URL-encoded. Generated keys are
//! random UUID v4 values.

use crate::Error;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

/// Path prefix shared by every object identifier.
pub const DB_PREFIX: &str = "/db/";

/// Stable identifier of a persisted object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ObjectId {
    raw: String,
    split: usize,
}

impl ObjectId {
    /// Builds an identifier from a bucket and a raw (unencoded) key.
    pub fn new(bucket: &str, key: &str) -> Self {
        let raw = format!("{DB_PREFIX}{bucket}/{}", urlencoding::encode(key));
        let split = DB_PREFIX.len() + bucket.len();
        Self { raw, split }
    }

    /// Builds an identifier with a freshly generated random key.
    #[must_use]
    pub fn generate(bucket: &str) -> Self {
        Self::new(bucket, &Uuid::new_v4().to_string())
    }

    /// Parses an identifier of the form `/db/<bucket>/<key>`.
    pub fn parse(s: &str) -> Result<Self, Error> {
        let rest = s
            .strip_prefix(DB_PREFIX)
            .ok_or_else(|| Error::InvalidIdentifier(s.to_string()))?;
        let slash = rest
            .find('/')
            .ok_or_else(|| Error::InvalidIdentifier(s.to_string()))?;
        if slash == 0 || slash + 1 == rest.len() {
            return Err(Error::InvalidIdentifier(s.to_string()));
        }
        Ok(Self {
            raw: s.to_string(),
            split: DB_PREFIX.len() + slash,
        })
    }

    /// The bucket (entity type name) part.
    pub fn bucket(&self) -> &str {
        &self.raw[DB_PREFIX.len()..self.split]
    }

    /// The key as it appears on the wire (URL-encoded).
    pub fn key(&self) -> &str {
        &self.raw[self.split + 1..]
    }

    /// The decoded key. Falls back to the encoded form if it is not valid UTF-8.
    pub fn decoded_key(&self) -> String {
        urlencoding::decode(self.key())
            .map(|k| k.into_owned())
            .unwrap_or_else(|_| self.key().to_string())
    }

    /// The full identifier string.
    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl FromStr for ObjectId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ObjectId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ObjectId> for String {
    fn from(id: ObjectId) -> Self {
        id.raw
    }
}

/// Identifies one persistence context (entity manager) within the process.
///
/// Entity states carry the id of the context that manages them; comparing
/// ids replaces comparing context pointers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextId(u64);

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

impl ContextId {
    /// Allocates a new process-unique context id.
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the numeric value.
    #[must_use]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctx-{}", self.0)
    }
}
