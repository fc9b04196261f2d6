//! Entity lifecycle state machine.

use crate::Error;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of a managed entity relative to its server copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lifecycle {
    /// The instance exists but no server data is known yet.
    Unavailable,
    /// Matches the last fetched or written server snapshot.
    Persistent,
    /// A local mutation is pending.
    Dirty,
    /// The server copy is gone or was deleted locally. Terminal.
    Removed,
}

impl Lifecycle {
    /// Whether moving from `self` to `to` is a legal transition.
    ///
    /// `Removed` only accepts `Removed`; `Unavailable` cannot become dirty
    /// because its fields are not readable or writable yet.
    pub fn can_transition_to(self, to: Lifecycle) -> bool {
        use Lifecycle::*;
        match (self, to) {
            (Removed, Removed) => true,
            (Removed, _) => false,
            (_, Removed) => true,
            (Unavailable, Dirty) => false,
            (_, Persistent) => true,
            (Persistent | Dirty, Dirty) => true,
            (Unavailable, Unavailable) => true,
            (Persistent | Dirty, Unavailable) => false,
        }
    }

    /// Returns `to` if the transition is legal.
    pub fn transition(self, to: Lifecycle) -> Result<Lifecycle, Error> {
        if self.can_transition_to(to) {
            Ok(to)
        } else {
            Err(Error::InvalidTransition { from: self, to })
        }
    }

    /// Whether the server snapshot is known (fields are readable).
    pub fn is_available(self) -> bool {
        matches!(self, Lifecycle::Persistent | Lifecycle::Dirty)
    }
}

impl fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Lifecycle::Unavailable => "UNAVAILABLE",
            Lifecycle::Persistent => "PERSISTENT",
            Lifecycle::Dirty => "DIRTY",
            Lifecycle::Removed => "REMOVED",
        };
        f.write_str(name)
    }
}
