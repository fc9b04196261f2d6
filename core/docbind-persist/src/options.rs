//! Options of the entity manager operations.

use crate::graph::Depth;

/// Options for `load`, `load_by_id` and `refresh`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadOptions {
    /// How far referenced entities are loaded too.
    pub depth: Depth,
    /// Fetch from the server even if the cached version may be current.
    pub refresh: bool,
}

impl LoadOptions {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn depth(mut self, depth: impl Into<Depth>) -> Self {
        self.depth = depth.into();
        self
    }

    #[must_use]
    pub fn refresh(mut self, refresh: bool) -> Self {
        self.refresh = refresh;
        self
    }
}

/// Options for `insert`, `update` and `save`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SaveOptions {
    pub depth: Depth,
    /// Skip the version precondition and overwrite the stored object.
    pub force: bool,
    /// Replace local fields with the server's answer instead of only
    /// taking over its metadata.
    pub refresh: bool,
}

impl SaveOptions {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn depth(mut self, depth: impl Into<Depth>) -> Self {
        self.depth = depth.into();
        self
    }

    #[must_use]
    pub fn force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    #[must_use]
    pub fn refresh(mut self, refresh: bool) -> Self {
        self.refresh = refresh;
        self
    }
}

/// Options for `delete`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeleteOptions {
    pub depth: Depth,
    /// Delete without a version precondition.
    pub force: bool,
}

impl DeleteOptions {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn depth(mut self, depth: impl Into<Depth>) -> Self {
        self.depth = depth.into();
        self
    }

    #[must_use]
    pub fn force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }
}

/// Verdict of an optimistic-save modifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreSave {
    /// Save the modified entity.
    Proceed,
    /// Stop without saving; the entity is returned as is.
    Abort,
}
