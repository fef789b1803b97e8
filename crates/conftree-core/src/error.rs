//! Errors returned by tree operations.

/// Errors that can occur when reading or mutating a [`ConfigTree`](crate::ConfigTree).
#[derive(Debug, thiserror::Error)]
pub enum TreeError {
    /// The path string is empty or contains an empty segment.
    #[error("invalid path '{path}': {reason}")]
    InvalidPath { path: String, reason: &'static str },

    /// A segment is missing and no load provider resolves it.
    #[error("key '{path}' does not exist")]
    KeyNotFound { path: String },

    /// Lookup of `key` on a map that a later write replaced.
    #[error("key '{key}' does not exist in a detached map")]
    DetachedKeyNotFound { key: String },

    /// A load provider read its own path while it was being loaded.
    #[error("load provider for '{path}' re-entered its own path")]
    ReentrantLoad { path: String },

    /// Traversal hit a scalar or a list while segments remained.
    #[error("'{path}' is not a map")]
    NotATraversableNode { path: String },

    /// `remove` found no structurally equal element.
    #[error("value not found in list '{path}'")]
    NotFound { path: String },

    /// `pop` or `insert` with an index outside the list.
    #[error("index {index} out of range for list '{path}' of length {len}")]
    IndexOutOfRange {
        path: String,
        index: usize,
        len: usize,
    },

    /// The root load provider returned something other than a map.
    #[error("root load provider must return a map, got {kind}")]
    RootNotAMap { kind: &'static str },

    /// Error raised by a load provider or store observer.
    #[error(transparent)]
    Listener(#[from] anyhow::Error),
}

impl TreeError {
    /// True for [`TreeError::KeyNotFound`] and [`TreeError::DetachedKeyNotFound`].
    pub fn is_key_not_found(&self) -> bool {
        matches!(
            self,
            TreeError::KeyNotFound { .. } | TreeError::DetachedKeyNotFound { .. }
        )
    }
}

pub type Result<T, E = TreeError> = std::result::Result<T, E>;
