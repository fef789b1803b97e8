//! Configuration path parsing.
//!
//! Paths are delimiter-separated strings like "ses:minions:mon". The default
//! delimiter is `:`. The empty string is reserved for the root and is never a
//! valid path to read or write; it is only used as a listener key.

use crate::error::{Result, TreeError};

/// Default segment delimiter.
pub const DEFAULT_DELIMITER: char = ':';

/// Listener key of the root map.
pub const ROOT_PATH: &str = "";

/// A parsed configuration path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PathKey {
    /// Path segments, root first
    segments: Vec<String>,
    delimiter: char,
}

impl PathKey {
    /// Parse a path string using the default delimiter.
    pub fn parse(path: &str) -> Result<Self> {
        Self::parse_with(path, DEFAULT_DELIMITER)
    }

    /// Parse a path string using `delimiter`.
    ///
    /// Fails with [`TreeError::InvalidPath`] if the string is empty or any
    /// segment is empty (`"a::b"`, `":a"`, `"a:"`).
    pub fn parse_with(path: &str, delimiter: char) -> Result<Self> {
        if path.is_empty() {
            return Err(TreeError::InvalidPath {
                path: path.to_string(),
                reason: "path must not be empty",
            });
        }

        let segments: Vec<String> = path.split(delimiter).map(String::from).collect();
        if segments.iter().any(String::is_empty) {
            return Err(TreeError::InvalidPath {
                path: path.to_string(),
                reason: "path segments must not be empty",
            });
        }

        Ok(Self {
            segments,
            delimiter,
        })
    }

    /// The root path (no segments).
    pub fn root(delimiter: char) -> Self {
        Self {
            segments: Vec::new(),
            delimiter,
        }
    }

    /// Build a path from already validated segments.
    pub(crate) fn from_segments(segments: Vec<String>, delimiter: char) -> Self {
        Self {
            segments,
            delimiter,
        }
    }

    /// Get the path segments.
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn delimiter(&self) -> char {
        self.delimiter
    }

    /// Last segment, `None` for the root.
    pub fn last(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    /// This path extended by one segment.
    pub fn child(&self, segment: &str) -> PathKey {
        let mut segments = self.segments.clone();
        segments.push(segment.to_string());
        Self {
            segments,
            delimiter: self.delimiter,
        }
    }

    /// The enclosing path, `None` for the root.
    pub fn parent(&self) -> Option<PathKey> {
        let (_, init) = self.segments.split_last()?;
        Some(Self {
            segments: init.to_vec(),
            delimiter: self.delimiter,
        })
    }

    /// The first `len` segments of this path.
    pub fn prefix(&self, len: usize) -> PathKey {
        Self {
            segments: self.segments[..len.min(self.segments.len())].to_vec(),
            delimiter: self.delimiter,
        }
    }

    /// Check if this path starts with a given prefix.
    pub fn starts_with(&self, prefix: &PathKey) -> bool {
        if prefix.segments.len() > self.segments.len() {
            return false;
        }
        self.segments
            .iter()
            .zip(prefix.segments.iter())
            .all(|(a, b)| a == b)
    }
}

impl std::fmt::Display for PathKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", join(&self.segments, self.delimiter))
    }
}

/// Join segments into a path string. The inverse of [`PathKey::parse_with`];
/// an empty slice yields [`ROOT_PATH`].
pub fn join<S: AsRef<str>>(segments: &[S], delimiter: char) -> String {
    let mut out = String::new();
    for (i, segment) in segments.iter().enumerate() {
        if i > 0 {
            out.push(delimiter);
        }
        out.push_str(segment.as_ref());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_parsing() {
        let path = PathKey::parse("ses:minions:mon").unwrap();
        assert_eq!(path.segments(), &["ses", "minions", "mon"]);
        assert_eq!(path.to_string(), "ses:minions:mon");
    }

    #[test]
    fn test_single_segment() {
        let path = PathKey::parse("ses").unwrap();
        assert_eq!(path.len(), 1);
        assert_eq!(path.last(), Some("ses"));
        assert!(path.parent().unwrap().is_root());
    }

    #[test]
    fn test_empty_path_rejected() {
        let err = PathKey::parse("").unwrap_err();
        assert!(matches!(err, TreeError::InvalidPath { .. }));
    }

    #[test]
    fn test_empty_segment_rejected() {
        for path in ["a::b", ":a", "a:", ":"] {
            let err = PathKey::parse(path).unwrap_err();
            assert!(
                matches!(err, TreeError::InvalidPath { .. }),
                "{path} should be rejected"
            );
        }
    }

    #[test]
    fn test_custom_delimiter() {
        let path = PathKey::parse_with("a.b:c", '.').unwrap();
        assert_eq!(path.segments(), &["a", "b:c"]);
        assert_eq!(path.to_string(), "a.b:c");
    }

    #[test]
    fn test_join_root() {
        let empty: [&str; 0] = [];
        assert_eq!(join(&empty, ':'), ROOT_PATH);
        assert_eq!(PathKey::root(':').to_string(), ROOT_PATH);
    }

    #[test]
    fn test_child_and_prefix() {
        let path = PathKey::parse("a:b").unwrap().child("c");
        assert_eq!(path.to_string(), "a:b:c");
        assert_eq!(path.prefix(2).to_string(), "a:b");
        assert_eq!(path.prefix(10), path);
    }

    #[test]
    fn test_path_starts_with() {
        let path = PathKey::parse("ses:minions:all").unwrap();
        let prefix = PathKey::parse("ses").unwrap();
        assert!(path.starts_with(&prefix));

        let non_prefix = PathKey::parse("cephadm").unwrap();
        assert!(!path.starts_with(&non_prefix));
    }
}
