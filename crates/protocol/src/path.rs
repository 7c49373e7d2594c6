//! Workspace path addressing.
//!
//! Files are addressed relative to a named content root rather than by
//! absolute filesystem path. The daemon resolves the root name against its
//! configuration; clients never see absolute paths.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors produced when constructing a workspace path.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PathError {
    /// The root name is empty.
    #[error("root name is empty")]
    EmptyRoot,

    /// A segment is empty or contains a path separator or traversal
    /// component.
    #[error("invalid path segment: {0:?}")]
    InvalidSegment(String),
}

/// Name of a configured content root.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RootId(String);

impl RootId {
    /// Construct a root id from its name.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The root name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RootId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A file location: a content root plus a relative segment sequence.
///
/// Segments are validated on construction so that a workspace path can
/// never name anything outside its root: no empty segments, no `.` or
/// `..`, no separators inside a segment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkspacePath {
    root: RootId,
    segments: Vec<String>,
}

impl WorkspacePath {
    /// Construct a validated workspace path.
    pub fn new<S: Into<String>>(
        root: RootId,
        segments: impl IntoIterator<Item = S>,
    ) -> Result<Self, PathError> {
        if root.as_str().is_empty() {
            return Err(PathError::EmptyRoot);
        }
        let segments: Vec<String> = segments.into_iter().map(Into::into).collect();
        for segment in &segments {
            if segment.is_empty()
                || segment == "."
                || segment == ".."
                || segment.contains('/')
                || segment.contains('\\')
            {
                return Err(PathError::InvalidSegment(segment.clone()));
            }
        }
        Ok(Self { root, segments })
    }

    /// The content root this path belongs to.
    pub fn root(&self) -> &RootId {
        &self.root
    }

    /// The relative segments under the root.
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// The relative portion as a filesystem path.
    pub fn relative(&self) -> PathBuf {
        self.segments.iter().collect()
    }
}

impl fmt::Display for WorkspacePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.root, self.segments.join("/"))
    }
}
