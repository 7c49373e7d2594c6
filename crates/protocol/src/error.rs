//! Error types carried on protocol response paths.
//!
//! All failures are tagged values returned to the requesting client. The
//! daemon's session core never crashes on a collaborator failure; it wraps
//! the failure and keeps processing.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::path::RootId;

/// I/O-level failure reported by the file access provider.
///
/// The session core treats these as opaque: it wraps and forwards them
/// without inspecting the variant.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail")]
pub enum FileSystemFailure {
    /// The file or directory does not exist.
    #[error("not found")]
    NotFound,

    /// The daemon lacks permission for the operation.
    #[error("permission denied")]
    PermissionDenied,

    /// Creation target already exists.
    #[error("already exists")]
    AlreadyExists,

    /// A path component that must be a directory is not one.
    #[error("not a directory")]
    NotADirectory,

    /// The resolved path escapes its content root.
    #[error("path escapes its content root")]
    OutsideRoot,

    /// Any other I/O failure, with its message.
    #[error("io failure: {0}")]
    Io(String),
}

impl From<std::io::Error> for FileSystemFailure {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind;
        match err.kind() {
            ErrorKind::NotFound => FileSystemFailure::NotFound,
            ErrorKind::PermissionDenied => FileSystemFailure::PermissionDenied,
            ErrorKind::AlreadyExists => FileSystemFailure::AlreadyExists,
            ErrorKind::NotADirectory => FileSystemFailure::NotADirectory,
            _ => FileSystemFailure::Io(err.to_string()),
        }
    }
}

/// Failure of a file operation: either the content root could not be
/// resolved, or the file access provider failed.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail")]
pub enum OperationError {
    /// The named content root is not configured.
    #[error("content root not found: {root}")]
    RootNotFound {
        /// The unresolvable root name.
        root: RootId,
    },

    /// The file access provider reported a failure.
    #[error("filesystem: {0}")]
    FileSystem(#[from] FileSystemFailure),
}
