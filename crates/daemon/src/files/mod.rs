//! File access collaborators.
//!
//! The session core performs all file I/O through the [`FileAccess`]
//! trait; [`LocalFiles`] is the on-disk implementation and
//! [`MemoryFiles`] an in-memory one for tests and embedding.

mod access;

pub use access::{FileAccess, LocalFiles, MemoryFiles};
