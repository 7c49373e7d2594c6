//! File access provider with root boundary validation.
//!
//! All paths handed to a provider have already been resolved against a
//! configured content root. [`LocalFiles`] still canonicalizes and checks
//! every path against its allowed roots before touching the filesystem, so
//! a misconfigured root mapping cannot reach outside the workspace.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use protocol::FileSystemFailure;

/// Filesystem operations consumed by the session core.
///
/// Calls are synchronous from the core's perspective; failures are
/// returned as values and wrapped onto the response path, never raised.
pub trait FileAccess: Send {
    /// Read the full content of a file.
    fn read(&self, file: &Path) -> Result<Vec<u8>, FileSystemFailure>;

    /// Write content to a file, creating it if absent.
    fn write(&self, file: &Path, content: &[u8]) -> Result<(), FileSystemFailure>;

    /// Create an empty file. Fails if the file already exists.
    fn create_file(&self, file: &Path) -> Result<(), FileSystemFailure>;

    /// Create a directory. Fails if the directory already exists.
    fn create_directory(&self, dir: &Path) -> Result<(), FileSystemFailure>;
}

/// On-disk file access with path validation.
///
/// Every path is canonicalized and checked against the allowed roots
/// before any operation, preventing traversal through symlinks or stray
/// `..` components. An empty root list allows all paths.
pub struct LocalFiles {
    /// Roots that operations must stay within. Empty means unrestricted.
    allowed_roots: Vec<PathBuf>,
}

impl LocalFiles {
    /// Create a provider confined to the given roots.
    pub fn new(allowed_roots: Vec<PathBuf>) -> Self {
        Self { allowed_roots }
    }

    /// Create a provider that allows all paths.
    pub fn allow_all() -> Self {
        Self {
            allowed_roots: Vec::new(),
        }
    }

    /// Check a canonical path against the allowed roots.
    fn check_boundary(&self, canonical: &Path) -> Result<(), FileSystemFailure> {
        if self.allowed_roots.is_empty() {
            return Ok(());
        }
        for root in &self.allowed_roots {
            let root_canonical = match fs::canonicalize(root) {
                Ok(p) => p,
                Err(_) => continue,
            };
            if canonical.starts_with(&root_canonical) {
                return Ok(());
            }
        }
        Err(FileSystemFailure::OutsideRoot)
    }

    /// Validate a path that must already exist.
    ///
    /// Canonicalizes to resolve symlinks and `..` components, then checks
    /// the result against the allowed roots.
    fn validate_existing(&self, path: &Path) -> Result<PathBuf, FileSystemFailure> {
        let canonical = fs::canonicalize(path).map_err(FileSystemFailure::from)?;
        self.check_boundary(&canonical)?;
        Ok(canonical)
    }

    /// Validate a path that may not exist yet.
    ///
    /// The parent directory must exist and be within bounds; the final
    /// component is appended to the canonicalized parent.
    fn validate_for_creation(&self, path: &Path) -> Result<PathBuf, FileSystemFailure> {
        let parent = path.parent().ok_or(FileSystemFailure::OutsideRoot)?;
        let file_name = path.file_name().ok_or(FileSystemFailure::OutsideRoot)?;
        let parent_canonical = fs::canonicalize(parent).map_err(FileSystemFailure::from)?;
        self.check_boundary(&parent_canonical)?;
        Ok(parent_canonical.join(file_name))
    }
}

impl FileAccess for LocalFiles {
    fn read(&self, file: &Path) -> Result<Vec<u8>, FileSystemFailure> {
        let canonical = self.validate_existing(file)?;
        fs::read(canonical).map_err(FileSystemFailure::from)
    }

    fn write(&self, file: &Path, content: &[u8]) -> Result<(), FileSystemFailure> {
        let target = if file.exists() {
            self.validate_existing(file)?
        } else {
            self.validate_for_creation(file)?
        };
        fs::write(target, content).map_err(FileSystemFailure::from)
    }

    fn create_file(&self, file: &Path) -> Result<(), FileSystemFailure> {
        let target = self.validate_for_creation(file)?;
        fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(target)
            .map(|_| ())
            .map_err(FileSystemFailure::from)
    }

    fn create_directory(&self, dir: &Path) -> Result<(), FileSystemFailure> {
        let target = self.validate_for_creation(dir)?;
        fs::create_dir(target).map_err(FileSystemFailure::from)
    }
}

/// Entry in the in-memory filesystem.
#[derive(Debug, Clone)]
enum MemoryEntry {
    File(Vec<u8>),
    Directory,
}

/// In-memory file access provider.
///
/// Used by the session core tests and useful for embedding the daemon in
/// environments without a real filesystem. Paths are compared verbatim;
/// no parent-directory bookkeeping is performed.
#[derive(Debug, Default)]
pub struct MemoryFiles {
    entries: Mutex<HashMap<PathBuf, MemoryEntry>>,
}

impl MemoryFiles {
    /// Create an empty in-memory filesystem.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a file with content, replacing any previous entry.
    pub fn insert(&self, path: impl Into<PathBuf>, content: impl Into<Vec<u8>>) {
        self.entries
            .lock()
            .unwrap()
            .insert(path.into(), MemoryEntry::File(content.into()));
    }

    /// Whether a file exists with exactly this content.
    pub fn contains(&self, path: &Path, content: &[u8]) -> bool {
        matches!(
            self.entries.lock().unwrap().get(path),
            Some(MemoryEntry::File(existing)) if existing == content
        )
    }
}

impl FileAccess for MemoryFiles {
    fn read(&self, file: &Path) -> Result<Vec<u8>, FileSystemFailure> {
        match self.entries.lock().unwrap().get(file) {
            Some(MemoryEntry::File(content)) => Ok(content.clone()),
            Some(MemoryEntry::Directory) => Err(FileSystemFailure::Io(
                "is a directory".to_string(),
            )),
            None => Err(FileSystemFailure::NotFound),
        }
    }

    fn write(&self, file: &Path, content: &[u8]) -> Result<(), FileSystemFailure> {
        let mut entries = self.entries.lock().unwrap();
        if matches!(entries.get(file), Some(MemoryEntry::Directory)) {
            return Err(FileSystemFailure::Io("is a directory".to_string()));
        }
        entries.insert(file.to_path_buf(), MemoryEntry::File(content.to_vec()));
        Ok(())
    }

    fn create_file(&self, file: &Path) -> Result<(), FileSystemFailure> {
        let mut entries = self.entries.lock().unwrap();
        if entries.contains_key(file) {
            return Err(FileSystemFailure::AlreadyExists);
        }
        entries.insert(file.to_path_buf(), MemoryEntry::File(Vec::new()));
        Ok(())
    }

    fn create_directory(&self, dir: &Path) -> Result<(), FileSystemFailure> {
        let mut entries = self.entries.lock().unwrap();
        if entries.contains_key(dir) {
            return Err(FileSystemFailure::AlreadyExists);
        }
        entries.insert(dir.to_path_buf(), MemoryEntry::Directory);
        Ok(())
    }
}
