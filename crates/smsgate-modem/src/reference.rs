//! Concatenation reference counter
//!
//! Multipart sends share one 8-bit reference. The counter wraps 0-255 and
//! is owned per session, optionally persisted so references keep advancing
//! across restarts.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::Result;

/// Source of message references
pub trait ReferenceStore: Send {
    /// Allocate the next reference
    fn next(&mut self) -> Result<u8>;
}

/// In-process counter starting at a random value
#[derive(Debug, Clone)]
pub struct MemoryReferenceStore {
    current: u8,
}

impl MemoryReferenceStore {
    /// Counter with a random starting point
    pub fn new() -> Self {
        Self::starting_at(rand::random())
    }

    /// Counter whose first allocation is `first`
    pub fn starting_at(first: u8) -> Self {
        Self {
            current: first.wrapping_sub(1),
        }
    }
}

impl Default for MemoryReferenceStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ReferenceStore for MemoryReferenceStore {
    fn next(&mut self) -> Result<u8> {
        self.current = self.current.wrapping_add(1);
        Ok(self.current)
    }
}

/// Counter persisted to a file after every allocation
///
/// The file holds the last allocated reference as decimal text. A missing
/// or unreadable file starts the counter at a random value.
#[derive(Debug, Clone)]
pub struct FileReferenceStore {
    path: PathBuf,
    current: u8,
}

impl FileReferenceStore {
    /// Open (or start) the counter stored at `path`
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let current = match fs::read_to_string(&path) {
            Ok(text) => match text.trim().parse::<u8>() {
                Ok(value) => value,
                Err(_) => {
                    warn!(path = %path.display(), "invalid reference file, starting over");
                    rand::random()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => rand::random(),
            Err(e) => return Err(e.into()),
        };
        debug!(path = %path.display(), current, "reference counter loaded");
        Ok(Self { path, current })
    }

    /// Backing file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ReferenceStore for FileReferenceStore {
    fn next(&mut self) -> Result<u8> {
        let next = self.current.wrapping_add(1);
        fs::write(&self.path, next.to_string())?;
        self.current = next;
        Ok(next)
    }
}

/// Store for a configured path, or an in-memory one
pub fn open_store(path: Option<&Path>) -> Result<Box<dyn ReferenceStore>> {
    Ok(match path {
        Some(path) => Box::new(FileReferenceStore::open(path)?),
        None => Box::new(MemoryReferenceStore::new()),
    })
}
