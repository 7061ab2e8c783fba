// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Per-Tag Event Log Storage
//!
//! One directory per cache, one append-only log file per tag.
//!
//! # Guarantees
//! - Appends are durable before returning
//! - Reading a tag that was never written is an empty sequence, not an error
//! - Cursors may be opened while a log is still being appended to
//! - `cleanup` removes every tag's log at once; replay determinism requires
//!   all tags to restart from the same origin instant

pub mod cursor;
pub mod writer;

pub use cursor::{CompletionProbe, CursorError, LogCursor, ReadMode};
pub use writer::{LogWriter, WriteError};

use crate::event::{ReplayEvent, Tag};
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Write error: {0}")]
    Write(#[from] WriteError),

    #[error("Invalid tag {0:?}: tags are used as log file names")]
    InvalidTag(String),
}

pub type Result<T> = std::result::Result<T, StorageError>;

/// Rejects names that would escape the cache directory.
pub(crate) fn validate_path_component(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains('/')
        && !name.contains('\\')
}

/// Owns the on-disk cache directory and the per-tag logs inside it.
///
/// When no directory is configured a temporary one is created and removed
/// when the `CacheDir` is dropped.
pub struct CacheDir {
    root: PathBuf,
    _temp: Option<TempDir>,
}

impl CacheDir {
    pub fn new(dir: Option<PathBuf>) -> Result<Self> {
        match dir {
            Some(root) => {
                std::fs::create_dir_all(&root)?;
                Ok(Self { root, _temp: None })
            }
            None => {
                let temp = tempfile::Builder::new().prefix("rewind-capture-").tempdir()?;
                Ok(Self {
                    root: temp.path().to_path_buf(),
                    _temp: Some(temp),
                })
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    fn log_path(&self, tag: &Tag) -> Result<PathBuf> {
        if !validate_path_component(tag.as_str()) {
            return Err(StorageError::InvalidTag(tag.as_str().to_owned()));
        }
        Ok(self.root.join(tag.as_str()))
    }

    /// True once the tag has received its first append.
    pub fn exists(&self, tag: &Tag) -> bool {
        self.log_path(tag).map(|p| p.exists()).unwrap_or(false)
    }

    /// Durably appends `events` in order, creating the log if absent.
    pub fn append(&self, tag: &Tag, events: &[ReplayEvent]) -> Result<()> {
        let path = self.log_path(tag)?;
        writer::append_events(path, events)?;
        Ok(())
    }

    /// Opens a forward-only cursor over the tag's log. A missing log yields
    /// an empty sequence (or, while tailing, waits for the log to appear).
    pub fn open_cursor(&self, tag: &Tag, mode: ReadMode) -> Result<LogCursor> {
        let path = self.log_path(tag)?;
        Ok(LogCursor::new(path, mode))
    }

    /// Total bytes across all logs; feeds the capture size-limit checker.
    pub fn capture_size(&self) -> u64 {
        let Ok(entries) = std::fs::read_dir(&self.root) else {
            return 0;
        };
        entries
            .filter_map(|e| e.ok())
            .filter_map(|e| e.metadata().ok())
            .filter(|m| m.is_file())
            .map(|m| m.len())
            .sum()
    }

    /// Removes every log in the cache directory. The directory itself is
    /// recreated empty so later appends start from a fresh origin.
    pub fn cleanup(&self) -> Result<()> {
        if self.root.exists() {
            std::fs::remove_dir_all(&self.root)?;
        }
        std::fs::create_dir_all(&self.root)?;
        Ok(())
    }
}
