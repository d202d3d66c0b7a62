//! Ring Write-Ahead Log
//!
//! A durable, bounded, append-only byte log backed by a directory of
//! fixed-size segment files. Logical byte offsets grow monotonically
//! forever; physical storage is a ring of `capacity` bytes, so the oldest
//! bytes are overwritten as new bytes arrive. A running checksum covers
//! every byte ever appended, which lets a reader prove that a prefix it
//! holds is consistent with the log's history.

pub mod crc;
mod meta;
mod ring;
mod segment;

pub use crc::crc64;
pub use ring::{CksmFn, RingWal, RingWalOptions};

use std::path::{Path, PathBuf};

/// WAL directory structure
pub(crate) struct WalPaths {
    pub base_dir: PathBuf,
    pub prefix: String,
}

impl WalPaths {
    pub fn new(base_dir: &Path, prefix: &str) -> Self {
        Self {
            base_dir: base_dir.to_path_buf(),
            prefix: prefix.to_string(),
        }
    }

    /// Get path for a specific ring segment file
    pub fn segment_path(&self, index: usize) -> PathBuf {
        self.base_dir
            .join(format!("{}_{:05}.log", self.prefix, index))
    }

    /// Get path for the metadata file
    pub fn meta_path(&self) -> PathBuf {
        self.base_dir.join(format!("{}.meta", self.prefix))
    }

    /// Ensure the WAL directory exists
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.base_dir)
    }
}
