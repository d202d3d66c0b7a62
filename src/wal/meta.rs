//! WAL Metadata Persistence
//!
//! The meta file records the log's durable position (start and end
//! offsets plus the running checksum), the ring geometry, and the inline
//! user-meta area the embedder owns. It is rewritten atomically (temp
//! file + rename) so a crash mid-write leaves the previous record intact.

use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::Path;

use crate::error::{Error, Result};

/// Magic bytes at the start of the meta file
const META_MAGIC: &[u8; 8] = b"WOLFCWAL";

/// Meta file format version
const META_VERSION: u32 = 1;

/// Fixed header size in bytes (user meta follows)
const HEADER_SIZE: usize = 52;

/// Recovered / persisted WAL metadata
#[derive(Debug, Clone)]
pub(crate) struct WalMeta {
    /// Ring capacity the log was written with
    pub capacity: u64,
    /// Smallest logical offset still physically retained
    pub start_offset: u64,
    /// Next logical offset to be written
    pub end_offset: u64,
    /// Running checksum over every byte ever appended
    pub cksm: u64,
    /// Embedder-owned inline metadata
    pub user_meta: Vec<u8>,
}

impl WalMeta {
    /// Fresh metadata for a newly created log
    pub fn fresh(capacity: u64, user_meta_size: usize) -> Self {
        Self {
            capacity,
            start_offset: 0,
            end_offset: 0,
            cksm: 0,
            user_meta: vec![0u8; user_meta_size],
        }
    }

    fn header_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut bytes = [0u8; HEADER_SIZE];
        bytes[0..8].copy_from_slice(META_MAGIC);
        bytes[8..12].copy_from_slice(&META_VERSION.to_le_bytes());
        bytes[12..20].copy_from_slice(&self.capacity.to_le_bytes());
        bytes[20..24].copy_from_slice(&(self.user_meta.len() as u32).to_le_bytes());
        bytes[24..32].copy_from_slice(&self.start_offset.to_le_bytes());
        bytes[32..40].copy_from_slice(&self.end_offset.to_le_bytes());
        bytes[40..48].copy_from_slice(&self.cksm.to_le_bytes());
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&bytes[0..48]);
        hasher.update(&self.user_meta);
        bytes[48..52].copy_from_slice(&hasher.finalize().to_le_bytes());
        bytes
    }

    /// Persist atomically to `path`
    pub fn store(&self, path: &Path) -> Result<()> {
        let tmp = path.with_extension("meta.tmp");
        {
            let mut file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&tmp)?;
            file.write_all(&self.header_bytes())?;
            file.write_all(&self.user_meta)?;
            file.sync_all()?;
        }
        std::fs::rename(&tmp, path)?;
        if let Some(dir) = path.parent() {
            File::open(dir)?.sync_all()?;
        }
        Ok(())
    }

    /// Load and validate from `path`
    pub fn load(path: &Path) -> Result<Self> {
        let mut file = File::open(path)?;
        let mut header = [0u8; HEADER_SIZE];
        file.read_exact(&mut header)
            .map_err(|_| Error::WalCorrupted("meta file truncated".into()))?;

        if &header[0..8] != META_MAGIC {
            return Err(Error::WalCorrupted("bad meta magic".into()));
        }
        let version = u32::from_le_bytes(header[8..12].try_into().unwrap());
        if version != META_VERSION {
            return Err(Error::WalCorrupted(format!(
                "unsupported meta version {version}"
            )));
        }

        let user_meta_size = u32::from_le_bytes(header[20..24].try_into().unwrap()) as usize;
        let mut user_meta = vec![0u8; user_meta_size];
        file.read_exact(&mut user_meta)
            .map_err(|_| Error::WalCorrupted("user meta truncated".into()))?;

        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&header[0..48]);
        hasher.update(&user_meta);
        let stored = u32::from_le_bytes(header[48..52].try_into().unwrap());
        if hasher.finalize() != stored {
            return Err(Error::WalCorrupted("meta checksum mismatch".into()));
        }

        Ok(Self {
            capacity: u64::from_le_bytes(header[12..20].try_into().unwrap()),
            start_offset: u64::from_le_bytes(header[24..32].try_into().unwrap()),
            end_offset: u64::from_le_bytes(header[32..40].try_into().unwrap()),
            cksm: u64::from_le_bytes(header[40..48].try_into().unwrap()),
            user_meta,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_store_load_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("wal.meta");

        let mut meta = WalMeta::fresh(4096, 128);
        meta.start_offset = 100;
        meta.end_offset = 4196;
        meta.cksm = 0xfeedface;
        meta.user_meta[0] = 0xab;
        meta.store(&path).unwrap();

        let loaded = WalMeta::load(&path).unwrap();
        assert_eq!(loaded.capacity, 4096);
        assert_eq!(loaded.start_offset, 100);
        assert_eq!(loaded.end_offset, 4196);
        assert_eq!(loaded.cksm, 0xfeedface);
        assert_eq!(loaded.user_meta.len(), 128);
        assert_eq!(loaded.user_meta[0], 0xab);
    }

    #[test]
    fn test_corrupted_meta_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("wal.meta");

        let meta = WalMeta::fresh(4096, 64);
        meta.store(&path).unwrap();

        let mut bytes = std::fs::read(&path).unwrap();
        bytes[30] ^= 0xff;
        std::fs::write(&path, &bytes).unwrap();

        assert!(matches!(
            WalMeta::load(&path),
            Err(Error::WalCorrupted(_))
        ));
    }

    #[test]
    fn test_bad_magic_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("wal.meta");
        std::fs::write(&path, vec![0u8; 128]).unwrap();
        assert!(matches!(WalMeta::load(&path), Err(Error::WalCorrupted(_))));
    }
}
