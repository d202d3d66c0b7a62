//! Ring Segment Management
//!
//! The ring's physical storage: a directory of fixed-size files whose
//! combined length equals the ring capacity. Logical offset `o` lives at
//! physical position `o % capacity`; this module maps physical positions
//! to (file, offset) pairs and handles reads and writes that straddle
//! file boundaries. Wrap-around at the capacity boundary is the caller's
//! concern.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use super::WalPaths;
use crate::error::{Error, Result};

/// Preferred size of a single ring segment file
const SEGMENT_BYTES: u64 = 16 * 1024 * 1024;

/// The set of fixed-size files backing the ring
pub(crate) struct RingSegments {
    paths: WalPaths,
    capacity: u64,
    seg_size: u64,
    files: Vec<File>,
    dirty: bool,
}

impl RingSegments {
    /// Open the ring files, creating or resizing them to the expected
    /// geometry. Files that belong to an older, larger geometry are
    /// removed.
    pub fn open(base_dir: &Path, prefix: &str, capacity: u64) -> Result<Self> {
        if capacity == 0 {
            return Err(Error::Wal("ring capacity must be positive".into()));
        }
        let paths = WalPaths::new(base_dir, prefix);
        paths.ensure_dirs()?;

        let seg_size = capacity.min(SEGMENT_BYTES);
        let count = capacity.div_ceil(seg_size) as usize;

        let mut files = Vec::with_capacity(count);
        for index in 0..count {
            let len = if index == count - 1 {
                capacity - seg_size * (count as u64 - 1)
            } else {
                seg_size
            };
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .open(paths.segment_path(index))?;
            if file.metadata()?.len() != len {
                file.set_len(len)?;
            }
            files.push(file);
        }

        remove_stale_segments(&paths, count)?;

        Ok(Self {
            paths,
            capacity,
            seg_size,
            files,
            dirty: false,
        })
    }

    /// Write `data` starting at physical position `pos`.
    /// `pos + data.len()` must not exceed the capacity.
    pub fn write_at(&mut self, pos: u64, data: &[u8]) -> Result<()> {
        debug_assert!(pos + data.len() as u64 <= self.capacity);
        let mut pos = pos;
        let mut data = data;
        while !data.is_empty() {
            let index = (pos / self.seg_size) as usize;
            let offset = pos - index as u64 * self.seg_size;
            let take = ((self.seg_len(index) - offset) as usize).min(data.len());
            let file = &mut self.files[index];
            file.seek(SeekFrom::Start(offset))?;
            file.write_all(&data[..take])?;
            pos += take as u64;
            data = &data[take..];
        }
        self.dirty = true;
        Ok(())
    }

    /// Read exactly `buf.len()` bytes starting at physical position `pos`.
    pub fn read_at(&mut self, pos: u64, buf: &mut [u8]) -> Result<()> {
        debug_assert!(pos + buf.len() as u64 <= self.capacity);
        let mut pos = pos;
        let mut buf = buf;
        while !buf.is_empty() {
            let index = (pos / self.seg_size) as usize;
            let offset = pos - index as u64 * self.seg_size;
            let take = ((self.seg_len(index) - offset) as usize).min(buf.len());
            let file = &mut self.files[index];
            file.seek(SeekFrom::Start(offset))?;
            file.read_exact(&mut buf[..take])?;
            pos += take as u64;
            buf = &mut buf[take..];
        }
        Ok(())
    }

    /// Fsync all segment files touched since the last sync
    pub fn sync(&mut self) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }
        for file in &self.files {
            file.sync_data()?;
        }
        self.dirty = false;
        Ok(())
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Length of segment `index`; only the last segment may be shorter.
    fn seg_len(&self, index: usize) -> u64 {
        if index == self.files.len() - 1 {
            self.capacity - self.seg_size * (self.files.len() as u64 - 1)
        } else {
            self.seg_size
        }
    }
}

/// Remove segment files beyond the current geometry (left over from a
/// larger previous capacity).
fn remove_stale_segments(paths: &WalPaths, count: usize) -> Result<()> {
    for entry in std::fs::read_dir(&paths.base_dir)? {
        let path = entry?.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let Some(rest) = name
            .strip_prefix(&format!("{}_", paths.prefix))
            .and_then(|r| r.strip_suffix(".log"))
        else {
            continue;
        };
        if let Ok(index) = rest.parse::<usize>() {
            if index >= count {
                tracing::warn!(file = %path.display(), "removing stale ring segment");
                std::fs::remove_file(&path)?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_write_read_roundtrip() {
        let dir = tempdir().unwrap();
        let mut segs = RingSegments::open(dir.path(), "test", 4096).unwrap();

        segs.write_at(100, b"hello ring").unwrap();
        let mut buf = [0u8; 10];
        segs.read_at(100, &mut buf).unwrap();
        assert_eq!(&buf, b"hello ring");
    }

    #[test]
    fn test_single_file_geometry() {
        let dir = tempdir().unwrap();
        let _segs = RingSegments::open(dir.path(), "small", 1024).unwrap();
        let meta = std::fs::metadata(dir.path().join("small_00000.log")).unwrap();
        assert_eq!(meta.len(), 1024);
    }

    #[test]
    fn test_cross_segment_write() {
        let dir = tempdir().unwrap();
        // Force two segments by exceeding the per-file cap
        let capacity = SEGMENT_BYTES + 4096;
        let mut segs = RingSegments::open(dir.path(), "multi", capacity).unwrap();

        let data: Vec<u8> = (0..8192).map(|i| (i % 251) as u8).collect();
        let pos = SEGMENT_BYTES - 4096;
        segs.write_at(pos, &data).unwrap();

        let mut buf = vec![0u8; data.len()];
        segs.read_at(pos, &mut buf).unwrap();
        assert_eq!(buf, data);
    }

    #[test]
    fn test_shrunk_geometry_removes_stale_files() {
        let dir = tempdir().unwrap();
        let capacity = SEGMENT_BYTES * 2;
        drop(RingSegments::open(dir.path(), "ring", capacity).unwrap());
        assert!(dir.path().join("ring_00001.log").exists());

        drop(RingSegments::open(dir.path(), "ring", 1024).unwrap());
        assert!(!dir.path().join("ring_00001.log").exists());
        assert_eq!(
            std::fs::metadata(dir.path().join("ring_00000.log"))
                .unwrap()
                .len(),
            1024
        );
    }
}
