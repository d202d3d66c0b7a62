//! Ring WAL
//!
//! The durable bounded byte log. Appends never fail for lack of space:
//! once `end_offset - start_offset` reaches the capacity, the oldest
//! bytes are overwritten in place and `start_offset` advances. Offsets
//! are logical and monotone across wraps; `o % capacity` is the physical
//! position of logical offset `o`.
//!
//! A write-combining cache fronts the segment files: appends land in
//! memory and are spilled to disk when the unflushed span outgrows the
//! cache budget, or on `sync()`. The cache always holds the newest bytes
//! of the log, so replaying a recent window never touches the disk.

use std::path::{Path, PathBuf};

use super::crc::crc64;
use super::meta::WalMeta;
use super::segment::RingSegments;
use super::WalPaths;
use crate::error::{Error, Result};

/// Checksum fold function: `(running, bytes) -> running`
pub type CksmFn = fn(u64, &[u8]) -> u64;

/// Read granularity when replaying from the segment files
const REPLAY_CHUNK: usize = 64 * 1024;

/// Ring WAL creation options
#[derive(Clone)]
pub struct RingWalOptions {
    /// Create the log when the directory holds none
    pub create_ifnotexist: bool,
    /// Size of the embedder-owned inline metadata area
    pub user_meta_size: usize,
    /// Total ring capacity in bytes
    pub max_file_size: u64,
    /// Write-combining cache budget (0 writes through)
    pub ring_cache_size: usize,
    /// Running checksum fold
    pub cksm_func: CksmFn,
    /// File name prefix for segment and meta files
    pub log_prefix: String,
}

impl Default for RingWalOptions {
    fn default() -> Self {
        Self {
            create_ifnotexist: true,
            user_meta_size: 4096,
            max_file_size: 64 * 1024 * 1024,
            ring_cache_size: 4 * 1024 * 1024,
            cksm_func: crc64,
            log_prefix: "wolfcache".to_string(),
        }
    }
}

/// Fixed-capacity durable byte log with stable logical offsets
pub struct RingWal {
    opts: RingWalOptions,
    capacity: u64,
    segments: RingSegments,
    meta_path: PathBuf,
    start_offset: u64,
    end_offset: u64,
    cksm: u64,
    user_meta: Vec<u8>,
    /// Newest log bytes, covering `[cache_start, end_offset)`
    cache: Vec<u8>,
    cache_start: u64,
    /// Everything below this offset has been written to the segment files
    flushed_offset: u64,
}

impl RingWal {
    /// Open or create the log in `dir`.
    ///
    /// Recovery restores `(start_offset, end_offset, cksm, user_meta)`
    /// from the meta file. A capacity change keeps the logical position,
    /// checksum, and user meta but drops the retained window.
    pub fn open(dir: &Path, opts: RingWalOptions) -> Result<RingWal> {
        if opts.max_file_size == 0 {
            return Err(Error::Wal("ring capacity must be positive".into()));
        }
        let capacity = opts.max_file_size;
        let paths = WalPaths::new(dir, &opts.log_prefix);
        let meta_path = paths.meta_path();

        let mut meta = if meta_path.exists() {
            WalMeta::load(&meta_path)?
        } else {
            if !opts.create_ifnotexist {
                return Err(Error::Wal(format!(
                    "no existing log under {}",
                    dir.display()
                )));
            }
            paths.ensure_dirs()?;
            let fresh = WalMeta::fresh(capacity, opts.user_meta_size);
            fresh.store(&meta_path)?;
            tracing::info!(dir = %dir.display(), capacity, "created ring WAL");
            fresh
        };

        let mut geometry_changed = false;
        if meta.capacity != capacity {
            tracing::warn!(
                old = meta.capacity,
                new = capacity,
                "ring capacity changed, dropping retained window"
            );
            meta.start_offset = meta.end_offset;
            meta.capacity = capacity;
            geometry_changed = true;
        }
        if meta.user_meta.len() != opts.user_meta_size {
            tracing::warn!(
                old = meta.user_meta.len(),
                new = opts.user_meta_size,
                "user meta area resized"
            );
            meta.user_meta.resize(opts.user_meta_size, 0);
            geometry_changed = true;
        }

        let segments = RingSegments::open(dir, &opts.log_prefix, capacity)?;
        if geometry_changed {
            meta.store(&meta_path)?;
        }

        Ok(RingWal {
            capacity,
            segments,
            meta_path,
            start_offset: meta.start_offset,
            end_offset: meta.end_offset,
            cksm: meta.cksm,
            user_meta: meta.user_meta,
            cache: Vec::new(),
            cache_start: meta.end_offset,
            flushed_offset: meta.end_offset,
            opts,
        })
    }

    /// Append bytes to the log. Never fails for lack of space; the oldest
    /// bytes are overwritten once the ring is full.
    pub fn append(&mut self, bytes: &[u8]) -> Result<()> {
        if bytes.is_empty() {
            return Ok(());
        }
        self.cksm = (self.opts.cksm_func)(self.cksm, bytes);
        self.cache.extend_from_slice(bytes);
        self.end_offset += bytes.len() as u64;
        if self.end_offset - self.start_offset > self.capacity {
            self.start_offset = self.end_offset - self.capacity;
        }
        self.shrink_cache()
    }

    /// Invoke `cb` with contiguous chunks covering `[from, from + len)`
    /// in order. Fails when the window is not wholly retained.
    pub fn replay<F: FnMut(&[u8])>(&mut self, from: u64, len: u64, mut cb: F) -> Result<()> {
        let to = from + len;
        if from < self.start_offset {
            return Err(Error::StaleOffset {
                requested: from,
                start: self.start_offset,
            });
        }
        if to > self.end_offset {
            return Err(Error::ReplayOutOfRange {
                from,
                to,
                end: self.end_offset,
            });
        }

        // Portion that only exists in the segment files
        let file_to = to.min(self.cache_start);
        let mut cur = from;
        let mut buf = vec![0u8; REPLAY_CHUNK.min(len as usize)];
        while cur < file_to {
            let n = ((file_to - cur) as usize).min(REPLAY_CHUNK);
            self.read_phys(cur, &mut buf[..n])?;
            cb(&buf[..n]);
            cur += n as u64;
        }

        // Remainder is resident in the cache
        if to > cur {
            let a = (cur.max(self.cache_start) - self.cache_start) as usize;
            let b = (to - self.cache_start) as usize;
            cb(&self.cache[a..b]);
        }
        Ok(())
    }

    /// Force all appended bytes to stable storage
    pub fn sync(&mut self) -> Result<()> {
        self.flush_to(self.end_offset)?;
        self.segments.sync()
    }

    /// Persist the metadata record (offsets, checksum, user meta)
    /// atomically. Pending cache bytes are written out first so the
    /// persisted end offset never points past the on-disk data.
    pub fn sync_meta(&mut self) -> Result<()> {
        self.flush_to(self.end_offset)?;
        let meta = WalMeta {
            capacity: self.capacity,
            start_offset: self.start_offset,
            end_offset: self.end_offset,
            cksm: self.cksm,
            user_meta: self.user_meta.clone(),
        };
        meta.store(&self.meta_path)
    }

    /// Discard all data and resume logical numbering at `offset` with the
    /// given seed checksum.
    pub fn reset(&mut self, offset: u64, cksm: u64) -> Result<()> {
        tracing::info!(offset, cksm, "resetting ring WAL");
        self.start_offset = offset;
        self.end_offset = offset;
        self.cksm = cksm;
        self.cache.clear();
        self.cache_start = offset;
        self.flushed_offset = offset;
        self.sync_meta()
    }

    /// Embedder-owned inline metadata
    pub fn user_meta(&self) -> &[u8] {
        &self.user_meta
    }

    /// Mutable view of the inline metadata; persisted by `sync_meta`
    pub fn user_meta_mut(&mut self) -> &mut [u8] {
        &mut self.user_meta
    }

    /// Smallest logical offset still retained
    pub fn start_offset(&self) -> u64 {
        self.start_offset
    }

    /// Next logical offset to be written
    pub fn end_offset(&self) -> u64 {
        self.end_offset
    }

    /// Running checksum over every byte ever appended
    pub fn cksm(&self) -> u64 {
        self.cksm
    }

    /// Total ring capacity in bytes
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Spill cache bytes so the unflushed span fits the cache budget,
    /// then drop cached bytes older than the budget window.
    fn shrink_cache(&mut self) -> Result<()> {
        let budget = (self.opts.ring_cache_size as u64).min(self.capacity);
        if self.end_offset - self.cache_start <= budget {
            return Ok(());
        }
        let new_start = self.end_offset - budget;
        self.flush_to(new_start)?;
        self.cache.drain(..(new_start - self.cache_start) as usize);
        self.cache_start = new_start;
        Ok(())
    }

    /// Write cached bytes `[flushed_offset, to)` to the segment files.
    /// Bytes already below `start_offset` are skipped; their physical
    /// slots belong to newer data.
    fn flush_to(&mut self, to: u64) -> Result<()> {
        if to <= self.flushed_offset {
            return Ok(());
        }
        let from = self.flushed_offset.max(self.start_offset).min(to);
        if from < to {
            let a = (from - self.cache_start) as usize;
            let len = (to - from) as usize;
            let pos = from % self.capacity;
            let first = ((self.capacity - pos) as usize).min(len);
            self.segments.write_at(pos, &self.cache[a..a + first])?;
            if first < len {
                self.segments.write_at(0, &self.cache[a + first..a + len])?;
            }
        }
        self.flushed_offset = to;
        Ok(())
    }

    /// Read `buf.len()` bytes at logical offset `logical` from the
    /// segment files, splitting at the ring boundary.
    fn read_phys(&mut self, logical: u64, buf: &mut [u8]) -> Result<()> {
        let pos = logical % self.capacity;
        let first = ((self.capacity - pos) as usize).min(buf.len());
        self.segments.read_at(pos, &mut buf[..first])?;
        if first < buf.len() {
            self.segments.read_at(0, &mut buf[first..])?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn options(capacity: u64, cache: usize) -> RingWalOptions {
        RingWalOptions {
            max_file_size: capacity,
            ring_cache_size: cache,
            user_meta_size: 4096,
            ..Default::default()
        }
    }

    fn collect(wal: &mut RingWal, from: u64, len: u64) -> Vec<u8> {
        let mut out = Vec::new();
        wal.replay(from, len, |chunk| out.extend_from_slice(chunk))
            .unwrap();
        out
    }

    #[test]
    fn test_cold_create() {
        let dir = tempdir().unwrap();
        let wal = RingWal::open(dir.path(), options(1 << 20, 1 << 16)).unwrap();
        assert_eq!(wal.start_offset(), 0);
        assert_eq!(wal.end_offset(), 0);
        assert_eq!(wal.cksm(), 0);
    }

    #[test]
    fn test_open_without_create_fails() {
        let dir = tempdir().unwrap();
        let opts = RingWalOptions {
            create_ifnotexist: false,
            ..options(4096, 1024)
        };
        assert!(RingWal::open(dir.path(), opts).is_err());
    }

    #[test]
    fn test_append_replay_roundtrip() {
        let dir = tempdir().unwrap();
        let mut wal = RingWal::open(dir.path(), options(1 << 20, 1 << 16)).unwrap();

        wal.append(b"first entry;").unwrap();
        wal.append(b"second entry;").unwrap();

        assert_eq!(wal.end_offset(), 25);
        assert_eq!(collect(&mut wal, 0, 25), b"first entry;second entry;");
        assert_eq!(collect(&mut wal, 12, 13), b"second entry;");
    }

    #[test]
    fn test_ring_overwrite_offsets() {
        let dir = tempdir().unwrap();
        let mut wal = RingWal::open(dir.path(), options(1024, 256)).unwrap();

        let mut all = Vec::new();
        for i in 0..12u8 {
            let chunk = vec![i; 256];
            wal.append(&chunk).unwrap();
            all.extend_from_slice(&chunk);
        }

        assert_eq!(wal.end_offset(), 3072);
        assert_eq!(wal.start_offset(), 2048);
        assert_eq!(wal.cksm(), crc64(0, &all));
        assert_eq!(collect(&mut wal, 2048, 1024), &all[2048..]);
    }

    #[test]
    fn test_oversized_append_retains_tail() {
        let dir = tempdir().unwrap();
        let mut wal = RingWal::open(dir.path(), options(1024, 256)).unwrap();

        let big: Vec<u8> = (0..3000u32).map(|i| (i % 255) as u8).collect();
        wal.append(&big).unwrap();

        assert_eq!(wal.end_offset(), 3000);
        assert_eq!(wal.start_offset(), 3000 - 1024);
        assert_eq!(wal.cksm(), crc64(0, &big));
        assert_eq!(collect(&mut wal, 3000 - 1024, 1024), &big[3000 - 1024..]);
    }

    #[test]
    fn test_replay_stale_window() {
        let dir = tempdir().unwrap();
        let mut wal = RingWal::open(dir.path(), options(1024, 128)).unwrap();
        wal.append(&vec![7u8; 2048]).unwrap();

        let err = wal.replay(500, 10, |_| {}).unwrap_err();
        assert!(matches!(err, Error::StaleOffset { .. }));

        let err = wal.replay(2000, 100, |_| {}).unwrap_err();
        assert!(matches!(err, Error::ReplayOutOfRange { .. }));
    }

    #[test]
    fn test_write_through_cache_disabled() {
        let dir = tempdir().unwrap();
        let mut wal = RingWal::open(dir.path(), options(4096, 0)).unwrap();
        wal.append(b"no cache at all").unwrap();
        assert_eq!(collect(&mut wal, 0, 15), b"no cache at all");
    }

    #[test]
    fn test_recovery_after_sync() {
        let dir = tempdir().unwrap();
        let cksm;
        {
            let mut wal = RingWal::open(dir.path(), options(4096, 64)).unwrap();
            wal.append(b"durable bytes here").unwrap();
            wal.user_meta_mut()[0..4].copy_from_slice(b"mark");
            wal.sync().unwrap();
            wal.sync_meta().unwrap();
            cksm = wal.cksm();
        }

        let mut wal = RingWal::open(dir.path(), options(4096, 64)).unwrap();
        assert_eq!(wal.end_offset(), 18);
        assert_eq!(wal.start_offset(), 0);
        assert_eq!(wal.cksm(), cksm);
        assert_eq!(&wal.user_meta()[0..4], b"mark");
        assert_eq!(collect(&mut wal, 0, 18), b"durable bytes here");
    }

    #[test]
    fn test_unsynced_tail_is_lost_on_reopen() {
        let dir = tempdir().unwrap();
        {
            let mut wal = RingWal::open(dir.path(), options(4096, 64)).unwrap();
            wal.append(b"synced").unwrap();
            wal.sync().unwrap();
            wal.sync_meta().unwrap();
            wal.append(b"never synced").unwrap();
        }

        let wal = RingWal::open(dir.path(), options(4096, 64)).unwrap();
        assert_eq!(wal.end_offset(), 6);
    }

    #[test]
    fn test_reset_seeds_offset_and_cksm() {
        let dir = tempdir().unwrap();
        let mut wal = RingWal::open(dir.path(), options(4096, 64)).unwrap();
        wal.append(b"old history").unwrap();

        wal.reset(10_000, 0xDEADBEEF).unwrap();
        wal.append(b"hi").unwrap();

        assert_eq!(wal.end_offset(), 10_002);
        assert_eq!(wal.start_offset(), 10_000);
        assert_eq!(wal.cksm(), crc64(0xDEADBEEF, b"hi"));
        assert_eq!(collect(&mut wal, 10_000, 2), b"hi");
    }

    #[test]
    fn test_checksum_fold_over_retained_window() {
        let dir = tempdir().unwrap();
        let mut wal = RingWal::open(dir.path(), options(2048, 128)).unwrap();

        wal.append(&vec![1u8; 900]).unwrap();
        let mid = wal.end_offset();
        let mid_cksm = wal.cksm();
        wal.append(&vec![2u8; 700]).unwrap();

        let mut folded = mid_cksm;
        wal.replay(mid, wal.end_offset() - mid, |chunk| {
            folded = crc64(folded, chunk);
        })
        .unwrap();
        assert_eq!(folded, wal.cksm());
    }

    #[test]
    fn test_capacity_change_drops_window_keeps_position() {
        let dir = tempdir().unwrap();
        let cksm;
        {
            let mut wal = RingWal::open(dir.path(), options(1024, 64)).unwrap();
            wal.append(&vec![9u8; 600]).unwrap();
            wal.user_meta_mut()[0] = 0x42;
            wal.sync().unwrap();
            wal.sync_meta().unwrap();
            cksm = wal.cksm();
        }

        let mut wal = RingWal::open(dir.path(), options(8192, 64)).unwrap();
        assert_eq!(wal.end_offset(), 600);
        assert_eq!(wal.start_offset(), 600);
        assert_eq!(wal.cksm(), cksm);
        assert_eq!(wal.user_meta()[0], 0x42);
        assert!(wal.replay(0, 600, |_| {}).is_err());

        // Appending after the change continues the logical stream
        wal.append(b"more").unwrap();
        assert_eq!(wal.end_offset(), 604);
        assert_eq!(collect(&mut wal, 600, 4), b"more");
    }
}
