//! Replication Backlog
//!
//! Wraps the ring WAL with replication semantics: stream identity,
//! current-namespace tracking with `SELECT` preamble injection, periodic
//! durability, and offset/checksum validation for the resync handshake.
//!
//! The backlog is split the same way the WAL writer is: a cloneable
//! handle (`ReplicationBacklog`) that worker threads use without ever
//! blocking, and the reactor-owned state (`BacklogInner`) where every
//! mutation actually happens. The handle reaches the inner state only
//! through the reactor's task queue, so ordering within one producer is
//! the order bytes hit the log.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Instant;

use parking_lot::RwLock;
use tokio::sync::{mpsc, oneshot};

use super::envelope::EnvelopePool;
use super::meta::{random_hex_string, ReplMeta, MAX_NAMESPACE_SIZE, SERVER_KEY_SIZE};
use super::reactor::LogTask;
use crate::codec::CommandFrame;
use crate::config::ReplicationConfig;
use crate::error::{Error, Result};
use crate::wal::{crc64, RingWal, RingWalOptions};

/// State shared between the handle and the reactor: lock-free offset
/// mirrors plus the identity record, written only by the reactor.
#[derive(Debug)]
pub(crate) struct BacklogShared {
    start: AtomicU64,
    end: AtomicU64,
    cksm: AtomicU64,
    pub(crate) inited: AtomicBool,
    identity: RwLock<ReplMeta>,
    fallback_key: OnceLock<String>,
}

impl Default for BacklogShared {
    fn default() -> Self {
        Self {
            start: AtomicU64::new(0),
            end: AtomicU64::new(0),
            cksm: AtomicU64::new(0),
            inited: AtomicBool::new(false),
            identity: RwLock::new(ReplMeta {
                server_key: String::new(),
                repl_key: String::new(),
                repl_key_self_generated: true,
                select_ns: None,
            }),
            fallback_key: OnceLock::new(),
        }
    }
}

impl BacklogShared {
    /// Process-stable random identity served while no WAL is open
    fn fallback_key(&self) -> &str {
        self.fallback_key
            .get_or_init(|| random_hex_string(SERVER_KEY_SIZE))
    }
}

/// Producer-facing backlog handle. Cheap to clone; every operation is
/// either a lock-free read of the shared mirrors or a message to the
/// reactor.
#[derive(Clone)]
pub struct ReplicationBacklog {
    tx: mpsc::Sender<LogTask>,
    pub(crate) shared: Arc<BacklogShared>,
    pool: Arc<EnvelopePool>,
    enabled: bool,
}

impl ReplicationBacklog {
    pub(crate) fn new(
        tx: mpsc::Sender<LogTask>,
        shared: Arc<BacklogShared>,
        pool: Arc<EnvelopePool>,
    ) -> Self {
        Self {
            tx,
            shared,
            pool,
            enabled: true,
        }
    }

    /// Handle for an instance whose backlog is configured off. Writes
    /// are rejected with `NotReady`; the identity accessors still serve
    /// a process-stable random key.
    pub(crate) fn disabled() -> Self {
        let (tx, _rx) = mpsc::channel(1);
        Self {
            tx,
            shared: Arc::new(BacklogShared::default()),
            pool: Arc::new(EnvelopePool::new()),
            enabled: false,
        }
    }

    /// Whether writes are currently accepted
    pub fn is_ready(&self) -> bool {
        self.enabled && self.shared.inited.load(Ordering::Acquire)
    }

    /// Queue a namespace-tagged command for the replicated stream.
    ///
    /// Non-blocking: the command's protocol bytes are copied into a
    /// pooled envelope and handed to the reactor. Returns `NotReady`
    /// before init (the caller drops the entry) and `ChannelFull` when
    /// the reactor queue is saturated.
    pub fn write(&self, ns: &str, frame: &CommandFrame) -> Result<()> {
        if !self.is_ready() {
            return Err(Error::NotReady);
        }
        if ns.len() > MAX_NAMESPACE_SIZE {
            return Err(Error::Replication(format!(
                "namespace exceeds {MAX_NAMESPACE_SIZE} bytes"
            )));
        }
        let mut env = self.pool.acquire();
        env.ns.push_str(ns);
        frame.protocol_bytes_into(&mut env.buf);
        match self.tx.try_send(LogTask::Append(env)) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(task)) => {
                if let LogTask::Append(env) = task {
                    self.pool.release(env);
                }
                Err(Error::ChannelFull)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(Error::ShuttingDown),
        }
    }

    /// Queue raw stream bytes, bypassing namespace handling. This is the
    /// follower's mirror path; a mirrored stream already contains the
    /// master's `SELECT` preambles at the right offsets.
    pub(crate) fn mirror(&self, bytes: Vec<u8>) -> Result<()> {
        if !self.is_ready() {
            return Err(Error::NotReady);
        }
        match self.tx.try_send(LogTask::Mirror(bytes)) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => Err(Error::ChannelFull),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(Error::ShuttingDown),
        }
    }

    /// Smallest logical offset still retained
    pub fn start_offset(&self) -> u64 {
        self.shared.start.load(Ordering::Acquire)
    }

    /// Next logical offset to be written
    pub fn end_offset(&self) -> u64 {
        self.shared.end.load(Ordering::Acquire)
    }

    /// Running checksum over every byte ever appended
    pub fn cksm(&self) -> u64 {
        self.shared.cksm.load(Ordering::Acquire)
    }

    /// Identity of the replication stream this instance serves
    pub fn repl_key(&self) -> String {
        let identity = self.shared.identity.read();
        if identity.repl_key.is_empty() {
            self.shared.fallback_key().to_string()
        } else {
            identity.repl_key.clone()
        }
    }

    /// Permanent identity of this data directory
    pub fn server_key(&self) -> String {
        let identity = self.shared.identity.read();
        if identity.server_key.is_empty() {
            self.shared.fallback_key().to_string()
        } else {
            identity.server_key.clone()
        }
    }

    /// True while the replication key has never been overwritten by a peer
    pub fn is_repl_key_self_generated(&self) -> bool {
        self.shared.identity.read().repl_key_self_generated
    }

    /// Namespace the next log entry belongs to
    pub fn current_namespace(&self) -> Option<String> {
        self.shared.identity.read().select_ns.clone()
    }

    /// Adopt a peer's replication key
    pub async fn set_repl_key(&self, key: &str) -> Result<()> {
        let (done, rx) = oneshot::channel();
        self.request(
            LogTask::SetReplKey {
                key: key.to_string(),
                done,
            },
            rx,
        )
        .await
    }

    /// Set the stream's current namespace
    pub async fn set_current_namespace(&self, ns: &str) -> Result<()> {
        let (done, rx) = oneshot::channel();
        self.request(
            LogTask::SetNamespace {
                ns: Some(ns.to_string()),
                done,
            },
            rx,
        )
        .await
    }

    /// Clear the stream's current namespace
    pub async fn clear_current_namespace(&self) -> Result<()> {
        let (done, rx) = oneshot::channel();
        self.request(LogTask::SetNamespace { ns: None, done }, rx).await
    }

    /// Check whether a follower's declared position is consistent with
    /// this log's history. `cksm == 0` opts out of verification.
    pub async fn is_valid_offset_cksm(&self, offset: u64, cksm: u64) -> Result<bool> {
        let (reply, rx) = oneshot::channel();
        self.request(
            LogTask::Validate {
                offset,
                cksm,
                reply,
            },
            rx,
        )
        .await
    }

    /// Discard the log and resume numbering at `offset` with seed `cksm`
    pub async fn reset_offset_cksm(&self, offset: u64, cksm: u64) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.request(
            LogTask::Reset {
                offset,
                cksm,
                reply,
            },
            rx,
        )
        .await?
    }

    /// Collect retained bytes `[from, from + len)`
    pub async fn replay(&self, from: u64, len: u64) -> Result<Vec<u8>> {
        let (reply, rx) = oneshot::channel();
        self.request(LogTask::Replay { from, len, reply }, rx).await?
    }

    /// Force log bytes and metadata to stable storage. Also acts as a
    /// barrier: every envelope queued before this call is appended first.
    pub async fn flush_sync(&self) -> Result<()> {
        let (done, rx) = oneshot::channel();
        self.request(LogTask::Flush { done }, rx).await
    }

    /// Ask the reactor to stop
    pub(crate) async fn shutdown(&self) -> Result<()> {
        self.tx
            .send(LogTask::Shutdown)
            .await
            .map_err(|_| Error::ShuttingDown)
    }

    async fn request<T>(&self, task: LogTask, rx: oneshot::Receiver<T>) -> Result<T> {
        if !self.enabled {
            return Err(Error::NotReady);
        }
        self.tx.send(task).await.map_err(|_| Error::ShuttingDown)?;
        rx.await.map_err(|_| Error::ShuttingDown)
    }
}

/// Reactor-owned backlog state: the WAL, the identity record, and the
/// periodic sync gate. Only the reactor task touches this.
pub(crate) struct BacklogInner {
    wal: RingWal,
    meta: ReplMeta,
    config: ReplicationConfig,
    shared: Arc<BacklogShared>,
    last_sync: Option<Instant>,
}

impl BacklogInner {
    /// Open the WAL and recover or generate the replication identity.
    pub fn open(config: &ReplicationConfig, shared: Arc<BacklogShared>) -> Result<Self> {
        let opts = RingWalOptions {
            create_ifnotexist: true,
            user_meta_size: 4096,
            max_file_size: config.backlog_size,
            ring_cache_size: config.backlog_cache_size,
            cksm_func: crc64,
            log_prefix: "wolfcache".to_string(),
        };
        let mut wal = RingWal::open(&config.data_dir, opts)?;

        let meta = if ReplMeta::is_fresh(wal.user_meta()) {
            let meta = ReplMeta::generate();
            meta.store(wal.user_meta_mut());
            wal.sync_meta()?;
            tracing::info!(server_key = %meta.server_key, "generated server identity");
            meta
        } else {
            let meta = ReplMeta::load(wal.user_meta());
            tracing::info!(
                server_key = %meta.server_key,
                repl_key = %meta.repl_key,
                end_offset = wal.end_offset(),
                "recovered replication backlog"
            );
            meta
        };

        let inner = Self {
            wal,
            meta,
            config: config.clone(),
            shared,
            last_sync: None,
        };
        inner.publish_offsets();
        inner.publish_identity();
        Ok(inner)
    }

    /// Append one namespace-tagged command, synthesizing a `SELECT`
    /// preamble when the namespace changed. Only a master synthesizes:
    /// a follower mirrors a stream that already carries the master's
    /// preambles, so its tagged path never injects one.
    pub fn append_envelope(&mut self, ns: &str, buf: &[u8]) -> Result<usize> {
        let mut written = 0;
        if self.meta.select_ns.as_deref() != Some(ns) && self.config.is_master() {
            let mut preamble = Vec::new();
            CommandFrame::select(ns).encode_into(&mut preamble);
            self.wal.append(&preamble)?;
            written += preamble.len();
            self.meta.select_ns = Some(ns.to_string());
            self.meta.store(self.wal.user_meta_mut());
            self.publish_identity();
        }
        self.wal.append(buf)?;
        written += buf.len();
        self.publish_offsets();
        Ok(written)
    }

    /// Append raw stream bytes without touching namespace state
    pub fn append_raw(&mut self, bytes: &[u8]) -> Result<()> {
        self.wal.append(bytes)?;
        self.publish_offsets();
        Ok(())
    }

    pub fn is_valid_offset_cksm(&mut self, offset: u64, cksm: u64) -> bool {
        if offset < self.wal.start_offset() || offset > self.wal.end_offset() {
            return false;
        }
        if cksm == 0 {
            return true;
        }
        let len = self.wal.end_offset() - offset;
        let mut folded = cksm;
        if self
            .wal
            .replay(offset, len, |chunk| folded = crc64(folded, chunk))
            .is_err()
        {
            return false;
        }
        folded == self.wal.cksm()
    }

    pub fn set_repl_key(&mut self, key: &str) {
        self.meta.set_repl_key(key);
        self.meta.store(self.wal.user_meta_mut());
        self.publish_identity();
        tracing::info!(repl_key = %self.meta.repl_key, "replication key updated");
    }

    pub fn set_current_ns(&mut self, ns: Option<String>) {
        self.meta.select_ns = ns;
        self.meta.store(self.wal.user_meta_mut());
        self.publish_identity();
    }

    pub fn reset(&mut self, offset: u64, cksm: u64) -> Result<()> {
        self.wal.reset(offset, cksm)?;
        self.publish_offsets();
        Ok(())
    }

    pub fn replay_collect(&mut self, from: u64, len: u64) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(len as usize);
        self.wal
            .replay(from, len, |chunk| out.extend_from_slice(chunk))?;
        Ok(out)
    }

    /// Sync log bytes, then the metadata record. Failures degrade
    /// durability and are logged, never surfaced.
    pub fn flush_sync_wal(&mut self) {
        if let Err(e) = self.wal.sync() {
            tracing::error!(error = %e, "WAL sync failed");
            return;
        }
        if let Err(e) = self.wal.sync_meta() {
            tracing::error!(error = %e, "WAL meta sync failed");
        }
    }

    /// Once-per-second housekeeping: periodic durability at the
    /// configured cadence.
    pub fn routine(&mut self) {
        let Some(period) = self.config.sync_period() else {
            return;
        };
        if self.last_sync.map_or(true, |t| t.elapsed() >= period) {
            self.flush_sync_wal();
            self.last_sync = Some(Instant::now());
        }
    }

    pub fn end_offset(&self) -> u64 {
        self.wal.end_offset()
    }

    fn publish_offsets(&self) {
        self.shared
            .start
            .store(self.wal.start_offset(), Ordering::Release);
        self.shared
            .end
            .store(self.wal.end_offset(), Ordering::Release);
        self.shared.cksm.store(self.wal.cksm(), Ordering::Release);
    }

    fn publish_identity(&self) {
        *self.shared.identity.write() = self.meta.clone();
    }
}
