//! Master-Side Push Surface
//!
//! The socket loop that streams bytes to followers lives with the
//! connection layer; this service provides everything that loop needs:
//! a watch channel that fires when new bytes land in the backlog, the
//! partial-resync handshake decision, batched replay of retained bytes,
//! and per-follower progress tracking.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::watch;

use super::backlog::ReplicationBacklog;
use super::protocol::HandshakeMessage;
use crate::error::{Error, Result};

/// A follower that has not acked within this window is dropped from the
/// registry; it re-registers on its next psync.
const FOLLOWER_TIMEOUT: Duration = Duration::from_secs(60);

/// Replication progress of one attached follower
#[derive(Debug, Clone)]
pub struct FollowerProgress {
    /// Highest offset the follower acknowledged
    pub ack_offset: u64,
    /// When the last ack arrived
    pub last_ack: Instant,
}

/// Master-side replication surface
pub struct MasterService {
    backlog: ReplicationBacklog,
    followers: Mutex<HashMap<String, FollowerProgress>>,
    feed: watch::Sender<u64>,
}

impl MasterService {
    pub fn new(backlog: ReplicationBacklog) -> Self {
        let (feed, _) = watch::channel(backlog.end_offset());
        Self {
            backlog,
            followers: Mutex::new(HashMap::new()),
            feed,
        }
    }

    pub fn init(&self) -> Result<()> {
        tracing::info!("master push surface ready");
        Ok(())
    }

    /// Watch the log's end offset; the push loop wakes on every append
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.feed.subscribe()
    }

    /// Called by the reactor after every append
    pub(crate) fn notify_end_offset(&self, end: u64) {
        self.feed.send_replace(end);
    }

    /// Decide a follower's psync request: continue from its offset when
    /// its identity and declared position check out against our history,
    /// otherwise demand a full resync from the current position.
    pub async fn handle_psync(
        &self,
        addr: &str,
        request: &HandshakeMessage,
    ) -> Result<HandshakeMessage> {
        let HandshakeMessage::PSync {
            repl_key,
            offset,
            cksm,
        } = request
        else {
            return Err(Error::Replication(format!(
                "unexpected handshake message {request}"
            )));
        };

        let our_key = self.backlog.repl_key();
        if repl_key != "?" && *repl_key == our_key {
            if self.backlog.is_valid_offset_cksm(*offset, *cksm).await? {
                tracing::info!(follower = %addr, offset, "accepting partial resync");
                self.register(addr, *offset);
                return Ok(HandshakeMessage::Continue { offset: *offset });
            }
            tracing::info!(
                follower = %addr,
                offset,
                start = self.backlog.start_offset(),
                "declared position not resumable"
            );
        }

        let end = self.backlog.end_offset();
        tracing::info!(follower = %addr, offset = end, "demanding full resync");
        self.register(addr, end);
        Ok(HandshakeMessage::FullResync {
            repl_key: our_key,
            offset: end,
            cksm: self.backlog.cksm(),
        })
    }

    /// Collect up to `max` retained bytes starting at `from` for pushing
    pub async fn fetch(&self, from: u64, max: usize) -> Result<Vec<u8>> {
        let end = self.backlog.end_offset();
        if from >= end {
            return Ok(Vec::new());
        }
        let len = (end - from).min(max as u64);
        self.backlog.replay(from, len).await
    }

    /// Record a follower's progress report
    pub fn ack(&self, addr: &str, offset: u64) {
        let mut followers = self.followers.lock();
        let entry = followers.entry(addr.to_string()).or_insert(FollowerProgress {
            ack_offset: 0,
            last_ack: Instant::now(),
        });
        entry.ack_offset = entry.ack_offset.max(offset);
        entry.last_ack = Instant::now();
    }

    pub fn follower_count(&self) -> usize {
        self.followers.lock().len()
    }

    /// Progress snapshot for one follower
    pub fn follower_progress(&self, addr: &str) -> Option<FollowerProgress> {
        self.followers.lock().get(addr).cloned()
    }

    /// Once-per-second housekeeping: prune unresponsive followers and
    /// report lag.
    pub(crate) fn routine(&self) {
        let end = self.backlog.end_offset();
        let mut followers = self.followers.lock();
        followers.retain(|addr, progress| {
            if progress.last_ack.elapsed() > FOLLOWER_TIMEOUT {
                tracing::warn!(follower = %addr, "dropping unresponsive follower");
                return false;
            }
            tracing::debug!(
                follower = %addr,
                lag = end - progress.ack_offset,
                "follower progress"
            );
            true
        });
    }

    fn register(&self, addr: &str, offset: u64) {
        self.followers.lock().insert(
            addr.to_string(),
            FollowerProgress {
                ack_offset: offset,
                last_ack: Instant::now(),
            },
        );
    }
}
