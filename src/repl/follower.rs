//! Follower-Side Receive Surface
//!
//! The socket loop that reads a master's stream lives with the
//! connection layer; this service provides what it needs: the psync
//! request built from persisted identity, handling of the master's
//! answer (including adopting its replication key ahead of a snapshot),
//! and the raw mirror path into the backlog.
//!
//! A follower never synthesizes `SELECT` preambles: the mirrored stream
//! already contains the master's preambles at the right offsets, which
//! is why this surface only exposes raw ingestion and no
//! namespace-tagged write path.

use parking_lot::Mutex;

use super::backlog::ReplicationBacklog;
use super::protocol::HandshakeMessage;
use crate::config::ReplicationConfig;
use crate::error::{Error, Result};

/// Replication link state of a follower
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlaveState {
    /// Not configured as a follower
    Idle,
    /// Waiting to negotiate with the master
    Connecting,
    /// Receiving a full snapshot
    FullSync,
    /// Mirroring the master's stream
    Streaming,
}

/// Follower-side replication surface
pub struct SlaveService {
    backlog: ReplicationBacklog,
    master_host: String,
    state: Mutex<SlaveState>,
}

impl SlaveService {
    pub fn new(backlog: ReplicationBacklog, config: &ReplicationConfig) -> Self {
        let state = if config.is_master() {
            SlaveState::Idle
        } else {
            SlaveState::Connecting
        };
        Self {
            backlog,
            master_host: config.master_host.clone(),
            state: Mutex::new(state),
        }
    }

    pub fn init(&self) -> Result<()> {
        if !self.master_host.is_empty() {
            tracing::info!(master = %self.master_host, "replicating from master");
        }
        Ok(())
    }

    /// Whether this instance is configured to follow a master
    pub fn is_follower(&self) -> bool {
        !self.master_host.is_empty()
    }

    pub fn state(&self) -> SlaveState {
        *self.state.lock()
    }

    /// Build the psync request for the next connection attempt. A
    /// self-generated key means we never attached to this master's
    /// stream, so ask for everything.
    pub fn handshake(&self) -> HandshakeMessage {
        if self.backlog.is_repl_key_self_generated() {
            HandshakeMessage::PSync {
                repl_key: "?".to_string(),
                offset: 0,
                cksm: 0,
            }
        } else {
            HandshakeMessage::PSync {
                repl_key: self.backlog.repl_key(),
                offset: self.backlog.end_offset(),
                cksm: self.backlog.cksm(),
            }
        }
    }

    /// Apply the master's answer to our psync request
    pub async fn apply_handshake_reply(&self, reply: &HandshakeMessage) -> Result<()> {
        match reply {
            HandshakeMessage::Continue { offset } => {
                tracing::info!(offset, "resuming replication stream");
                *self.state.lock() = SlaveState::Streaming;
                Ok(())
            }
            HandshakeMessage::FullResync {
                repl_key,
                offset,
                cksm,
            } => {
                self.begin_full_sync(repl_key, *offset, *cksm).await
            }
            other => Err(Error::Replication(format!(
                "unexpected handshake reply {other}"
            ))),
        }
    }

    /// Adopt the master's stream identity and position ahead of a
    /// snapshot transfer.
    pub async fn begin_full_sync(&self, repl_key: &str, offset: u64, cksm: u64) -> Result<()> {
        tracing::info!(repl_key = %repl_key, offset, "starting full resync");
        self.backlog.set_repl_key(repl_key).await?;
        self.backlog.reset_offset_cksm(offset, cksm).await?;
        *self.state.lock() = SlaveState::FullSync;
        Ok(())
    }

    /// Mirror stream bytes received from the master into the backlog
    pub fn ingest(&self, bytes: Vec<u8>) -> Result<()> {
        if !self.is_follower() {
            return Err(Error::Replication(
                "instance is not configured as a follower".into(),
            ));
        }
        self.backlog.mirror(bytes)?;
        let mut state = self.state.lock();
        if *state == SlaveState::FullSync {
            *state = SlaveState::Streaming;
        }
        Ok(())
    }

    /// Progress report for the master
    pub fn ack(&self) -> HandshakeMessage {
        HandshakeMessage::Ack {
            offset: self.backlog.end_offset(),
        }
    }

    /// Once-per-second housekeeping
    pub(crate) fn routine(&self) {
        if self.is_follower() {
            tracing::debug!(
                state = ?self.state(),
                offset = self.backlog.end_offset(),
                "follower link"
            );
        }
    }
}
