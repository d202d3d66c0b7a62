//! Replication I/O Reactor
//!
//! A single task owns the WAL writer end, the replication metadata, and
//! the 1 Hz housekeeping tick. Everything else in the process reaches
//! replication state by enqueueing a task here, which is what makes the
//! metadata lock-free: there is exactly one mutator.
//!
//! Per-producer submission order is preserved by the channel; callers
//! needing cross-producer ordering must serialize upstream. A `SELECT`
//! preamble and its triggering envelope are appended back to back within
//! one task, so no other envelope can ever split them.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use super::backlog::BacklogInner;
use super::envelope::{EnvelopePool, ReplEnvelope};
use super::follower::SlaveService;
use super::master::MasterService;
use crate::error::Result;

/// Work items accepted by the reactor
pub(crate) enum LogTask {
    /// Append a namespace-tagged command (master write path)
    Append(Box<ReplEnvelope>),
    /// Append raw mirrored stream bytes (follower path)
    Mirror(Vec<u8>),
    /// Adopt a peer's replication key
    SetReplKey {
        key: String,
        done: oneshot::Sender<()>,
    },
    /// Set or clear the stream's current namespace
    SetNamespace {
        ns: Option<String>,
        done: oneshot::Sender<()>,
    },
    /// Partial-resync position check
    Validate {
        offset: u64,
        cksm: u64,
        reply: oneshot::Sender<bool>,
    },
    /// Discard the log, resume at the given position
    Reset {
        offset: u64,
        cksm: u64,
        reply: oneshot::Sender<Result<()>>,
    },
    /// Collect retained bytes for the pusher
    Replay {
        from: u64,
        len: u64,
        reply: oneshot::Sender<Result<Vec<u8>>>,
    },
    /// Force durability now
    Flush { done: oneshot::Sender<()> },
    /// Stop the reactor
    Shutdown,
}

/// The reactor event loop state
pub(crate) struct ReplReactor {
    inner: BacklogInner,
    pool: Arc<EnvelopePool>,
    master: Arc<MasterService>,
    slave: Arc<SlaveService>,
}

impl ReplReactor {
    pub fn new(
        inner: BacklogInner,
        pool: Arc<EnvelopePool>,
        master: Arc<MasterService>,
        slave: Arc<SlaveService>,
    ) -> Self {
        Self {
            inner,
            pool,
            master,
            slave,
        }
    }

    /// Run until shutdown. `ready` fires once the loop is accepting
    /// tasks, which is what service init awaits.
    pub async fn run(mut self, mut rx: mpsc::Receiver<LogTask>, ready: oneshot::Sender<()>) {
        let _ = ready.send(());
        let mut ticker = interval_at(
            Instant::now() + Duration::from_secs(1),
            Duration::from_secs(1),
        );
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                task = rx.recv() => match task {
                    None | Some(LogTask::Shutdown) => break,
                    Some(task) => self.handle(task),
                },
                _ = ticker.tick() => {
                    self.master.routine();
                    self.slave.routine();
                    self.inner.routine();
                }
            }
        }

        // Queued envelopes past this point are dropped; reconnecting
        // followers recover the lost tail through the psync handshake.
        self.inner.flush_sync_wal();
        tracing::info!("replication reactor stopped");
    }

    fn handle(&mut self, task: LogTask) {
        match task {
            LogTask::Append(env) => {
                if let Err(e) = self.inner.append_envelope(&env.ns, &env.buf) {
                    tracing::error!(error = %e, ns = %env.ns, "dropping command append");
                }
                self.pool.release(env);
                self.master.notify_end_offset(self.inner.end_offset());
            }
            LogTask::Mirror(bytes) => {
                if let Err(e) = self.inner.append_raw(&bytes) {
                    tracing::error!(error = %e, "dropping mirrored bytes");
                }
                self.master.notify_end_offset(self.inner.end_offset());
            }
            LogTask::SetReplKey { key, done } => {
                self.inner.set_repl_key(&key);
                let _ = done.send(());
            }
            LogTask::SetNamespace { ns, done } => {
                self.inner.set_current_ns(ns);
                let _ = done.send(());
            }
            LogTask::Validate {
                offset,
                cksm,
                reply,
            } => {
                let _ = reply.send(self.inner.is_valid_offset_cksm(offset, cksm));
            }
            LogTask::Reset {
                offset,
                cksm,
                reply,
            } => {
                let _ = reply.send(self.inner.reset(offset, cksm));
            }
            LogTask::Replay { from, len, reply } => {
                let _ = reply.send(self.inner.replay_collect(from, len));
            }
            LogTask::Flush { done } => {
                self.inner.flush_sync_wal();
                let _ = done.send(());
            }
            LogTask::Shutdown => unreachable!("handled by the run loop"),
        }
    }
}
