//! Replication Service
//!
//! Top-level facade composing the backlog, the master push surface, the
//! follower receive surface, and the reactor task. One `init`, one
//! `stop`; the database engine holds the returned handle and threads it
//! to call sites, with a module-level accessor kept for the few that
//! cannot be refactored.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use super::backlog::{BacklogInner, BacklogShared, ReplicationBacklog};
use super::envelope::EnvelopePool;
use super::follower::SlaveService;
use super::master::MasterService;
use super::reactor::ReplReactor;
use crate::config::ReplicationConfig;
use crate::error::{Error, Result};

/// Depth of the producer-to-reactor task queue
const REPL_QUEUE_DEPTH: usize = 16 * 1024;

static GLOBAL_SERVICE: OnceLock<Arc<ReplicationService>> = OnceLock::new();

/// Process-wide replication service
pub struct ReplicationService {
    backlog: ReplicationBacklog,
    master: Arc<MasterService>,
    slave: Arc<SlaveService>,
    reactor: Mutex<Option<JoinHandle<()>>>,
    inited: AtomicBool,
}

impl ReplicationService {
    /// Initialize replication and start the reactor.
    ///
    /// A zero backlog size is not an error: the service comes up in
    /// disabled mode, the instance simply cannot serve as a master (and
    /// the follower path is unreachable, since it relies on the same
    /// WAL). WAL open failures are fatal.
    pub async fn init(config: &ReplicationConfig) -> Result<Arc<Self>> {
        if !config.backlog_enabled() {
            tracing::warn!(
                "replication backlog is not enabled, this instance can NOT serve as \
                 master or accept any slave instance"
            );
            let backlog = ReplicationBacklog::disabled();
            let master = Arc::new(MasterService::new(backlog.clone()));
            let slave = Arc::new(SlaveService::new(backlog.clone(), config));
            return Ok(Arc::new(Self {
                backlog,
                master,
                slave,
                reactor: Mutex::new(None),
                inited: AtomicBool::new(false),
            }));
        }

        let shared = Arc::new(BacklogShared::default());
        let inner = BacklogInner::open(config, shared.clone())?;

        let (tx, rx) = mpsc::channel(REPL_QUEUE_DEPTH);
        let pool = Arc::new(EnvelopePool::new());
        let backlog = ReplicationBacklog::new(tx, shared.clone(), pool.clone());

        let master = Arc::new(MasterService::new(backlog.clone()));
        let slave = Arc::new(SlaveService::new(backlog.clone(), config));
        master.init()?;
        slave.init()?;

        let reactor = ReplReactor::new(inner, pool, master.clone(), slave.clone());
        let (ready_tx, ready_rx) = oneshot::channel();
        let handle = tokio::spawn(reactor.run(rx, ready_tx));
        ready_rx
            .await
            .map_err(|_| Error::Replication("replication reactor failed to start".into()))?;
        shared.inited.store(true, Ordering::Release);

        tracing::info!(
            dir = %config.data_dir.display(),
            backlog_size = config.backlog_size,
            role = if config.is_master() { "master" } else { "follower" },
            "replication service started"
        );

        Ok(Arc::new(Self {
            backlog,
            master,
            slave,
            reactor: Mutex::new(Some(handle)),
            inited: AtomicBool::new(true),
        }))
    }

    /// Stop the reactor and join it. No-op when not inited.
    pub async fn stop(&self) {
        if !self.inited.swap(false, Ordering::AcqRel) {
            return;
        }
        self.backlog.shared.inited.store(false, Ordering::Release);
        let _ = self.backlog.shutdown().await;
        let handle = self.reactor.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        tracing::info!("replication service stopped");
    }

    /// Whether the reactor is running
    pub fn is_inited(&self) -> bool {
        self.inited.load(Ordering::Acquire)
    }

    /// The producer-facing backlog handle
    pub fn backlog(&self) -> &ReplicationBacklog {
        &self.backlog
    }

    /// Master-side push surface
    pub fn master(&self) -> &Arc<MasterService> {
        &self.master
    }

    /// Follower-side receive surface
    pub fn slave(&self) -> &Arc<SlaveService> {
        &self.slave
    }

    /// Install this service as the process-wide instance. Returns the
    /// installed handle, which is the existing one if a service was
    /// installed before.
    pub fn install(self: Arc<Self>) -> Arc<Self> {
        GLOBAL_SERVICE.get_or_init(|| self).clone()
    }
}

/// Module-level accessor for call sites that cannot thread the handle
pub fn replication_service() -> Option<Arc<ReplicationService>> {
    GLOBAL_SERVICE.get().cloned()
}
