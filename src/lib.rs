//! WolfCache - Replication Backlog Engine
//!
//! The replication core of the WolfCache data server: a durable, bounded,
//! ring-structured command log that lets an instance stream committed
//! writes to followers as a master, or mirror a master's stream as a
//! follower.
//!
//! # Architecture
//!
//! Worker threads finish executing a write and hand the encoded command
//! to the backlog; a single reactor task appends it to the ring WAL,
//! injecting `SELECT` namespace preambles where the stream switches
//! logical databases, and wakes the master-side pusher. Reconnecting
//! followers prove their position with an offset/CRC-64 handshake and
//! resume from the retained window instead of taking a full snapshot.
//!
//! # Features
//!
//! - Fixed-capacity ring WAL with stable logical offsets across wraps
//! - Running CRC-64 over the whole stream history for resync validation
//! - Persistent server / replication-stream identity
//! - Lock-free producer handoff; a single reactor task owns all state
//! - Master push and follower receive surfaces for the connection layer

pub mod codec;
pub mod config;
pub mod error;
pub mod repl;
pub mod wal;

pub use config::WolfCacheConfig;
pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::codec::CommandFrame;
    pub use crate::config::{ReplicationConfig, WolfCacheConfig};
    pub use crate::error::{Error, Result};
    pub use crate::repl::{
        replication_service, HandshakeMessage, MasterService, ReplicationBacklog,
        ReplicationService, SlaveService,
    };
    pub use crate::wal::{RingWal, RingWalOptions};
}
