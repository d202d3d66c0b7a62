//! Replication Module
//!
//! The replication backlog and the services around it: the durable
//! command stream a master serves to its followers, the producer-to-reactor
//! handoff from worker threads, the partial-resync handshake, and the
//! service lifecycle.

mod backlog;
mod envelope;
mod follower;
mod master;
mod meta;
pub mod protocol;
mod reactor;
mod service;

pub use backlog::ReplicationBacklog;
pub use envelope::{EnvelopePool, ReplEnvelope};
pub use follower::{SlaveService, SlaveState};
pub use master::{FollowerProgress, MasterService};
pub use meta::{ReplMeta, MAX_NAMESPACE_SIZE, SERVER_KEY_SIZE};
pub use protocol::{decode_frame, encode_frame, HandshakeMessage};
pub use service::{replication_service, ReplicationService};
