//! WolfCache Error Types

use thiserror::Error;

/// Result type alias for wolfcache operations
pub type Result<T> = std::result::Result<T, Error>;

/// WolfCache replication error types
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(#[from] toml::de::Error),

    // WAL errors
    #[error("WAL error: {0}")]
    Wal(String),

    #[error("WAL metadata corrupted: {0}")]
    WalCorrupted(String),

    #[error("Offset {requested} no longer retained (backlog starts at {start})")]
    StaleOffset { requested: u64, start: u64 },

    #[error("Replay window [{from}, {to}) exceeds log end {end}")]
    ReplayOutOfRange { from: u64, to: u64, end: u64 },

    // Handoff errors
    #[error("Replication service not ready")]
    NotReady,

    #[error("Replication queue is full")]
    ChannelFull,

    // Handshake protocol errors
    #[error("Handshake serialization error: {0}")]
    Frame(#[from] bincode::Error),

    #[error("Handshake frame corrupted: {0}")]
    FrameCorrupted(String),

    // Replication errors
    #[error("Replication error: {0}")]
    Replication(String),

    #[error("Shutdown in progress")]
    ShuttingDown,

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Check if this error means the entry was rejected before queueing
    /// and the caller should drop it rather than retry.
    pub fn is_queue_reject(&self) -> bool {
        matches!(self, Error::NotReady | Error::ChannelFull)
    }
}
