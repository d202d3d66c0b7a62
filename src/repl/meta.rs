//! Replication Metadata Record
//!
//! `ReplMeta` lives inside the WAL's inline user-meta area and survives
//! restarts together with the log offsets. It carries the instance's
//! permanent server identity, the identity of the replication stream it
//! currently serves (its own, until a master hands it one), and the
//! namespace the next log entry belongs to.

use rand::Rng;

/// Byte length of server and replication keys
pub const SERVER_KEY_SIZE: usize = 40;

/// Maximum byte length of a namespace name
pub const MAX_NAMESPACE_SIZE: usize = 64;

/// Packed layout: server key, repl key, self-generated flag,
/// namespace length, namespace bytes.
const SERVER_KEY_AT: usize = 0;
const REPL_KEY_AT: usize = SERVER_KEY_AT + SERVER_KEY_SIZE;
const SELF_GEN_AT: usize = REPL_KEY_AT + SERVER_KEY_SIZE;
const NS_SIZE_AT: usize = SELF_GEN_AT + 1;
const NS_AT: usize = NS_SIZE_AT + 2;

/// Total bytes `ReplMeta` needs inside the user-meta area
pub const REPL_META_SIZE: usize = NS_AT + MAX_NAMESPACE_SIZE;

/// Replication identity and namespace state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplMeta {
    /// Permanent 40-hex identity of this data directory
    pub server_key: String,
    /// Identity of the replication stream; equals `server_key` until a
    /// master's key is adopted on full sync
    pub repl_key: String,
    /// True while `repl_key` has never been overwritten by a peer
    pub repl_key_self_generated: bool,
    /// Namespace the next log entry belongs to
    pub select_ns: Option<String>,
}

impl ReplMeta {
    /// Parse from the user-meta area. A zeroed area reads back as an
    /// empty record, which `is_fresh` detects.
    pub fn load(area: &[u8]) -> Self {
        debug_assert!(area.len() >= REPL_META_SIZE);
        let ns_size = u16::from_le_bytes([area[NS_SIZE_AT], area[NS_SIZE_AT + 1]]) as usize;
        let select_ns = if ns_size > 0 && ns_size <= MAX_NAMESPACE_SIZE {
            Some(String::from_utf8_lossy(&area[NS_AT..NS_AT + ns_size]).into_owned())
        } else {
            None
        };
        Self {
            server_key: read_key(&area[SERVER_KEY_AT..SERVER_KEY_AT + SERVER_KEY_SIZE]),
            repl_key: read_key(&area[REPL_KEY_AT..REPL_KEY_AT + SERVER_KEY_SIZE]),
            repl_key_self_generated: area[SELF_GEN_AT] != 0,
            select_ns,
        }
    }

    /// Write the packed record into the user-meta area. Key slots are
    /// zero-padded so bytes of a previously longer key never survive.
    pub fn store(&self, area: &mut [u8]) {
        debug_assert!(area.len() >= REPL_META_SIZE);
        write_key(
            &mut area[SERVER_KEY_AT..SERVER_KEY_AT + SERVER_KEY_SIZE],
            &self.server_key,
        );
        write_key(
            &mut area[REPL_KEY_AT..REPL_KEY_AT + SERVER_KEY_SIZE],
            &self.repl_key,
        );
        area[SELF_GEN_AT] = self.repl_key_self_generated as u8;
        let ns = self.select_ns.as_deref().unwrap_or("");
        let ns_len = ns.len().min(MAX_NAMESPACE_SIZE);
        area[NS_SIZE_AT..NS_SIZE_AT + 2].copy_from_slice(&(ns_len as u16).to_le_bytes());
        area[NS_AT..NS_AT + MAX_NAMESPACE_SIZE].fill(0);
        area[NS_AT..NS_AT + ns_len].copy_from_slice(&ns.as_bytes()[..ns_len]);
    }

    /// Whether the area has never held an identity
    pub fn is_fresh(area: &[u8]) -> bool {
        area[SERVER_KEY_AT] == 0
    }

    /// Fresh record with a newly generated identity
    pub fn generate() -> Self {
        let key = random_hex_string(SERVER_KEY_SIZE);
        Self {
            server_key: key.clone(),
            repl_key: key,
            repl_key_self_generated: true,
            select_ns: None,
        }
    }

    /// Adopt a peer's replication key (truncated to the key size,
    /// shorter keys stored zero-padded).
    pub fn set_repl_key(&mut self, key: &str) {
        let take = key.len().min(SERVER_KEY_SIZE);
        self.repl_key = key[..take].to_string();
        self.repl_key_self_generated = false;
    }
}

fn read_key(slot: &[u8]) -> String {
    let len = slot.iter().position(|&b| b == 0).unwrap_or(slot.len());
    String::from_utf8_lossy(&slot[..len]).into_owned()
}

fn write_key(slot: &mut [u8], key: &str) {
    slot.fill(0);
    let take = key.len().min(slot.len());
    slot[..take].copy_from_slice(&key.as_bytes()[..take]);
}

/// Random lowercase hex string, used for server identities
pub fn random_hex_string(len: usize) -> String {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| HEX[rng.gen_range(0..16)] as char)
        .collect()
}
