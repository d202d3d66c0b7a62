//! Replication Handshake Protocol
//!
//! Offsets and checksums are negotiated out of band before a follower
//! starts mirroring; only these handshake messages ride the framed
//! protocol below. The replication stream itself is raw command-frame
//! bytes with no envelope framing.
//!
//! Wire framing: one magic byte, the payload length (u32 LE), a CRC32
//! over the payload (u32 LE), then the bincode payload.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// First byte of every handshake frame
const FRAME_MAGIC: u8 = 0x57;

/// Bytes before the payload: magic, length, checksum
const FRAME_OVERHEAD: usize = 1 + 4 + 4;

/// Handshake messages exchanged between a master and a follower
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum HandshakeMessage {
    /// Follower's resume request: the stream identity it holds, the
    /// offset it wants to resume at, and its running checksum through
    /// that offset (0 opts out of verification)
    PSync {
        repl_key: String,
        offset: u64,
        cksm: u64,
    },

    /// Master's answer when the follower must restart from a snapshot
    FullResync {
        repl_key: String,
        offset: u64,
        cksm: u64,
    },

    /// Master's answer when the follower may resume where it left off
    Continue { offset: u64 },

    /// Follower progress report
    Ack { offset: u64 },

    /// Liveness probe
    Ping,
}

impl std::fmt::Display for HandshakeMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HandshakeMessage::PSync { offset, .. } => write!(f, "psync(offset={offset})"),
            HandshakeMessage::FullResync { offset, .. } => {
                write!(f, "full-resync(offset={offset})")
            }
            HandshakeMessage::Continue { offset } => write!(f, "continue(offset={offset})"),
            HandshakeMessage::Ack { offset } => write!(f, "ack(offset={offset})"),
            HandshakeMessage::Ping => write!(f, "ping"),
        }
    }
}

/// Encode a handshake message as one framed unit
pub fn encode_frame(msg: &HandshakeMessage) -> Result<Vec<u8>> {
    let payload = bincode::serialize(msg)?;
    let mut out = Vec::with_capacity(FRAME_OVERHEAD + payload.len());
    out.push(FRAME_MAGIC);
    out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    out.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
    out.extend_from_slice(&payload);
    Ok(out)
}

/// Decode one framed handshake message, returning it and the bytes
/// consumed. Errors on a bad magic byte, short input, or checksum
/// mismatch.
pub fn decode_frame(bytes: &[u8]) -> Result<(HandshakeMessage, usize)> {
    if bytes.len() < FRAME_OVERHEAD {
        return Err(Error::FrameCorrupted("short frame header".into()));
    }
    if bytes[0] != FRAME_MAGIC {
        return Err(Error::FrameCorrupted(format!(
            "bad frame magic {:#04x}",
            bytes[0]
        )));
    }
    let length = u32::from_le_bytes(bytes[1..5].try_into().unwrap()) as usize;
    let checksum = u32::from_le_bytes(bytes[5..9].try_into().unwrap());
    let total = FRAME_OVERHEAD + length;
    if bytes.len() < total {
        return Err(Error::FrameCorrupted("short frame payload".into()));
    }
    let payload = &bytes[FRAME_OVERHEAD..total];
    if crc32fast::hash(payload) != checksum {
        return Err(Error::FrameCorrupted("frame checksum mismatch".into()));
    }
    Ok((bincode::deserialize(payload)?, total))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_roundtrip() {
        let msg = HandshakeMessage::PSync {
            repl_key: "a".repeat(40),
            offset: 12345,
            cksm: 0xfeed,
        };
        let frame = encode_frame(&msg).unwrap();
        let (decoded, consumed) = decode_frame(&frame).unwrap();
        assert_eq!(decoded, msg);
        assert_eq!(consumed, frame.len());
    }

    #[test]
    fn test_back_to_back_frames() {
        let first = HandshakeMessage::Continue { offset: 99 };
        let second = HandshakeMessage::Ack { offset: 120 };
        let mut buf = encode_frame(&first).unwrap();
        buf.extend_from_slice(&encode_frame(&second).unwrap());

        let (decoded, consumed) = decode_frame(&buf).unwrap();
        assert_eq!(decoded, first);
        let (decoded, rest) = decode_frame(&buf[consumed..]).unwrap();
        assert_eq!(decoded, second);
        assert_eq!(consumed + rest, buf.len());
    }

    #[test]
    fn test_corrupted_payload_rejected() {
        let mut frame = encode_frame(&HandshakeMessage::Ping).unwrap();
        let last = frame.len() - 1;
        frame[last] ^= 0xff;
        assert!(matches!(
            decode_frame(&frame),
            Err(Error::FrameCorrupted(_))
        ));
    }

    #[test]
    fn test_bad_magic_rejected() {
        let mut frame = encode_frame(&HandshakeMessage::Ping).unwrap();
        frame[0] = 0x00;
        assert!(matches!(
            decode_frame(&frame),
            Err(Error::FrameCorrupted(_))
        ));
    }

    #[test]
    fn test_short_frame_rejected() {
        let frame = encode_frame(&HandshakeMessage::Ping).unwrap();
        assert!(decode_frame(&frame[..frame.len() - 1]).is_err());
        assert!(decode_frame(&frame[..4]).is_err());
    }

    #[test]
    fn test_display_labels() {
        assert_eq!(
            HandshakeMessage::Continue { offset: 7 }.to_string(),
            "continue(offset=7)"
        );
        assert_eq!(HandshakeMessage::Ping.to_string(), "ping");
    }
}
