//! Command Frame Encoding
//!
//! The replicated stream is a concatenation of Redis-style command frames.
//! The backlog only ever needs to *produce* frame bytes: commands arrive
//! from the executor with their raw protocol image attached, and the
//! backlog synthesizes `SELECT` preambles itself. Parsing lives with the
//! connection layer and is not part of this crate.

/// A single command destined for the replicated stream.
///
/// `raw` carries the protocol image exactly as it was received from a
/// client, when one exists. Inline commands (the space-separated legacy
/// form) have a raw image that is not valid multi-bulk, so they are
/// re-encoded from `args` instead.
#[derive(Debug, Clone, Default)]
pub struct CommandFrame {
    args: Vec<Vec<u8>>,
    raw: Option<Vec<u8>>,
    inline: bool,
}

impl CommandFrame {
    /// Create a frame from a command name
    pub fn new(name: impl Into<Vec<u8>>) -> Self {
        Self {
            args: vec![name.into()],
            raw: None,
            inline: false,
        }
    }

    /// Append an argument
    pub fn arg(mut self, arg: impl Into<Vec<u8>>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Attach the raw protocol image this command arrived as
    pub fn with_raw(mut self, raw: Vec<u8>, inline: bool) -> Self {
        self.raw = Some(raw);
        self.inline = inline;
        self
    }

    /// Build the `SELECT <ns>` preamble command
    pub fn select(ns: &str) -> Self {
        Self::new("select").arg(ns.as_bytes().to_vec())
    }

    /// Encode as a multi-bulk array into `out`
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(format!("*{}\r\n", self.args.len()).as_bytes());
        for arg in &self.args {
            out.extend_from_slice(format!("${}\r\n", arg.len()).as_bytes());
            out.extend_from_slice(arg);
            out.extend_from_slice(b"\r\n");
        }
    }

    /// Copy the stream bytes for this command into `out`: the raw image
    /// when present and not inline, a fresh multi-bulk encoding otherwise.
    pub fn protocol_bytes_into(&self, out: &mut Vec<u8>) {
        match &self.raw {
            Some(raw) if !raw.is_empty() && !self.inline => out.extend_from_slice(raw),
            _ => self.encode_into(out),
        }
    }

    /// Command arguments
    pub fn args(&self) -> &[Vec<u8>] {
        &self.args
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_multibulk() {
        let mut out = Vec::new();
        CommandFrame::new("set").arg("k").arg("v").encode_into(&mut out);
        assert_eq!(out, b"*3\r\n$3\r\nset\r\n$1\r\nk\r\n$1\r\nv\r\n");
    }

    #[test]
    fn test_select_preamble() {
        let mut out = Vec::new();
        CommandFrame::select("db1").encode_into(&mut out);
        assert_eq!(out, b"*2\r\n$6\r\nselect\r\n$3\r\ndb1\r\n");
    }

    #[test]
    fn test_raw_image_passthrough() {
        let raw = b"*1\r\n$4\r\nping\r\n".to_vec();
        let frame = CommandFrame::new("ping").with_raw(raw.clone(), false);
        let mut out = Vec::new();
        frame.protocol_bytes_into(&mut out);
        assert_eq!(out, raw);
    }

    #[test]
    fn test_inline_command_reencoded() {
        let frame = CommandFrame::new("ping").with_raw(b"ping\r\n".to_vec(), true);
        let mut out = Vec::new();
        frame.protocol_bytes_into(&mut out);
        assert_eq!(out, b"*1\r\n$4\r\nping\r\n");
    }
}
