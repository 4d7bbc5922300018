//! Incremental line reassembly over arbitrary upstream chunks.
//!
//! Upstream chunk boundaries are meaningless: a chunk may hold several lines,
//! part of a line, or part of a multi-byte character. The reassembler keeps the
//! bytes after the last newline seen and only hands out complete lines.

use bytes::{Buf, BytesMut};

/// Splits a byte stream into newline-terminated logical lines.
///
/// Invariant: `buffer` always holds exactly the bytes received after the last
/// `\n`.
#[derive(Debug, Default)]
pub struct LineReassembler {
    buffer: BytesMut,
}

impl LineReassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `chunk` and return every line it completed, in order.
    ///
    /// Blank lines are dropped here and never reach classification.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let raw = self.buffer.split_to(pos);
            self.buffer.advance(1);

            let raw = raw.strip_suffix(b"\r").unwrap_or(&raw);
            if raw.is_empty() {
                continue;
            }
            lines.push(String::from_utf8_lossy(raw).into_owned());
        }
        lines
    }

    /// Bytes currently waiting for a newline.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Take the unterminated remainder at end of stream, if any.
    pub fn finish(&mut self) -> Option<String> {
        if self.buffer.is_empty() {
            return None;
        }
        let rest = self.buffer.split();
        Some(String::from_utf8_lossy(&rest).into_owned())
    }
}
