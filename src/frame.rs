//! SSE frame classification and textual repair.
//!
//! Everything here is pure: no I/O, no state. Whether a terminal marker is
//! forwarded or skipped depends on the per-operation [`crate::relay::RelayState`],
//! not on this module.

use once_cell::sync::Lazy;
use regex::Regex;
use std::borrow::Cow;
use tracing::debug;

/// Event-stream data prefix expected on every payload line.
pub const DATA_PREFIX: &str = "data: ";
/// Literal upstream end-of-stream line.
pub const TERMINAL_LINE: &str = "data: [DONE]";
/// Terminal token as it appears after the prefix.
pub const TERMINAL_TOKEN: &str = "[DONE]";

static DOUBLE_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^data:\s*data:").expect("static regex compiles"));

/// A data line after prefix repair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedPayload {
    line: String,
}

impl NormalizedPayload {
    /// Full repaired line, `data: ...`, as forwarded in streaming mode.
    pub fn line(&self) -> &str {
        &self.line
    }

    /// Text after the data prefix.
    pub fn content(&self) -> &str {
        strip_data_prefix(&self.line)
    }
}

/// Classification of one reassembled line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Upstream signalled end of stream.
    Terminal,
    /// Candidate JSON-bearing payload.
    Data(NormalizedPayload),
    /// Anything else: comments, `event:` lines, malformed markers.
    Ignorable,
}

/// Classify one line. Never fails; unknown shapes become [`Frame::Ignorable`].
///
/// Only the exact line `data: [DONE]` is [`Frame::Terminal`]. A payload that
/// merely carries the terminal token, such as `data: data: [DONE]`, is
/// ignorable and does not end the stream.
pub fn classify(line: &str) -> Frame {
    if line == TERMINAL_LINE {
        return Frame::Terminal;
    }
    if !line.starts_with(DATA_PREFIX) {
        debug!(line = %line, "ignoring non-data line");
        return Frame::Ignorable;
    }

    let repaired = repair_prefix(line);
    if let Cow::Owned(ref fixed) = repaired {
        debug!(original = %line, repaired = %fixed, "stripped duplicated data prefix");
    }

    let content = strip_data_prefix(&repaired).trim();
    if content.is_empty() {
        return Frame::Ignorable;
    }
    if is_terminal_token(content) {
        debug!(content = %content, "ignoring stray terminal token");
        return Frame::Ignorable;
    }

    Frame::Data(NormalizedPayload {
        line: repaired.into_owned(),
    })
}

/// Remove one duplicated `data:` layer, e.g. `data: data: {..}` becomes `data: {..}`.
///
/// Lines without a duplicated prefix are returned borrowed and unchanged. Only
/// one layer is removed, so a triple-wrapped line still carries one extra layer.
pub fn repair_prefix(line: &str) -> Cow<'_, str> {
    DOUBLE_PREFIX.replace(line, "data:")
}

/// Close a payload that lost its opening or closing brace.
///
/// Best-effort only: the result is not guaranteed to be valid JSON. Must not be
/// applied to payloads that are forwarded verbatim.
pub fn repair_braces(content: &str) -> Cow<'_, str> {
    let trimmed = content.trim();
    let open = !trimmed.starts_with('{');
    let close = !trimmed.ends_with('}');
    if !open && !close {
        return Cow::Borrowed(trimmed);
    }

    let mut fixed = String::with_capacity(trimmed.len() + 2);
    if open {
        fixed.push('{');
    }
    fixed.push_str(trimmed);
    if close {
        fixed.push('}');
    }
    Cow::Owned(fixed)
}

fn strip_data_prefix(line: &str) -> &str {
    line.strip_prefix("data:")
        .map(|rest| rest.strip_prefix(' ').unwrap_or(rest))
        .unwrap_or(line)
}

fn is_terminal_token(content: &str) -> bool {
    matches!(content, TERMINAL_TOKEN | "DONE]" | "[DONE" | "DONE")
}
