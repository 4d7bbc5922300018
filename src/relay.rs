//! Relay of one upstream SSE body to the caller.
//!
//! Two consumers share the same reassembly and classification front end:
//! - [`SseRelayStream`] re-emits every data line as its own SSE event,
//!   one event per stream item, before the next upstream chunk is polled.
//! - [`collect_buffered`] drains the upstream and returns the concatenated
//!   text deltas.

use bytes::Bytes;
use futures_util::stream::{Stream, StreamExt};
use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll};
use tracing::{debug, warn};

use crate::delta::{extract_delta, extract_whole_body};
use crate::error::{RelayError, Result};
use crate::frame::{classify, Frame, TERMINAL_LINE};
use crate::reassembler::LineReassembler;

/// Lifecycle of one streaming relay operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RelayState {
    /// Forwarding data lines.
    #[default]
    Streaming,
    /// Terminal marker forwarded; remaining upstream input is drained silently.
    ///
    /// Data lines arriving here are dropped too, not only repeated markers:
    /// SSE clients stop reading at `data: [DONE]`.
    Terminating,
    /// Upstream exhausted; nothing more will be emitted.
    Closed,
}

/// What the relay loop does with one classified line.
#[derive(Debug)]
pub enum LineOutcome {
    /// Forward this SSE event.
    Emit(Bytes),
    /// Drop the line and keep going.
    Skip,
    /// Forward the terminal event; the stream is ending.
    Terminate(Bytes),
    /// Abort the operation. Only produced when a line is fed to a relay that
    /// has already been closed, which a correctly driven relay never does.
    Fail(RelayError),
}

/// Frame a line as one SSE event (`<line>\n\n`).
pub fn sse_event(line: &str) -> Bytes {
    let mut out = String::with_capacity(line.len() + 2);
    out.push_str(line);
    out.push_str("\n\n");
    Bytes::from(out)
}

impl RelayState {
    /// Decide the outcome of `frame` and advance the state.
    pub fn decide(&mut self, frame: Frame) -> LineOutcome {
        match (*self, frame) {
            (RelayState::Streaming, Frame::Data(payload)) => {
                LineOutcome::Emit(sse_event(payload.line()))
            }
            (RelayState::Streaming, Frame::Terminal) => {
                *self = RelayState::Terminating;
                LineOutcome::Terminate(sse_event(TERMINAL_LINE))
            }
            (RelayState::Terminating, Frame::Terminal) => {
                debug!("skipping repeated terminal marker");
                LineOutcome::Skip
            }
            (RelayState::Terminating, Frame::Data(payload)) => {
                debug!(line = %payload.line(), "skipping data after terminal marker");
                LineOutcome::Skip
            }
            // Guards against feeding lines after `close`.
            (RelayState::Closed, _) => LineOutcome::Fail(RelayError::Transport(
                "line received after relay closed".into(),
            )),
            (_, Frame::Ignorable) => LineOutcome::Skip,
        }
    }

    /// Mark upstream exhaustion. Returns the terminal event to synthesize when
    /// upstream ended without sending one.
    pub fn close(&mut self) -> Option<Bytes> {
        let was = std::mem::replace(self, RelayState::Closed);
        match was {
            RelayState::Streaming => Some(sse_event(TERMINAL_LINE)),
            RelayState::Terminating | RelayState::Closed => None,
        }
    }
}

/// Streaming re-emitter over an upstream byte stream.
pub struct SseRelayStream<S> {
    inner: S,
    lines: LineReassembler,
    state: RelayState,
    pending: VecDeque<Bytes>,
    chunks: usize,
}

impl<S> SseRelayStream<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            lines: LineReassembler::new(),
            state: RelayState::default(),
            pending: VecDeque::new(),
            chunks: 0,
        }
    }

    pub fn state(&self) -> RelayState {
        self.state
    }

    fn absorb(&mut self, chunk: &[u8]) -> std::result::Result<(), RelayError> {
        self.chunks += 1;
        debug!(chunk = self.chunks, bytes = chunk.len(), "upstream chunk");
        for line in self.lines.feed(chunk) {
            match self.state.decide(classify(&line)) {
                LineOutcome::Emit(event) | LineOutcome::Terminate(event) => {
                    self.pending.push_back(event)
                }
                LineOutcome::Skip => {}
                LineOutcome::Fail(err) => return Err(err),
            }
        }
        Ok(())
    }

    fn finish(&mut self) {
        if let Some(rest) = self.lines.finish() {
            warn!(remainder = %rest, "discarding unterminated upstream data");
        }
        if let Some(done) = self.state.close() {
            debug!("upstream ended without terminal marker; synthesizing one");
            self.pending.push_back(done);
        }
        debug!(chunks = self.chunks, "upstream stream finished");
    }
}

impl<S, E> Stream for SseRelayStream<S>
where
    S: Stream<Item = std::result::Result<Bytes, E>> + Unpin,
    E: std::fmt::Display,
{
    type Item = std::result::Result<Bytes, std::io::Error>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        loop {
            if let Some(event) = this.pending.pop_front() {
                return Poll::Ready(Some(Ok(event)));
            }

            if this.state == RelayState::Closed {
                return Poll::Ready(None);
            }

            match Pin::new(&mut this.inner).poll_next(cx) {
                Poll::Ready(Some(Ok(chunk))) => {
                    if let Err(err) = this.absorb(&chunk) {
                        this.state = RelayState::Closed;
                        this.pending.clear();
                        return Poll::Ready(Some(Err(std::io::Error::other(err.to_string()))));
                    }
                }
                Poll::Ready(Some(Err(err))) => {
                    warn!(error = %err, "upstream read failed mid-stream");
                    this.state = RelayState::Closed;
                    this.pending.clear();
                    return Poll::Ready(Some(Err(std::io::Error::other(err.to_string()))));
                }
                Poll::Ready(None) => this.finish(),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

/// Drain `upstream` and return the accumulated text deltas.
///
/// Data lines are brace-repaired and parsed; unparsable lines are skipped.
/// When no text was produced, the raw body is parsed as a single JSON object
/// with a top-level `content` field instead.
pub async fn collect_buffered<S, E>(mut upstream: S) -> Result<String>
where
    S: Stream<Item = std::result::Result<Bytes, E>> + Unpin,
    E: std::fmt::Display,
{
    let mut lines = LineReassembler::new();
    let mut raw = Vec::new();
    let mut accumulated = String::new();
    let mut skipped = 0usize;

    while let Some(chunk) = upstream.next().await {
        let chunk = chunk.map_err(|e| RelayError::Transport(e.to_string()))?;
        raw.extend_from_slice(&chunk);

        for line in lines.feed(&chunk) {
            match classify(&line) {
                Frame::Data(payload) => match extract_delta(&payload) {
                    Some(fragment) => accumulated.push_str(&fragment),
                    None => skipped += 1,
                },
                Frame::Terminal => debug!("buffered relay saw terminal marker"),
                Frame::Ignorable => {}
            }
        }
    }

    if let Some(rest) = lines.finish() {
        warn!(remainder = %rest, "discarding unterminated upstream data");
    }
    debug!(
        chars = accumulated.chars().count(),
        skipped, "buffered upstream consumed"
    );

    if !accumulated.is_empty() {
        return Ok(accumulated);
    }

    let body = String::from_utf8_lossy(&raw);
    debug!("no deltas extracted; parsing whole body");
    extract_whole_body(&body)
}
