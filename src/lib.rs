#![forbid(unsafe_code)]
#![doc = r#"
chatrelay

Relay OpenAI-style Chat Completions requests to a single upstream chat API that answers with
Server-Sent Events, and hand the answer back either as a re-framed SSE stream or as one
buffered `chat.completion` object.

Crate highlights
- Streaming relay: `relay::SseRelayStream` wraps any upstream byte stream and emits one SSE event
  per data line, repairing doubled `data:` prefixes and forwarding `data: [DONE]` exactly once.
- Buffered relay: `relay::collect_buffered` concatenates `choices[0].delta.content` deltas,
  skipping malformed lines, with a whole-body fallback.
- HTTP server (in `server`): `/v1/chat/completions`, `/v1/models`, `/status`.

Modules
- `reassembler`: newline reassembly over arbitrary chunk boundaries.
- `frame`: SSE line classification and prefix/brace repair.
- `delta`: text delta extraction.
- `relay`: per-request state machine, streaming and buffered consumers.
- `upstream`: single-attempt upstream client.
- `model_map`: caller model id → upstream id table.
- `util`: tracing, env, HTTP client and CORS helpers.
"#]

pub mod delta;
pub mod error;
pub mod frame;
pub mod model_map;
pub mod models;
pub mod reassembler;
pub mod relay;
pub mod server;
pub mod upstream;
pub mod user_agent;
pub mod util;

pub use crate::error::RelayError;
pub use crate::frame::{classify, repair_braces, repair_prefix, Frame, NormalizedPayload};
pub use crate::model_map::{ModelAlias, ModelMap, DEFAULT_MODEL};
pub use crate::reassembler::LineReassembler;
pub use crate::relay::{collect_buffered, LineOutcome, RelayState, SseRelayStream};
pub use crate::upstream::UpstreamClient;
