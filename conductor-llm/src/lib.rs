//! Provider-agnostic LLM client used by the planner, observer, and result
//! formatter. None of those components talk to `reqwest` or a specific
//! vendor's wire format directly — they go through `LlmClient`.

pub mod client;
pub mod error;
pub mod http;
pub mod types;

#[cfg(any(test, feature = "fake"))]
pub mod fake;

pub use client::{single_turn, CompletionStream, LlmClient};
pub use error::{LlmError, LlmResult};
pub use http::HttpLlmClient;
pub use types::{ChatMessage, CompletionRequest, CompletionResponse, FinishReason, Role};
