//! The provider-agnostic client seam. Planner and Observer call
//! `complete`/`complete_structured`; the Result Formatter calls
//! `complete_stream` so it can forward chunks to the event stream as they
//! arrive instead of buffering a whole response.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use crate::error::LlmResult;
use crate::types::{ChatMessage, CompletionRequest, CompletionResponse};

pub type CompletionStream = Pin<Box<dyn Stream<Item = LlmResult<String>> + Send>>;

#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Plain-text completion, no schema constraint.
    async fn complete(&self, request: CompletionRequest) -> LlmResult<CompletionResponse>;

    /// Completion constrained to `request.json_schema`. The returned string
    /// is expected to parse as JSON matching that schema; callers (planner,
    /// observer) are responsible for validating and retrying on mismatch.
    async fn complete_structured(&self, request: CompletionRequest) -> LlmResult<String> {
        let response = self.complete(request).await?;
        Ok(response.content)
    }

    /// Streams completion text chunk by chunk.
    async fn complete_stream(&self, request: CompletionRequest) -> LlmResult<CompletionStream>;
}

/// Convenience for single-message prompts, used throughout the planner and
/// observer where the whole prompt is one user turn plus a system preamble.
pub fn single_turn(system: impl Into<String>, user: impl Into<String>) -> Vec<ChatMessage> {
    vec![ChatMessage::system(system), ChatMessage::user(user)]
}
