//! Scripted client for planner/observer/engine tests: replays canned
//! responses in call order instead of making network requests.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::client::{CompletionStream, LlmClient};
use crate::error::{LlmError, LlmResult};
use crate::types::{CompletionRequest, CompletionResponse, FinishReason};

pub struct FakeLlmClient {
    responses: Mutex<Vec<String>>,
    stream_chunks: Mutex<Vec<Vec<String>>>,
    pub calls: AtomicUsize,
}

impl FakeLlmClient {
    pub fn new(responses: Vec<impl Into<String>>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().map(Into::into).collect()),
            stream_chunks: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_stream_chunks(mut self, chunks: Vec<Vec<&str>>) -> Self {
        self.stream_chunks =
            Mutex::new(chunks.into_iter().map(|round| round.into_iter().map(str::to_string).collect()).collect());
        self
    }
}

#[async_trait]
impl LlmClient for FakeLlmClient {
    async fn complete(&self, _request: CompletionRequest) -> LlmResult<CompletionResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut responses = self.responses.lock();
        if responses.is_empty() {
            return Err(LlmError::InvalidRequest("fake client exhausted".into()));
        }
        Ok(CompletionResponse { content: responses.remove(0), finish_reason: FinishReason::Stop })
    }

    async fn complete_stream(&self, _request: CompletionRequest) -> LlmResult<CompletionStream> {
        let mut rounds = self.stream_chunks.lock();
        let chunks = if rounds.is_empty() { Vec::new() } else { rounds.remove(0) };
        let items: Vec<LlmResult<String>> = chunks.into_iter().map(Ok).collect();
        Ok(Box::pin(tokio_stream::iter(items)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::single_turn;

    #[tokio::test]
    async fn replays_responses_in_order() {
        let client = FakeLlmClient::new(vec!["first", "second"]);
        let request = CompletionRequest::new("gpt", single_turn("sys", "hi"));
        let first = client.complete(request.clone()).await.unwrap();
        assert_eq!(first.content, "first");
    }

    #[tokio::test]
    async fn exhausted_client_errors() {
        let client = FakeLlmClient::new(Vec::<String>::new());
        let request = CompletionRequest::new("gpt", single_turn("sys", "hi"));
        assert!(client.complete(request).await.is_err());
    }
}
