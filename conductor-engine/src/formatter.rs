//! Turns a step's raw result into the prose shown to the user, streaming
//! chunks as they arrive so the caller can forward them onto the event
//! stream instead of waiting on the whole response (spec §4.4).

use std::sync::Arc;

use conductor_llm::{single_turn, CompletionRequest, LlmClient};
use conductor_workflow::StepKind;
use futures::{Stream, StreamExt};
use serde_json::Value;

use crate::error::EngineResult;

/// A 50KB raw blob must never reach the formatting LLM call whole; the spec
/// bounds the pre-trim to 2000 characters before the prompt is built.
const MAX_RAW_CHARS_FOR_PROMPT: usize = 2000;

pub struct ResultFormatter {
    llm: Arc<dyn LlmClient>,
    model: String,
}

impl ResultFormatter {
    pub fn new(llm: Arc<dyn LlmClient>, model: impl Into<String>) -> Self {
        Self { llm, model: model.into() }
    }

    /// Formats an MCP tool result into streaming markdown chunks. LLM-kind
    /// steps are pass-through: their raw result already *is* prose, so it is
    /// re-emitted as a single chunk rather than sent back through the model.
    ///
    /// `language` is the run's resolved language (spec §4.7); every
    /// user-visible prompt carries it so the output obeys the same
    /// directive regardless of which step produced it.
    pub async fn format(
        &self,
        kind: &StepKind,
        expected_output: &str,
        raw: &Value,
        language: &str,
    ) -> EngineResult<impl Stream<Item = String>> {
        if matches!(kind, StepKind::Llm { .. }) {
            let text = raw.as_str().map(str::to_string).unwrap_or_else(|| raw.to_string());
            return Ok(futures::stream::once(async move { text }).boxed());
        }

        let trimmed = trim_raw(raw);
        let prompt = format!("Expected output: {expected_output}\nRaw tool result:\n{trimmed}");
        let request = CompletionRequest::new(
            &self.model,
            single_turn(
                format!(
                    "Render the tool result as concise markdown for the end user. Do not invent \
                     data that isn't present. Write the response in {language} (ISO 639-1), \
                     regardless of what language the raw result is in."
                ),
                prompt,
            ),
        );
        let stream = self.llm.complete_stream(request).await?;
        Ok(stream.map(|chunk| chunk.unwrap_or_default()).boxed())
    }
}

/// Truncates an oversized raw blob to `MAX_RAW_CHARS_FOR_PROMPT` characters
/// before it reaches the formatting prompt. Truncates on the serialized
/// form so the cutoff point is stable regardless of the JSON shape.
fn trim_raw(raw: &Value) -> String {
    let serialized = raw.to_string();
    if serialized.chars().count() <= MAX_RAW_CHARS_FOR_PROMPT {
        return serialized;
    }
    let truncated: String = serialized.chars().take(MAX_RAW_CHARS_FOR_PROMPT).collect();
    format!("{truncated}... [truncated]")
}

#[cfg(test)]
mod tests {
    use super::*;
    use conductor_llm::fake::FakeLlmClient;
    use futures::StreamExt;

    #[tokio::test]
    async fn llm_kind_steps_pass_through_unchanged() {
        let llm = Arc::new(FakeLlmClient::new(Vec::<String>::new()));
        let formatter = ResultFormatter::new(llm, "test-model");
        let stream = formatter
            .format(&StepKind::Llm { capability: "summarize".into() }, "summary", &Value::String("already prose".into()), "en")
            .await
            .unwrap();
        let chunks: Vec<String> = stream.collect().await;
        assert_eq!(chunks, vec!["already prose".to_string()]);
    }

    #[tokio::test]
    async fn mcp_kind_steps_stream_formatted_chunks() {
        let llm = Arc::new(FakeLlmClient::new(Vec::<String>::new()).with_stream_chunks(vec![vec!["**Fear", " & Greed**: 72"]]));
        let formatter = ResultFormatter::new(llm, "test-model");
        let stream = formatter
            .format(
                &StepKind::Mcp { mcp_name: "coingecko-mcp".into(), tool: "get_current_fng_tool".into() },
                "fear and greed index",
                &serde_json::json!({"value": 72}),
                "en",
            )
            .await
            .unwrap();
        let joined: String = stream.collect::<Vec<_>>().await.join("");
        assert_eq!(joined, "**Fear & Greed**: 72");
    }

    #[test]
    fn trims_oversized_raw_blobs_before_prompting() {
        let huge = Value::String("x".repeat(50_000));
        let trimmed = trim_raw(&huge);
        assert!(trimmed.chars().count() <= MAX_RAW_CHARS_FOR_PROMPT + "... [truncated]".len());
    }
}
