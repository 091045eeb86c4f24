//! Judges whether the run has gathered enough to answer the original
//! query. Combines an LLM sufficiency check with a purely mechanical
//! multi-target gate that the LLM's verdict can never override (spec
//! §4.4): if the query names three handles, all three must show up in a
//! successful step's result before the run is allowed to conclude.

use std::sync::Arc;

use conductor_llm::{single_turn, CompletionRequest, LlmClient};
use conductor_workflow::EngineState;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::EngineResult;

#[derive(Debug, Clone, Deserialize, Serialize)]
struct ObserverVerdict {
    complete: bool,
    #[serde(default)]
    missing: Option<String>,
}

pub struct Observer {
    llm: Arc<dyn LlmClient>,
    model: String,
}

impl Observer {
    pub fn new(llm: Arc<dyn LlmClient>, model: impl Into<String>) -> Self {
        Self { llm, model: model.into() }
    }

    /// `true` once every extracted target is covered by a successful
    /// step's result *and* the LLM agrees the data answers the query.
    pub async fn is_complete(&self, state: &EngineState) -> EngineResult<bool> {
        let targets = extract_targets(&state.original_query);
        if !targets.is_empty() {
            let all_covered = targets.iter().all(|target| covered_by_any_step(state, target));
            if !all_covered {
                debug!(?targets, "multi-target gate not yet satisfied");
                return Ok(false);
            }
        }

        if state.history.is_empty() {
            return Ok(false);
        }

        let verdict = self.judge(state).await?;
        Ok(verdict.complete)
    }

    async fn judge(&self, state: &EngineState) -> EngineResult<ObserverVerdict> {
        let results = state
            .successful_steps()
            .map(|s| s.raw_result.clone().unwrap_or(Value::Null).to_string())
            .collect::<Vec<_>>()
            .join("\n");
        let prompt = format!(
            "Original query: {}\nCollected results so far:\n{results}\n\nDoes this fully answer the query?",
            state.original_query
        );
        let request = CompletionRequest::new(
            &self.model,
            single_turn("Judge whether the collected data sufficiently answers the user's query. Respond with JSON {\"complete\": bool, \"missing\": string|null}.", prompt),
        )
        .with_json_schema(serde_json::json!({
            "type": "object",
            "properties": {"complete": {"type": "boolean"}, "missing": {"type": ["string", "null"]}},
            "required": ["complete"],
        }))
        .with_temperature(0.0);

        let raw = self.llm.complete_structured(request).await?;
        Ok(serde_json::from_str(&raw).unwrap_or(ObserverVerdict { complete: false, missing: Some(raw) }))
    }
}

fn covered_by_any_step(state: &EngineState, target: &str) -> bool {
    let needle = target.to_lowercase();
    state.successful_steps().any(|step| {
        step.raw_result.as_ref().map(|v| v.to_string().to_lowercase().contains(&needle)).unwrap_or(false)
    })
}

/// Pulls out identifiers the query demands be present before the run can
/// conclude: `@handle` mentions, or a comma/and-separated list following a
/// pluralizing cue word ("coins", "tokens", "handles", ...). Re-run fresh
/// every call — never cached — since later steps can only add targets the
/// earlier regex pass on the immutable query already found, so caching
/// would buy nothing but staleness risk.
fn extract_targets(query: &str) -> Vec<String> {
    let handle_re = Regex::new(r"@\w+").unwrap();
    let handles: Vec<String> = handle_re.find_iter(query).map(|m| m.as_str().to_string()).collect();
    if !handles.is_empty() {
        return handles;
    }

    let list_re = Regex::new(
        r"(?i)\b(?:coins?|tokens?|handles?|accounts?)\b[^.:]*?:\s*([A-Za-z0-9_$.\-]+(?:\s*,\s*[A-Za-z0-9_$.\-]+)*(?:\s*,?\s*(?:and|&)\s*[A-Za-z0-9_$.\-]+)?)",
    )
    .unwrap();
    if let Some(caps) = list_re.captures(query) {
        let list = caps.get(1).unwrap().as_str();
        return Regex::new(r"\s*(?:,|&|\band\b)\s*")
            .unwrap()
            .split(list)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
    }

    Vec::new()
}

#[cfg(test)]
mod tests {
    use super::*;
    use conductor_llm::fake::FakeLlmClient;
    use conductor_workflow::{StepKind, WorkflowStep};

    #[test]
    fn extracts_twitter_handles() {
        let targets = extract_targets("compare follower counts for @vitalik, @cz_binance and @saylor");
        assert_eq!(targets, vec!["@vitalik", "@cz_binance", "@saylor"]);
    }

    #[test]
    fn extracts_comma_separated_coin_list() {
        let targets = extract_targets("show me the price for coins: BTC, ETH, and SOL");
        assert_eq!(targets, vec!["BTC", "ETH", "SOL"]);
    }

    #[test]
    fn no_targets_for_a_single_item_query() {
        assert!(extract_targets("what's the current fear and greed index").is_empty());
    }

    #[tokio::test]
    async fn blocks_completion_until_every_target_covered() {
        let llm = Arc::new(FakeLlmClient::new(vec![serde_json::json!({"complete": true}).to_string()]));
        let observer = Observer::new(llm, "test-model");

        let mut state = EngineState::new("show coins: BTC, ETH, and SOL", "en");
        let mut step = WorkflowStep::new(
            0,
            StepKind::Mcp { mcp_name: "dexscreener-mcp".into(), tool: "get_price".into() },
            serde_json::json!({}),
            "price".into(),
            "r".into(),
        );
        step.start_attempt();
        step.succeed(serde_json::json!({"symbol": "BTC", "usd": 50000}));
        state.push_completed(step);

        assert!(!observer.is_complete(&state).await.unwrap());
    }

    #[tokio::test]
    async fn completes_once_all_targets_covered_and_llm_agrees() {
        let llm = Arc::new(FakeLlmClient::new(vec![serde_json::json!({"complete": true}).to_string()]));
        let observer = Observer::new(llm, "test-model");

        let mut state = EngineState::new("show coins: BTC, ETH", "en");
        for (i, symbol) in ["BTC", "ETH"].iter().enumerate() {
            let mut step = WorkflowStep::new(
                i,
                StepKind::Mcp { mcp_name: "dexscreener-mcp".into(), tool: "get_price".into() },
                serde_json::json!({}),
                "price".into(),
                "r".into(),
            );
            step.start_attempt();
            step.succeed(serde_json::json!({"symbol": symbol, "usd": 1}));
            state.push_completed(step);
        }

        assert!(observer.is_complete(&state).await.unwrap());
    }
}
