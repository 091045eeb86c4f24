//! Turns the running state into the next step to execute, or a decision to
//! stop (spec §4.2). Decisions are returned as structured JSON so the loop
//! never has to regex a prose response.

use std::sync::Arc;

use conductor_llm::{single_turn, CompletionRequest, LlmClient};
use conductor_workflow::{AgentDescriptor, EngineState, StepKind, LLM_CAPABILITIES};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::error::{EngineError, EngineResult};

const MAX_REPAIR_ATTEMPTS: u32 = 2;

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConcludeReason {
    ObserverComplete,
    PlannerFailure,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum PlanDecision {
    Execute {
        kind: StepKind,
        args: Value,
        expected_output: String,
        reasoning: String,
    },
    Conclude {
        reason: ConcludeReason,
        summary: Option<String>,
    },
}

pub struct Planner {
    llm: Arc<dyn LlmClient>,
    model: String,
}

impl Planner {
    pub fn new(llm: Arc<dyn LlmClient>, model: impl Into<String>) -> Self {
        Self { llm, model: model.into() }
    }

    /// Asks the LLM for the next decision. Malformed JSON is retried with a
    /// follow-up "repair" prompt up to `MAX_REPAIR_ATTEMPTS` times before
    /// surfacing as `PlannerFailure` (spec §4.2, §8).
    pub async fn plan(&self, state: &EngineState, agent: &AgentDescriptor) -> EngineResult<PlanDecision> {
        let prompt = compose_prompt(state, agent);
        let mut last_error = String::new();

        for attempt in 0..=MAX_REPAIR_ATTEMPTS {
            let user_prompt =
                if attempt == 0 { prompt.clone() } else { format!("{prompt}\n\nYour previous response was not valid JSON ({last_error}). Respond with JSON only.") };
            let request = CompletionRequest::new(&self.model, single_turn(SYSTEM_PREAMBLE, user_prompt))
                .with_json_schema(decision_schema())
                .with_temperature(0.0);

            let raw = self.llm.complete_structured(request).await?;
            match serde_json::from_str::<PlanDecision>(&raw) {
                Ok(decision) => {
                    if let Err(reason) = validate(&decision, agent) {
                        warn!(attempt, reason, "planner proposed an invalid action");
                        last_error = reason;
                        continue;
                    }
                    return Ok(decision);
                }
                Err(e) => {
                    warn!(attempt, error = %e, "planner returned malformed JSON");
                    last_error = e.to_string();
                }
            }
        }

        Err(EngineError::PlannerFailure(last_error))
    }
}

const SYSTEM_PREAMBLE: &str = "You are the planning component of a task-automation agent. \
Decide the single next step toward the user's goal, or conclude the run. \
Do not propose the same tool call on the same MCP server you already used \
successfully unless the history shows it is genuinely needed again with \
different arguments. Respond with JSON only, matching the provided schema.";

fn compose_prompt(state: &EngineState, agent: &AgentDescriptor) -> String {
    let catalogue = agent
        .tool_catalogue()
        .iter()
        .map(|(mcp, tools)| format!("- {mcp}: {}", tools.join(", ")))
        .collect::<Vec<_>>()
        .join("\n");

    let history = state
        .history
        .iter()
        .map(|step| {
            format!(
                "step {}: {} -> {}",
                step.index,
                step.kind.tool_name(),
                if step.is_success() { "ok" } else { "failed" }
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "Mission: {}\nOriginal query: {}\nLanguage: {}\nAvailable MCP tools:\n{catalogue}\nAvailable LLM capabilities: {}\nHistory so far:\n{history}",
        agent.mission,
        state.original_query,
        state.user_language,
        LLM_CAPABILITIES.join(", "),
    )
}

/// Rejects a proposed tool call against a server/capability the agent does
/// not actually have (spec §4.2's validation gate), so a hallucinated tool
/// name is treated the same as malformed JSON — it triggers the repair
/// retry rather than reaching the executor.
fn validate(decision: &PlanDecision, agent: &AgentDescriptor) -> Result<(), String> {
    let PlanDecision::Execute { kind, .. } = decision else { return Ok(()) };
    match kind {
        StepKind::Mcp { mcp_name, tool } => match agent.mcp(mcp_name) {
            Some(handle) if handle.has_tool(tool) => Ok(()),
            Some(_) => Err(format!("mcp '{mcp_name}' has no tool '{tool}'")),
            None => Err(format!("agent has no mcp server '{mcp_name}'")),
        },
        StepKind::Llm { capability } => {
            if LLM_CAPABILITIES.contains(&capability.as_str()) {
                Ok(())
            } else {
                Err(format!("unknown llm capability '{capability}'"))
            }
        }
    }
}

fn decision_schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "action": { "enum": ["execute", "conclude"] },
            "kind": { "type": "object" },
            "args": { "type": "object" },
            "expected_output": { "type": "string" },
            "reasoning": { "type": "string" },
            "reason": { "enum": ["observer_complete", "planner_failure"] },
            "summary": { "type": "string" },
        },
        "required": ["action"],
    })
}
