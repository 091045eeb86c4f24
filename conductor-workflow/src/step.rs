//! A single planned unit of work within a run (spec §3).

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::McpName;

/// What a step dispatches to. A tagged enum rather than a string-keyed
/// dispatch table, per spec §9's explicit design note.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepKind {
    Mcp { mcp_name: McpName, tool: String },
    Llm { capability: String },
}

impl StepKind {
    pub fn tool_name(&self) -> &str {
        match self {
            StepKind::Mcp { tool, .. } => tool,
            StepKind::Llm { capability } => capability,
        }
    }

    pub fn mcp_name(&self) -> Option<&McpName> {
        match self {
            StepKind::Mcp { mcp_name, .. } => Some(mcp_name),
            StepKind::Llm { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Executing,
    Completed,
    Failed,
}

/// A planned unit of work: what to call, why, and the result once it runs.
///
/// `status` transitions monotonically: `Pending -> Executing -> (Completed |
/// Failed)`, with a failed step re-entering `Executing` while
/// `attempts < max_retries + 1` (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowStep {
    pub index: usize,
    pub kind: StepKind,
    pub args: Value,
    pub expected_output: String,
    pub reasoning: String,
    pub status: StepStatus,
    pub attempts: u32,
    pub max_retries: u32,
    pub raw_result: Option<Value>,
    pub formatted_result: Option<String>,
    pub error: Option<String>,
}

impl WorkflowStep {
    pub fn new(index: usize, kind: StepKind, args: Value, expected_output: String, reasoning: String) -> Self {
        Self {
            index,
            kind,
            args,
            expected_output,
            reasoning,
            status: StepStatus::Pending,
            attempts: 0,
            max_retries: 2,
            raw_result: None,
            formatted_result: None,
            error: None,
        }
    }

    pub fn start_attempt(&mut self) {
        self.status = StepStatus::Executing;
        self.attempts += 1;
    }

    pub fn succeed(&mut self, raw: Value) {
        self.status = StepStatus::Completed;
        self.raw_result = Some(raw);
        self.error = None;
    }

    pub fn fail(&mut self, error: String) {
        self.status = StepStatus::Failed;
        self.error = Some(error);
    }

    /// Whether a failed step is allowed one more attempt (spec §3, §4.3).
    pub fn can_retry(&self) -> bool {
        self.status == StepStatus::Failed && self.attempts < self.max_retries + 1
    }

    pub fn is_success(&self) -> bool {
        self.status == StepStatus::Completed
    }
}
