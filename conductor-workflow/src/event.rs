//! The stream event contract (spec §6).
//!
//! Each event serializes to `{event, data}`; consumers must ignore unknown
//! `data` fields for forward compatibility, which is why every payload
//! struct keeps its fields `pub` rather than behind custom `Serialize` impls
//! that could silently drop or rename them.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::McpName;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowInfo {
    pub total_steps: usize,
    pub mcps: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDetails {
    pub tool_type: String,
    pub tool_name: String,
    pub mcp_name: Option<String>,
    pub args: Value,
    pub expected_output: String,
    pub reasoning: String,
    pub timestamp: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionDetails {
    pub tool_type: String,
    pub tool_name: String,
    pub mcp_name: Option<String>,
    pub raw_result: Value,
    pub args: Value,
    pub expected_output: String,
    pub timestamp: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingInfo {
    pub original_data_size: usize,
    pub formatted_data_size: usize,
    pub processing_time_ms: u64,
    pub needs_formatting: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormattingDetails {
    pub tool_type: String,
    pub tool_name: String,
    pub mcp_name: Option<String>,
    pub original_result: Value,
    pub formatted_result: String,
    pub processing_info: ProcessingInfo,
    pub timestamp: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Progress {
    pub completed: usize,
    pub total: usize,
    pub percentage: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionSummary {
    pub total_steps: usize,
    pub completed_steps: usize,
    pub failed_steps: usize,
    pub success_rate: f32,
}

/// Tagged event emitted by a run, one per row of spec §6's table.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum Event {
    ExecutionStart {
        task_id: String,
        mode: String,
        workflow_info: WorkflowInfo,
    },
    WorkflowExecutionStart {
        total_steps: usize,
        workflow: Vec<Value>,
    },
    StepExecuting {
        step: usize,
        tool: String,
        agent_name: String,
        message: String,
        tool_details: ToolDetails,
    },
    StepRawResult {
        step: usize,
        success: bool,
        result: Value,
        agent_name: String,
        execution_details: ExecutionDetails,
    },
    StepResultChunk {
        step: usize,
        chunk: String,
        agent_name: String,
    },
    StepFormattedResult {
        step: usize,
        success: bool,
        formatted_result: String,
        agent_name: String,
        formatting_details: FormattingDetails,
    },
    FinalResultChunk {
        chunk: String,
        agent_name: String,
    },
    StepComplete {
        step: usize,
        success: bool,
        progress: Progress,
    },
    StepError {
        step: usize,
        error: String,
        mcp_name: Option<String>,
        action: String,
        attempts: u32,
    },
    McpConnectionError {
        mcp_name: String,
        step: Option<usize>,
        agent_name: String,
        error_type: String,
        title: String,
        message: String,
        suggestions: Vec<String>,
        auth_fields_required: Vec<String>,
        is_retryable: bool,
        requires_user_action: bool,
        llm_analysis: Option<Value>,
        original_error: String,
        timestamp: String,
    },
    FinalResult {
        final_result: String,
        success: bool,
        execution_summary: ExecutionSummary,
    },
    Cancelled {
        reason: String,
    },
    Error {
        message: String,
        details: Option<Value>,
    },
}

impl Event {
    pub fn mcp_connection_error(
        mcp_name: &McpName,
        step: Option<usize>,
        agent_name: &str,
        error_type: &str,
        title: &str,
        message: &str,
        suggestions: Vec<String>,
        auth_fields_required: Vec<String>,
        is_retryable: bool,
        original_error: &str,
    ) -> Self {
        Event::McpConnectionError {
            mcp_name: mcp_name.0.clone(),
            step,
            agent_name: agent_name.to_string(),
            error_type: error_type.to_string(),
            title: title.to_string(),
            message: message.to_string(),
            suggestions,
            auth_fields_required,
            is_retryable,
            requires_user_action: true,
            llm_analysis: None,
            original_error: original_error.to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}
