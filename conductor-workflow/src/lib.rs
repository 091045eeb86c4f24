//! Shared workflow/task data model for the conductor engine.
//!
//! This crate has no knowledge of MCP transports or LLM providers — it only
//! defines the shapes the rest of the engine agrees on: agent descriptors,
//! workflow steps, per-run state, the event stream contract, and the
//! persistence hook. See `SPEC_FULL.md` §3 for the full data model.

pub mod agent;
pub mod event;
pub mod ids;
pub mod repository;
pub mod state;
pub mod step;

pub use agent::{AgentDescriptor, McpServerHandle, ToolDescriptor, LLM_CAPABILITIES};
pub use event::{
    Event, ExecutionDetails, ExecutionSummary, FormattingDetails, ProcessingInfo, Progress, ToolDetails, WorkflowInfo,
};
pub use ids::{McpName, RunId, UserId};
pub use repository::{ContentType, ConversationRepository, InMemoryRepository, NullRepository, StepRecord};
pub use state::{DataStore, EngineState, ProgressMonitor, TerminationReason};
pub use step::{StepKind, StepStatus, WorkflowStep};
