use thiserror::Error;

pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("planner could not produce a valid decision after retries: {0}")]
    PlannerFailure(String),

    #[error(transparent)]
    Llm(#[from] conductor_llm::LlmError),

    #[error(transparent)]
    Mcp(#[from] conductor_mcp::McpError),

    #[error("run was cancelled")]
    Cancelled,
}
