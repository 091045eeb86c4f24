//! Dispatches a planned step to its MCP tool or LLM capability, retrying
//! transient failures with a linear backoff (spec §4.3).

use std::sync::Arc;
use std::time::Duration;

use conductor_llm::{single_turn, CompletionRequest, LlmClient};
use conductor_mcp::{EnsureOutcome, ErrorClassification, SessionManager};
use conductor_workflow::{DataStore, McpName, StepKind, UserId, WorkflowStep};
use serde_json::Value;
use tracing::{info, warn};

use crate::args::resolve_args;

const BASE_RETRY_DELAY: Duration = Duration::from_secs(1);

pub enum ExecutionOutcome {
    Success(Value),
    AuthRequired { mcp_name: McpName, missing_params: Vec<String> },
    Failed { error: String, retryable: bool },
}

pub struct Executor {
    sessions: Arc<SessionManager>,
    llm: Arc<dyn LlmClient>,
    model: String,
}

impl Executor {
    pub fn new(sessions: Arc<SessionManager>, llm: Arc<dyn LlmClient>, model: impl Into<String>) -> Self {
        Self { sessions, llm, model: model.into() }
    }

    /// Runs `step` to completion, retrying a transient/rate-limit/timeout/
    /// connection-recoverable failure up to `step.max_retries` times with
    /// `base_delay * attempt` between tries. Auth and config failures never
    /// retry — they surface on the first attempt (spec §4.3, §4.5).
    pub async fn execute(&self, user: &UserId, step: &mut WorkflowStep, store: &DataStore) -> ExecutionOutcome {
        let resolved_args = resolve_args(step.kind.tool_name(), &step.args, store);

        loop {
            step.start_attempt();
            let outcome = match &step.kind {
                StepKind::Mcp { mcp_name, tool } => self.run_mcp(user, mcp_name, tool, resolved_args.clone()).await,
                StepKind::Llm { capability } => self.run_llm(capability, &resolved_args).await,
            };

            match &outcome {
                ExecutionOutcome::Success(_) | ExecutionOutcome::AuthRequired { .. } => return outcome,
                ExecutionOutcome::Failed { retryable, error } => {
                    step.fail(error.clone());
                    if *retryable && step.can_retry() {
                        let delay = BASE_RETRY_DELAY * step.attempts;
                        warn!(attempt = step.attempts, ?delay, error, "retrying step");
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    return outcome;
                }
            }
        }
    }

    /// Resolves the session for `mcp_name` without calling a tool, so the
    /// engine loop can tell an unverified MCP apart from a step that is
    /// actually about to run (spec §8 scenario 5: no `step_executing` for a
    /// step that can't clear auth). Connection failures other than missing
    /// auth are treated as "no objection" here — `execute` surfaces those
    /// through the normal retry path once the step actually runs.
    pub async fn precheck_auth(&self, user: &UserId, mcp_name: &McpName) -> Option<Vec<String>> {
        match self.sessions.ensure_session(user, mcp_name).await {
            Ok(EnsureOutcome::AuthRequired { missing_params }) => Some(missing_params),
            _ => None,
        }
    }

    async fn run_mcp(&self, user: &UserId, mcp_name: &McpName, tool: &str, args: Value) -> ExecutionOutcome {
        let session = match self.sessions.ensure_session(user, mcp_name).await {
            Ok(EnsureOutcome::Session(session)) => session,
            Ok(EnsureOutcome::AuthRequired { missing_params }) => {
                return ExecutionOutcome::AuthRequired { mcp_name: mcp_name.clone(), missing_params }
            }
            Err(e) => {
                let classification = conductor_mcp::classify_error(&e.to_string());
                return ExecutionOutcome::Failed { error: e.to_string(), retryable: classification.is_retryable() };
            }
        };

        match self.sessions.invoke(&session, tool, args).await {
            Ok(value) => {
                info!(mcp = %mcp_name, tool, "mcp tool call succeeded");
                ExecutionOutcome::Success(value)
            }
            Err(invoke_err) => {
                if invoke_err.classification.is_auth() || invoke_err.classification == ErrorClassification::McpAuthRequired {
                    self.sessions.invalidate_session(user, mcp_name);
                }
                ExecutionOutcome::Failed { error: invoke_err.message, retryable: invoke_err.classification.is_retryable() }
            }
        }
    }

    async fn run_llm(&self, capability: &str, args: &Value) -> ExecutionOutcome {
        let prompt = format!("Capability: {capability}\nInput: {args}");
        let request = CompletionRequest::new(
            &self.model,
            single_turn("Perform the requested text capability and return only the result.", prompt),
        );
        match self.llm.complete(request).await {
            Ok(response) => ExecutionOutcome::Success(Value::String(response.content)),
            Err(e) => ExecutionOutcome::Failed { error: e.to_string(), retryable: matches!(e, conductor_llm::LlmError::RateLimited | conductor_llm::LlmError::Timeout) },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conductor_llm::fake::FakeLlmClient;
    use conductor_mcp::session::{CredentialStore, TransportFactory};
    use conductor_mcp::transport::fake::FakeTransport;
    use conductor_mcp::{McpError, McpServerConfig, McpTransportConfig};
    use conductor_workflow::{StepKind, ToolDescriptor, WorkflowStep};
    use std::collections::HashMap;

    struct NoCreds;
    #[async_trait::async_trait]
    impl CredentialStore for NoCreds {
        async fn credentials(&self, _user: &UserId, _mcp: &McpName) -> HashMap<String, String> {
            HashMap::new()
        }
    }

    struct ScriptedFactory(std::sync::Mutex<Vec<conductor_mcp::McpResult<Value>>>);
    #[async_trait::async_trait]
    impl TransportFactory for ScriptedFactory {
        async fn connect(&self, _config: &McpServerConfig) -> conductor_mcp::McpResult<Arc<dyn conductor_mcp::McpTransport>> {
            let responses = self.0.lock().unwrap().drain(..).collect();
            Ok(Arc::new(FakeTransport::new(
                vec![ToolDescriptor { name: "get_price".into(), description: "".into(), input_schema: Value::Null }],
                responses,
            )))
        }
    }

    fn config() -> McpServerConfig {
        McpServerConfig {
            name: "coingecko-mcp".into(),
            transport: McpTransportConfig::Streamable { url: "https://mcp.example".into(), token: None, headers: HashMap::new() },
            required_auth_params: vec![],
        }
    }

    #[tokio::test]
    async fn mcp_step_retries_on_rate_limit_then_succeeds() {
        let factory = ScriptedFactory(std::sync::Mutex::new(vec![
            Err(McpError::ToolExecution("429 rate limit".into())),
            Ok(serde_json::json!({"usd": 1})),
        ]));
        let sessions = Arc::new(SessionManager::new(vec![config()], Arc::new(NoCreds), Arc::new(factory), 4));
        let llm = Arc::new(FakeLlmClient::new(Vec::<String>::new()));
        let executor = Executor::new(sessions, llm, "test-model");

        let mut step = WorkflowStep::new(
            0,
            StepKind::Mcp { mcp_name: "coingecko-mcp".into(), tool: "get_price".into() },
            serde_json::json!({}),
            "price".into(),
            "r".into(),
        );
        step.max_retries = 2;
        let outcome = executor.execute(&UserId::from("alice"), &mut step, &DataStore::new()).await;
        assert!(matches!(outcome, ExecutionOutcome::Success(_)));
        assert_eq!(step.attempts, 2);
    }

    #[tokio::test]
    async fn auth_failure_does_not_retry() {
        let factory = ScriptedFactory(std::sync::Mutex::new(vec![Err(McpError::ToolExecution("401 invalid api key".into()))]));
        let sessions = Arc::new(SessionManager::new(vec![config()], Arc::new(NoCreds), Arc::new(factory), 4));
        let llm = Arc::new(FakeLlmClient::new(Vec::<String>::new()));
        let executor = Executor::new(sessions, llm, "test-model");

        let mut step = WorkflowStep::new(
            0,
            StepKind::Mcp { mcp_name: "coingecko-mcp".into(), tool: "get_price".into() },
            serde_json::json!({}),
            "price".into(),
            "r".into(),
        );
        let outcome = executor.execute(&UserId::from("alice"), &mut step, &DataStore::new()).await;
        assert!(matches!(outcome, ExecutionOutcome::Failed { retryable: false, .. }));
        assert_eq!(step.attempts, 1);
    }

    #[tokio::test]
    async fn llm_step_resolves_capability() {
        let sessions = Arc::new(SessionManager::new(vec![], Arc::new(NoCreds), Arc::new(ScriptedFactory(std::sync::Mutex::new(vec![]))), 4));
        let llm = Arc::new(FakeLlmClient::new(vec!["summary text"]));
        let executor = Executor::new(sessions, llm, "test-model");
        let mut step = WorkflowStep::new(0, StepKind::Llm { capability: "summarize".into() }, serde_json::json!({"x": 1}), "summary".into(), "r".into());
        let outcome = executor.execute(&UserId::from("alice"), &mut step, &DataStore::new()).await;
        match outcome {
            ExecutionOutcome::Success(Value::String(s)) => assert_eq!(s, "summary text"),
            _ => panic!("expected success"),
        }
    }
}
