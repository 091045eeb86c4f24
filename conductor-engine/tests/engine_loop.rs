//! End-to-end runs of `EngineLoop` against fake MCP transports and a
//! scripted LLM, covering the loop's termination policy and the dual
//! raw+formatted persistence contract.

use std::collections::HashMap;
use std::sync::Arc;

use conductor_engine::EngineLoop;
use conductor_llm::fake::FakeLlmClient;
use conductor_mcp::session::{CredentialStore, TransportFactory};
use conductor_mcp::transport::fake::FakeTransport;
use conductor_mcp::{McpResult, McpServerConfig, McpTransport, McpTransportConfig, SessionManager};
use conductor_workflow::{
    AgentDescriptor, ContentType, Event, InMemoryRepository, McpServerHandle, ToolDescriptor, UserId,
};
use futures::StreamExt;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

struct StaticCredentials(HashMap<String, String>);

#[async_trait::async_trait]
impl CredentialStore for StaticCredentials {
    async fn credentials(&self, _user: &UserId, _mcp: &conductor_workflow::McpName) -> HashMap<String, String> {
        self.0.clone()
    }
}

struct ScriptedFactory {
    tools: Vec<ToolDescriptor>,
    responses: std::sync::Mutex<Vec<McpResult<Value>>>,
}

#[async_trait::async_trait]
impl TransportFactory for ScriptedFactory {
    async fn connect(&self, _config: &McpServerConfig) -> McpResult<Arc<dyn McpTransport>> {
        let responses = self.responses.lock().unwrap().drain(..).collect();
        Ok(Arc::new(FakeTransport::new(self.tools.clone(), responses)))
    }
}

fn coingecko_agent() -> AgentDescriptor {
    AgentDescriptor {
        name: "crypto-agent".into(),
        mission: "Answer crypto market questions".into(),
        mcp_servers: vec![McpServerHandle {
            name: "coingecko-mcp".into(),
            tools: vec![ToolDescriptor {
                name: "get_current_fng_tool".into(),
                description: "Fetch the Fear & Greed index".into(),
                input_schema: serde_json::json!({}),
            }],
        }],
        default_language: Some("en".into()),
        welcome_text: None,
    }
}

fn twitter_agent() -> AgentDescriptor {
    AgentDescriptor {
        name: "social-agent".into(),
        mission: "Summarize social activity".into(),
        mcp_servers: vec![McpServerHandle {
            name: "twitter-client-mcp".into(),
            tools: vec![ToolDescriptor {
                name: "getUserTweets".into(),
                description: "Fetch a user's recent tweets".into(),
                input_schema: serde_json::json!({}),
            }],
        }],
        default_language: Some("en".into()),
        welcome_text: None,
    }
}

async fn drain(stream: impl futures::Stream<Item = Event> + Unpin) -> Vec<Event> {
    stream.collect().await
}

/// Scenario 1 (spec §8): a single-step query against one MCP tool
/// completes on the first pass, with raw and formatted events emitted in
/// order and a successful `final_result`.
#[tokio::test]
async fn single_step_query_completes_successfully() {
    let sessions = Arc::new(SessionManager::new(
        vec![McpServerConfig {
            name: "coingecko-mcp".into(),
            transport: McpTransportConfig::Streamable { url: "https://mcp.example/coingecko".into(), token: None, headers: HashMap::new() },
            required_auth_params: vec![],
        }],
        Arc::new(StaticCredentials(HashMap::new())),
        Arc::new(ScriptedFactory {
            tools: vec![ToolDescriptor { name: "get_current_fng_tool".into(), description: "".into(), input_schema: Value::Null }],
            responses: std::sync::Mutex::new(vec![Ok(serde_json::json!({"value": 72, "classification": "Greed"}))]),
        }),
        8,
    ));

    let plan_execute = serde_json::json!({
        "action": "execute",
        "kind": {"kind": "mcp", "mcp_name": "coingecko-mcp", "tool": "get_current_fng_tool"},
        "args": {},
        "expected_output": "fear and greed index",
        "reasoning": "the user wants the current index value",
    })
    .to_string();
    let observer_complete = serde_json::json!({"complete": true}).to_string();

    // "NONE" is consumed by the language resolver's in-message instruction
    // parse, which runs once at the very start of every run.
    let llm = Arc::new(
        FakeLlmClient::new(vec!["NONE".to_string(), plan_execute, observer_complete])
            .with_stream_chunks(vec![vec!["**Fear & Greed Index**: 72 (Greed)"]]),
    );
    let repo = Arc::new(InMemoryRepository::new());
    let engine = Arc::new(EngineLoop::new(sessions, llm, repo.clone(), "test-model"));

    let events = drain(engine.run(UserId::from("alice"), "Get current Crypto Fear & Greed Index".into(), coingecko_agent(), CancellationToken::new())).await;

    assert!(events.iter().any(|e| matches!(e, Event::StepExecuting { step: 0, .. })));
    assert!(events.iter().any(|e| matches!(e, Event::StepRawResult { step: 0, success: true, .. })));
    assert!(events.iter().any(|e| matches!(e, Event::StepFormattedResult { step: 0, success: true, .. })));
    match events.last() {
        Some(Event::FinalResult { success, execution_summary, .. }) => {
            assert!(success);
            assert_eq!(execution_summary.total_steps, 1);
            assert_eq!(execution_summary.completed_steps, 1);
        }
        other => panic!("expected a final result, got {other:?}"),
    }
    assert_eq!(repo.records_for_step(0).len(), 2);
    assert!(repo.records_for_step(0).iter().any(|r| r.content_type == ContentType::RawResult));
    assert!(repo.records_for_step(0).iter().any(|r| r.content_type == ContentType::FormattedResult));
}

/// Scenario 3 (spec §8): a query naming three handles does not conclude
/// until a successful step's result mentions all three, even though the
/// Observer alone would call the first result sufficient.
#[tokio::test]
async fn multi_handle_query_waits_for_every_handle() {
    let sessions = Arc::new(SessionManager::new(
        vec![McpServerConfig {
            name: "twitter-client-mcp".into(),
            transport: McpTransportConfig::Streamable { url: "https://mcp.example/twitter".into(), token: None, headers: HashMap::new() },
            required_auth_params: vec![],
        }],
        Arc::new(StaticCredentials(HashMap::new())),
        Arc::new(ScriptedFactory {
            tools: vec![ToolDescriptor { name: "getUserTweets".into(), description: "".into(), input_schema: Value::Null }],
            responses: std::sync::Mutex::new(vec![
                Ok(serde_json::json!({"handle": "@S4mmyEth", "tweets": ["gm"]})),
                Ok(serde_json::json!({"handle": "@Senti__23", "tweets": ["wagmi"]})),
                Ok(serde_json::json!({"handle": "@virtuals_vc", "tweets": ["shipping"]})),
            ]),
        }),
        8,
    ));

    let decision_for = |handle: &str| {
        serde_json::json!({
            "action": "execute",
            "kind": {"kind": "mcp", "mcp_name": "twitter-client-mcp", "tool": "getUserTweets"},
            "args": {"handle": handle},
            "expected_output": "recent tweets",
            "reasoning": format!("need tweets for {handle}"),
        })
        .to_string()
    };

    // The planner is only consulted when the observer's mechanical gate lets
    // a `conclude` decision through, so three execute decisions plus a final
    // conclude is exactly what three handles with no observer call in
    // between requires: the multi-target gate short-circuits the Observer's
    // own LLM judgement while any handle is still missing (see `Observer`).
    let llm = Arc::new(FakeLlmClient::new(vec![
        "NONE".to_string(),
        decision_for("@S4mmyEth"),
        decision_for("@Senti__23"),
        decision_for("@virtuals_vc"),
        serde_json::json!({"complete": true}).to_string(),
    ]));

    let repo = Arc::new(InMemoryRepository::new());
    let engine = Arc::new(EngineLoop::new(sessions, llm, repo, "test-model"));

    let events = drain(engine.run(
        UserId::from("alice"),
        "Fetch latest tweets for @S4mmyEth, @Senti__23, @virtuals_vc".into(),
        twitter_agent(),
        CancellationToken::new(),
    ))
    .await;

    let raw_steps: Vec<_> = events
        .iter()
        .filter(|e| matches!(e, Event::StepRawResult { success: true, .. }))
        .collect();
    assert_eq!(raw_steps.len(), 3, "all three handles should have required their own step");

    match events.last() {
        Some(Event::FinalResult { success, .. }) => assert!(success),
        other => panic!("expected a final result, got {other:?}"),
    }
}

/// Scenario 5 (spec §8): an unverified MCP short-circuits before any
/// `step_executing` event, emitting a single `mcp_connection_error` and
/// terminating the run.
#[tokio::test]
async fn unverified_mcp_terminates_without_executing() {
    let sessions = Arc::new(SessionManager::new(
        vec![McpServerConfig {
            name: "coingecko-mcp".into(),
            transport: McpTransportConfig::Streamable { url: "https://mcp.example/coingecko".into(), token: None, headers: HashMap::new() },
            required_auth_params: vec!["COINGECKO_API_KEY".into()],
        }],
        Arc::new(StaticCredentials(HashMap::new())),
        Arc::new(ScriptedFactory { tools: vec![], responses: std::sync::Mutex::new(vec![]) }),
        8,
    ));

    let plan_execute = serde_json::json!({
        "action": "execute",
        "kind": {"kind": "mcp", "mcp_name": "coingecko-mcp", "tool": "get_current_fng_tool"},
        "args": {},
        "expected_output": "fear and greed index",
        "reasoning": "need the index value",
    })
    .to_string();
    let llm = Arc::new(FakeLlmClient::new(vec!["NONE".to_string(), plan_execute]));
    let repo = Arc::new(InMemoryRepository::new());
    let engine = Arc::new(EngineLoop::new(sessions, llm, repo, "test-model"));

    let events = drain(engine.run(UserId::from("alice"), "what's the fear and greed index".into(), coingecko_agent(), CancellationToken::new())).await;

    assert!(!events.iter().any(|e| matches!(e, Event::StepExecuting { .. })));
    let auth_errors: Vec<_> = events
        .iter()
        .filter(|e| matches!(e, Event::McpConnectionError { auth_fields_required, .. } if auth_fields_required == &vec!["COINGECKO_API_KEY".to_string()]))
        .collect();
    assert_eq!(auth_errors.len(), 1);
    match events.last() {
        Some(Event::FinalResult { success, .. }) => assert!(!success),
        other => panic!("expected a final result, got {other:?}"),
    }
}

/// Scenario 6 (spec §8): the Planner proposing the same `(tool, mcp)` five
/// times in a row terminates with stagnation and a failing final result.
#[tokio::test]
async fn repeated_tool_terminates_with_stagnation() {
    let sessions = Arc::new(SessionManager::new(
        vec![McpServerConfig {
            name: "coingecko-mcp".into(),
            transport: McpTransportConfig::Streamable { url: "https://mcp.example/coingecko".into(), token: None, headers: HashMap::new() },
            required_auth_params: vec![],
        }],
        Arc::new(StaticCredentials(HashMap::new())),
        Arc::new(ScriptedFactory {
            tools: vec![ToolDescriptor { name: "get_current_fng_tool".into(), description: "".into(), input_schema: Value::Null }],
            responses: std::sync::Mutex::new((0..5).map(|_| Ok(serde_json::json!({"value": 50}))).collect()),
        }),
        8,
    ));

    let plan_execute = serde_json::json!({
        "action": "execute",
        "kind": {"kind": "mcp", "mcp_name": "coingecko-mcp", "tool": "get_current_fng_tool"},
        "args": {},
        "expected_output": "fear and greed index",
        "reasoning": "check again",
    })
    .to_string();
    // "NONE" for the language resolver's instruction parse, then five
    // execute decisions plus five "not yet" observer verdicts.
    let mut scripted = vec!["NONE".to_string()];
    for _ in 0..5 {
        scripted.push(plan_execute.clone());
        scripted.push(serde_json::json!({"complete": false}).to_string());
    }
    let llm = Arc::new(FakeLlmClient::new(scripted));
    let repo = Arc::new(InMemoryRepository::new());
    let engine = Arc::new(EngineLoop::new(sessions, llm, repo, "test-model"));

    let events = drain(engine.run(
        UserId::from("alice"),
        "keep checking the fear and greed index".into(),
        coingecko_agent(),
        CancellationToken::new(),
    ))
    .await;

    match events.last() {
        Some(Event::FinalResult { success, execution_summary, .. }) => {
            assert!(!success);
            assert!(execution_summary.success_rate <= 100.0);
        }
        other => panic!("expected a final result, got {other:?}"),
    }
}
