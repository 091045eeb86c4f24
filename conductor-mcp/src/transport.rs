//! Abstraction over the wire connection to a single MCP server, so the
//! session manager never talks to `rmcp` directly and tests can run
//! against an in-memory fake.

use async_trait::async_trait;
use conductor_workflow::ToolDescriptor;
use rmcp::model::CallToolRequestParam;
use rmcp::service::RunningService;
use rmcp::transport::sse_client::SseClientConfig;
use rmcp::transport::streamable_http_client::StreamableHttpClientTransportConfig;
use rmcp::transport::{ConfigureCommandExt, SseClientTransport, StreamableHttpClientTransport, TokioChildProcess};
use rmcp::{RoleClient, ServiceExt};
use serde_json::Value;

use crate::config::McpTransportConfig;
use crate::error::{McpError, McpResult};

#[async_trait]
pub trait McpTransport: Send + Sync {
    async fn list_tools(&self) -> McpResult<Vec<ToolDescriptor>>;
    async fn call_tool(&self, tool: &str, args: Value) -> McpResult<Value>;
}

/// Dials a live server over stdio/SSE/streamable-HTTP via `rmcp` and
/// forwards `list_tools`/`call_tool` through the resulting client.
pub struct RmcpTransport {
    client: RunningService<RoleClient, ()>,
}

impl RmcpTransport {
    pub async fn connect(config: &McpTransportConfig) -> McpResult<Self> {
        let client = match config {
            McpTransportConfig::Stdio { command, args, envs } => {
                let transport = TokioChildProcess::new(tokio::process::Command::new(command).configure(|cmd| {
                    cmd.args(args).envs(envs.iter()).stderr(std::process::Stdio::inherit());
                }))
                .map_err(|e| McpError::ConnectionFailed(format!("spawn stdio transport: {e}")))?;
                ().serve(transport).await.map_err(|e| McpError::ConnectionFailed(e.to_string()))?
            }
            McpTransportConfig::Sse { url, token, .. } => {
                let client = http_client_for(token.as_deref())?;
                let cfg = SseClientConfig { sse_endpoint: url.clone().into(), ..Default::default() };
                let transport = SseClientTransport::start_with_client(client, cfg)
                    .await
                    .map_err(|e| McpError::ConnectionFailed(format!("start sse transport: {e}")))?;
                ().serve(transport).await.map_err(|e| McpError::ConnectionFailed(e.to_string()))?
            }
            McpTransportConfig::Streamable { url, token, .. } => {
                let transport = if let Some(tok) = token {
                    let mut cfg = StreamableHttpClientTransportConfig::with_uri(url.as_str());
                    cfg.auth_header = Some(tok.clone());
                    StreamableHttpClientTransport::from_config(cfg)
                } else {
                    StreamableHttpClientTransport::from_uri(url.as_str())
                };
                ().serve(transport).await.map_err(|e| McpError::ConnectionFailed(e.to_string()))?
            }
        };
        Ok(Self { client })
    }
}

fn http_client_for(token: Option<&str>) -> McpResult<reqwest::Client> {
    let mut builder = reqwest::Client::builder().connect_timeout(std::time::Duration::from_secs(10));
    if let Some(tok) = token {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::AUTHORIZATION,
            format!("Bearer {tok}").parse().map_err(|e| McpError::ConnectionFailed(format!("invalid auth token: {e}")))?,
        );
        builder = builder.default_headers(headers);
    }
    builder.build().map_err(|e| McpError::ConnectionFailed(format!("build http client: {e}")))
}

#[async_trait]
impl McpTransport for RmcpTransport {
    async fn list_tools(&self) -> McpResult<Vec<ToolDescriptor>> {
        let result = self
            .client
            .list_all_tools()
            .await
            .map_err(|e| McpError::ToolExecution(format!("list_tools: {e}")))?;
        Ok(result
            .into_iter()
            .map(|tool| ToolDescriptor {
                name: tool.name.to_string(),
                description: tool.description.map(|d| d.to_string()).unwrap_or_default(),
                input_schema: serde_json::to_value(&tool.input_schema).unwrap_or(Value::Null),
            })
            .collect())
    }

    async fn call_tool(&self, tool: &str, args: Value) -> McpResult<Value> {
        let arguments = match args {
            Value::Object(map) => Some(map),
            Value::Null => None,
            other => {
                return Err(McpError::InvalidArguments(format!(
                    "tool arguments must be a JSON object, got {other}"
                )))
            }
        };
        let result = self
            .client
            .call_tool(CallToolRequestParam { name: tool.to_string().into(), arguments })
            .await
            .map_err(|e| McpError::ToolExecution(e.to_string()))?;
        serde_json::to_value(&result).map_err(|e| McpError::ToolExecution(format!("serialize result: {e}")))
    }
}

#[cfg(any(test, feature = "fake"))]
pub mod fake {
    use std::sync::atomic::{AtomicU32, Ordering};

    use parking_lot::Mutex;

    use super::*;

    /// Records every call made to it and replays scripted responses in
    /// order, for exercising the session manager and engine without a
    /// live subprocess.
    pub struct FakeTransport {
        tools: Vec<ToolDescriptor>,
        responses: Mutex<Vec<McpResult<Value>>>,
        pub calls: AtomicU32,
    }

    impl FakeTransport {
        pub fn new(tools: Vec<ToolDescriptor>, responses: Vec<McpResult<Value>>) -> Self {
            Self { tools, responses: Mutex::new(responses), calls: AtomicU32::new(0) }
        }
    }

    #[async_trait]
    impl McpTransport for FakeTransport {
        async fn list_tools(&self) -> McpResult<Vec<ToolDescriptor>> {
            Ok(self.tools.clone())
        }

        async fn call_tool(&self, _tool: &str, _args: Value) -> McpResult<Value> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut responses = self.responses.lock();
            if responses.is_empty() {
                return Err(McpError::ToolExecution("fake transport exhausted".into()));
            }
            responses.remove(0)
        }
    }
}
