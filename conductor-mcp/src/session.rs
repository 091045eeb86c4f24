//! Per-`(user, mcp)` session lifecycle: the auth state machine, connection
//! reuse through the pool, and the tool-invocation error classification
//! contract the executor consumes (spec §4.5).

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use conductor_workflow::{McpName, McpServerHandle, ToolDescriptor, UserId};
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{info, warn};

use crate::config::McpServerConfig;
use crate::error::{classify_error, ErrorClassification, McpError, McpResult};
use crate::pool::{PoolKey, SessionPool};
use crate::reconnect::ReconnectionManager;
use crate::transport::McpTransport;

/// Per-`(user, mcp)` auth state. A session only ever moves forward through
/// `unverified -> verifying -> verified`, or sideways into `failed`/
/// `expired`, from which `EnsureSession` starts the climb again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    Unverified,
    Verifying,
    Verified,
    Failed,
    Expired,
}

pub struct McpSession {
    pub mcp_name: McpName,
    pub tools: Vec<ToolDescriptor>,
    transport: Arc<dyn McpTransport>,
}

impl McpSession {
    pub fn handle(&self) -> McpServerHandle {
        McpServerHandle { name: self.mcp_name.clone(), tools: self.tools.clone() }
    }
}

pub enum EnsureOutcome {
    Session(Arc<McpSession>),
    AuthRequired { missing_params: Vec<String> },
}

/// Supplies whatever auth material the user has already provided for a
/// given MCP server. The engine's credential layer lives outside this
/// crate entirely; this trait is the seam.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn credentials(&self, user: &UserId, mcp: &McpName) -> HashMap<String, String>;
}

#[derive(Default)]
pub struct NoCredentialStore;

#[async_trait]
impl CredentialStore for NoCredentialStore {
    async fn credentials(&self, _user: &UserId, _mcp: &McpName) -> HashMap<String, String> {
        HashMap::new()
    }
}

/// Builds a live transport for a server config. Production code dials
/// `rmcp`; tests substitute a fake that never touches the network.
#[async_trait]
pub trait TransportFactory: Send + Sync {
    async fn connect(&self, config: &McpServerConfig) -> McpResult<Arc<dyn McpTransport>>;
}

pub struct SessionManager {
    pool: SessionPool<McpSession>,
    configs: HashMap<McpName, McpServerConfig>,
    auth_states: DashMap<(UserId, McpName), AuthState>,
    connect_locks: DashMap<(UserId, McpName), Arc<AsyncMutex<()>>>,
    credentials: Arc<dyn CredentialStore>,
    transport_factory: Arc<dyn TransportFactory>,
    reconnection: ReconnectionManager,
}

impl SessionManager {
    pub fn new(
        configs: Vec<McpServerConfig>,
        credentials: Arc<dyn CredentialStore>,
        transport_factory: Arc<dyn TransportFactory>,
        max_pooled_sessions: usize,
    ) -> Self {
        Self {
            pool: SessionPool::with_capacity(max_pooled_sessions),
            configs: configs.into_iter().map(|c| (McpName::from(c.name.clone()), c)).collect(),
            auth_states: DashMap::new(),
            connect_locks: DashMap::new(),
            credentials,
            transport_factory,
            reconnection: ReconnectionManager::new(),
        }
    }

    fn lock_for(&self, key: &(UserId, McpName)) -> Arc<AsyncMutex<()>> {
        self.connect_locks.entry(key.clone()).or_insert_with(|| Arc::new(AsyncMutex::new(()))).clone()
    }

    pub fn auth_state(&self, user: &UserId, mcp: &McpName) -> AuthState {
        self.auth_states.get(&(user.clone(), mcp.clone())).map(|s| *s).unwrap_or(AuthState::Unverified)
    }

    async fn missing_params(&self, user: &UserId, mcp: &McpName, config: &McpServerConfig) -> Vec<String> {
        if config.required_auth_params.is_empty() {
            return Vec::new();
        }
        let supplied = self.credentials.credentials(user, mcp).await;
        config.required_auth_params.iter().filter(|p| !supplied.contains_key(*p)).cloned().collect()
    }

    /// Returns a ready-to-use session, or `AuthRequired` naming the params
    /// still missing. Connection failures that are not auth-related
    /// propagate as `Err` — the caller classifies and reports them as a
    /// `mcp_connection_error` event (spec §6).
    pub async fn ensure_session(&self, user: &UserId, mcp: &McpName) -> McpResult<EnsureOutcome> {
        let key = PoolKey::new(user.clone(), mcp.clone());
        if let Some(session) = self.pool.get(&key) {
            if self.auth_state(user, mcp) == AuthState::Verified {
                return Ok(EnsureOutcome::Session(session));
            }
        }

        let config = self.configs.get(mcp).ok_or_else(|| McpError::ServerNotFound(mcp.to_string()))?;

        let missing = self.missing_params(user, mcp, config).await;
        if !missing.is_empty() {
            self.auth_states.insert((user.clone(), mcp.clone()), AuthState::Unverified);
            return Ok(EnsureOutcome::AuthRequired { missing_params: missing });
        }

        let state_key = (user.clone(), mcp.clone());
        let lock = self.lock_for(&state_key);
        let _guard = lock.lock().await;

        // Re-check now that we hold the lock: another task may have raced us.
        if let Some(session) = self.pool.get(&key) {
            if self.auth_state(user, mcp) == AuthState::Verified {
                return Ok(EnsureOutcome::Session(session));
            }
        }

        self.auth_states.insert(state_key.clone(), AuthState::Verifying);

        let factory = Arc::clone(&self.transport_factory);
        let cfg = config.clone();
        let connect_result = self
            .reconnection
            .reconnect(&config.name, || {
                let factory = Arc::clone(&factory);
                let cfg = cfg.clone();
                async move { factory.connect(&cfg).await }
            })
            .await;

        let transport = match connect_result {
            Ok(t) => t,
            Err(e) => {
                let class = classify_error(&e.to_string());
                self.auth_states.insert(state_key, if class.is_auth() { AuthState::Failed } else { AuthState::Unverified });
                return Err(e);
            }
        };

        let tools = transport.list_tools().await?;
        let session = Arc::new(McpSession { mcp_name: mcp.clone(), tools, transport });
        self.pool.insert(key, Arc::clone(&session));
        self.auth_states.insert(state_key, AuthState::Verified);
        info!(user = %user, mcp = %mcp, "mcp session established");
        Ok(EnsureOutcome::Session(session))
    }

    /// Calls a tool on an already-established session. Never retries here
    /// — the executor owns retry policy (spec §4.3) and needs the raw
    /// classification to decide.
    pub async fn invoke(&self, session: &Arc<McpSession>, tool: &str, args: Value) -> Result<Value, InvokeError> {
        session.transport.call_tool(tool, args).await.map_err(|e| {
            let message = e.to_string();
            InvokeError { classification: classify_error(&message), message }
        })
    }

    /// Evicts a session, e.g. after a `mcp.auth_required`/expired error, so
    /// the next `ensure_session` call reconnects from scratch.
    pub fn invalidate_session(&self, user: &UserId, mcp: &McpName) {
        let key = PoolKey::new(user.clone(), mcp.clone());
        self.pool.remove(&key);
        self.auth_states.insert((user.clone(), mcp.clone()), AuthState::Expired);
        warn!(user = %user, mcp = %mcp, "mcp session invalidated");
    }
}

#[derive(Debug, Clone)]
pub struct InvokeError {
    pub classification: ErrorClassification,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::fake::FakeTransport;

    struct StaticCredentials(HashMap<String, String>);

    #[async_trait]
    impl CredentialStore for StaticCredentials {
        async fn credentials(&self, _user: &UserId, _mcp: &McpName) -> HashMap<String, String> {
            self.0.clone()
        }
    }

    struct FakeFactory {
        tools: Vec<ToolDescriptor>,
        responses: std::sync::Mutex<Vec<McpResult<Value>>>,
    }

    #[async_trait]
    impl TransportFactory for FakeFactory {
        async fn connect(&self, _config: &McpServerConfig) -> McpResult<Arc<dyn McpTransport>> {
            let responses = self.responses.lock().unwrap().drain(..).collect();
            Ok(Arc::new(FakeTransport::new(self.tools.clone(), responses)))
        }
    }

    fn coingecko_config(required_auth_params: Vec<String>) -> McpServerConfig {
        McpServerConfig {
            name: "coingecko-mcp".into(),
            transport: crate::config::McpTransportConfig::Streamable {
                url: "https://mcp.example/coingecko".into(),
                token: None,
                headers: HashMap::new(),
            },
            required_auth_params,
        }
    }

    #[tokio::test]
    async fn reports_auth_required_when_params_missing() {
        let manager = SessionManager::new(
            vec![coingecko_config(vec!["api_key".into()])],
            Arc::new(NoCredentialStore),
            Arc::new(FakeFactory { tools: vec![], responses: std::sync::Mutex::new(vec![]) }),
            8,
        );
        let outcome = manager
            .ensure_session(&UserId::from("alice"), &McpName::from("coingecko-mcp"))
            .await
            .unwrap();
        match outcome {
            EnsureOutcome::AuthRequired { missing_params } => assert_eq!(missing_params, vec!["api_key".to_string()]),
            EnsureOutcome::Session(_) => panic!("expected auth required"),
        }
    }

    #[tokio::test]
    async fn establishes_and_reuses_session_once_verified() {
        let creds = StaticCredentials(HashMap::from([("api_key".to_string(), "secret".to_string())]));
        let manager = SessionManager::new(
            vec![coingecko_config(vec!["api_key".into()])],
            Arc::new(creds),
            Arc::new(FakeFactory {
                tools: vec![ToolDescriptor { name: "get_price".into(), description: "".into(), input_schema: Value::Null }],
                responses: std::sync::Mutex::new(vec![]),
            }),
            8,
        );
        let user = UserId::from("alice");
        let mcp = McpName::from("coingecko-mcp");

        let outcome = manager.ensure_session(&user, &mcp).await.unwrap();
        let session = match outcome {
            EnsureOutcome::Session(s) => s,
            EnsureOutcome::AuthRequired { .. } => panic!("expected session"),
        };
        assert_eq!(session.tools.len(), 1);
        assert_eq!(manager.auth_state(&user, &mcp), AuthState::Verified);

        let outcome_again = manager.ensure_session(&user, &mcp).await.unwrap();
        assert!(matches!(outcome_again, EnsureOutcome::Session(_)));
    }

    #[tokio::test]
    async fn unknown_server_is_an_error() {
        let manager = SessionManager::new(
            vec![],
            Arc::new(NoCredentialStore),
            Arc::new(FakeFactory { tools: vec![], responses: std::sync::Mutex::new(vec![]) }),
            8,
        );
        let result = manager.ensure_session(&UserId::from("alice"), &McpName::from("ghost-mcp")).await;
        assert!(matches!(result, Err(McpError::ServerNotFound(_))));
    }

    #[tokio::test]
    async fn invoke_classifies_tool_errors() {
        let creds = StaticCredentials(HashMap::new());
        let manager = SessionManager::new(
            vec![coingecko_config(vec![])],
            Arc::new(creds),
            Arc::new(FakeFactory {
                tools: vec![],
                responses: std::sync::Mutex::new(vec![Err(McpError::ToolExecution("429 rate limit exceeded".into()))]),
            }),
            8,
        );
        let user = UserId::from("alice");
        let mcp = McpName::from("coingecko-mcp");
        let session = match manager.ensure_session(&user, &mcp).await.unwrap() {
            EnsureOutcome::Session(s) => s,
            _ => panic!("expected session"),
        };
        let err = manager.invoke(&session, "get_price", Value::Null).await.unwrap_err();
        assert_eq!(err.classification, ErrorClassification::ServerRateLimit);
        assert!(err.classification.is_retryable());
    }

    #[tokio::test]
    async fn invalidate_forces_reconnect() {
        let creds = StaticCredentials(HashMap::new());
        let manager = SessionManager::new(
            vec![coingecko_config(vec![])],
            Arc::new(creds),
            Arc::new(FakeFactory { tools: vec![], responses: std::sync::Mutex::new(vec![]) }),
            8,
        );
        let user = UserId::from("alice");
        let mcp = McpName::from("coingecko-mcp");
        manager.ensure_session(&user, &mcp).await.unwrap();
        manager.invalidate_session(&user, &mcp);
        assert_eq!(manager.auth_state(&user, &mcp), AuthState::Expired);
    }
}
