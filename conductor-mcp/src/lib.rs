//! MCP connection and session management: pooling, reconnection, auth
//! state, and error classification for tool servers (spec §4.5).

pub mod config;
pub mod error;
pub mod pool;
pub mod reconnect;
pub mod session;
pub mod transport;

pub use config::{McpPoolConfig, McpServerConfig, McpTransportConfig};
pub use error::{classify_error, ErrorClassification, McpError, McpResult};
pub use pool::{PoolKey, SessionPool};
pub use reconnect::ReconnectionManager;
pub use session::{AuthState, CredentialStore, EnsureOutcome, InvokeError, McpSession, NoCredentialStore, SessionManager, TransportFactory};
pub use transport::{McpTransport, RmcpTransport};
