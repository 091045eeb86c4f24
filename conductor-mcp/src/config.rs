//! MCP server configuration: transport selection and pool sizing.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct McpServerConfig {
    pub name: String,
    #[serde(flatten)]
    pub transport: McpTransportConfig,
    /// Auth parameters the user must supply before `EnsureSession` succeeds
    /// (spec §4.5's `missingParams`), e.g. `["api_key"]`.
    #[serde(default)]
    pub required_auth_params: Vec<String>,
}

#[derive(Clone, Deserialize, Serialize)]
#[serde(tag = "protocol", rename_all = "lowercase")]
pub enum McpTransportConfig {
    Stdio {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        envs: HashMap<String, String>,
    },
    Sse {
        url: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        token: Option<String>,
        #[serde(default, skip_serializing_if = "HashMap::is_empty")]
        headers: HashMap<String, String>,
    },
    Streamable {
        url: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        token: Option<String>,
        #[serde(default, skip_serializing_if = "HashMap::is_empty")]
        headers: HashMap<String, String>,
    },
}

impl fmt::Debug for McpTransportConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stdio { command, args, .. } => {
                f.debug_struct("Stdio").field("command", command).field("args", args).finish()
            }
            Self::Sse { url, token, .. } => f
                .debug_struct("Sse")
                .field("url", url)
                .field("token", &token.as_ref().map(|_| "****"))
                .finish(),
            Self::Streamable { url, token, .. } => f
                .debug_struct("Streamable")
                .field("url", url)
                .field("token", &token.as_ref().map(|_| "****"))
                .finish(),
        }
    }
}

impl McpTransportConfig {
    /// A string that uniquely identifies this transport's connection
    /// identity, used as part of the pool key so two configs that would
    /// dial the same endpoint/credentials share a cached session.
    pub fn identity(&self) -> String {
        match self {
            Self::Stdio { command, args, .. } => format!("stdio:{command} {}", args.join(" ")),
            Self::Sse { url, .. } => format!("sse:{url}"),
            Self::Streamable { url, .. } => format!("streamable:{url}"),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct McpPoolConfig {
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
}

impl Default for McpPoolConfig {
    fn default() -> Self {
        Self { max_connections: default_max_connections(), idle_timeout_secs: default_idle_timeout_secs() }
    }
}

fn default_max_connections() -> usize {
    64
}

fn default_idle_timeout_secs() -> u64 {
    300
}
