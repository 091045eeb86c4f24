//! MCP error types and the mechanical error-classification rule table
//! (spec §4.5).

use thiserror::Error;

pub type McpResult<T> = Result<T, McpError>;

#[derive(Debug, Error)]
pub enum McpError {
    #[error("MCP server not found: {0}")]
    ServerNotFound(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Authentication required for {mcp_name}: missing {missing_params:?}")]
    AuthRequired { mcp_name: String, missing_params: Vec<String> },

    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Tool execution failed: {0}")]
    ToolExecution(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Taxonomy of MCP error classes (spec §4.5). Classification drives both
/// the retry policy (spec §4.3) and which event the step produces
/// (`mcp_connection_error` for `Auth`, `step_error` for everything else).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClassification {
    AuthInvalidApiKey,
    AuthExpired,
    AuthWrongPassword,
    AuthMissingParams,
    AuthInsufficientPermissions,
    ConnectionTimeout,
    ConnectionRefused,
    ConnectionNetwork,
    ConnectionUnavailable,
    ConfigInvalid,
    ConfigMissingDependency,
    ConfigInvalidCommand,
    ServerInternal,
    ServerRateLimit,
    ServerQuota,
    McpInitFailed,
    McpConnectionFailed,
    McpAuthRequired,
    /// Not matched by any rule; treated as non-retryable by default.
    Unknown,
}

impl ErrorClassification {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AuthInvalidApiKey => "auth.invalid_api_key",
            Self::AuthExpired => "auth.expired",
            Self::AuthWrongPassword => "auth.wrong_password",
            Self::AuthMissingParams => "auth.missing_params",
            Self::AuthInsufficientPermissions => "auth.insufficient_permissions",
            Self::ConnectionTimeout => "connection.timeout",
            Self::ConnectionRefused => "connection.refused",
            Self::ConnectionNetwork => "connection.network",
            Self::ConnectionUnavailable => "connection.unavailable",
            Self::ConfigInvalid => "config.invalid",
            Self::ConfigMissingDependency => "config.missing_dependency",
            Self::ConfigInvalidCommand => "config.invalid_command",
            Self::ServerInternal => "server.internal",
            Self::ServerRateLimit => "server.rate_limit",
            Self::ServerQuota => "server.quota",
            Self::McpInitFailed => "mcp.init_failed",
            Self::McpConnectionFailed => "mcp.connection_failed",
            Self::McpAuthRequired => "mcp.auth_required",
            Self::Unknown => "unknown",
        }
    }

    /// Whether the Executor should retry a failure of this class
    /// (spec §4.3: transient/rate_limit/timeout/connection_recoverable are
    /// retried; auth/config/invalid_argument surface immediately).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ConnectionTimeout
                | Self::ConnectionRefused
                | Self::ConnectionNetwork
                | Self::ConnectionUnavailable
                | Self::ServerInternal
                | Self::ServerRateLimit
                | Self::ServerQuota
                | Self::McpConnectionFailed
        )
    }

    pub fn is_auth(&self) -> bool {
        matches!(
            self,
            Self::AuthInvalidApiKey
                | Self::AuthExpired
                | Self::AuthWrongPassword
                | Self::AuthMissingParams
                | Self::AuthInsufficientPermissions
                | Self::McpAuthRequired
        )
    }
}

/// One entry in the static classification rule table: a case-insensitive
/// substring match against the raw error text.
struct Rule {
    needle: &'static str,
    class: ErrorClassification,
}

/// Ordered so the most specific auth/config phrasing is checked before the
/// generic connection buckets — e.g. "unauthorized" must not fall through
/// to `connection.refused` just because a transport wraps it that way.
const RULES: &[Rule] = &[
    Rule { needle: "invalid api key", class: ErrorClassification::AuthInvalidApiKey },
    Rule { needle: "invalid_api_key", class: ErrorClassification::AuthInvalidApiKey },
    Rule { needle: "api key expired", class: ErrorClassification::AuthExpired },
    Rule { needle: "token expired", class: ErrorClassification::AuthExpired },
    Rule { needle: "wrong password", class: ErrorClassification::AuthWrongPassword },
    Rule { needle: "incorrect password", class: ErrorClassification::AuthWrongPassword },
    Rule { needle: "missing required", class: ErrorClassification::AuthMissingParams },
    Rule { needle: "missing credentials", class: ErrorClassification::AuthMissingParams },
    Rule { needle: "insufficient permissions", class: ErrorClassification::AuthInsufficientPermissions },
    Rule { needle: "forbidden", class: ErrorClassification::AuthInsufficientPermissions },
    Rule { needle: "unauthorized", class: ErrorClassification::AuthInvalidApiKey },
    Rule { needle: "401", class: ErrorClassification::AuthInvalidApiKey },
    Rule { needle: "timed out", class: ErrorClassification::ConnectionTimeout },
    Rule { needle: "timeout", class: ErrorClassification::ConnectionTimeout },
    Rule { needle: "connection refused", class: ErrorClassification::ConnectionRefused },
    Rule { needle: "econnrefused", class: ErrorClassification::ConnectionRefused },
    Rule { needle: "dns", class: ErrorClassification::ConnectionNetwork },
    Rule { needle: "network", class: ErrorClassification::ConnectionNetwork },
    Rule { needle: "service unavailable", class: ErrorClassification::ConnectionUnavailable },
    Rule { needle: "503", class: ErrorClassification::ConnectionUnavailable },
    Rule { needle: "invalid command", class: ErrorClassification::ConfigInvalidCommand },
    Rule { needle: "command not found", class: ErrorClassification::ConfigMissingDependency },
    Rule { needle: "no such file or directory", class: ErrorClassification::ConfigMissingDependency },
    Rule { needle: "invalid configuration", class: ErrorClassification::ConfigInvalid },
    Rule { needle: "invalid config", class: ErrorClassification::ConfigInvalid },
    Rule { needle: "rate limit", class: ErrorClassification::ServerRateLimit },
    Rule { needle: "429", class: ErrorClassification::ServerRateLimit },
    Rule { needle: "quota", class: ErrorClassification::ServerQuota },
    Rule { needle: "internal server error", class: ErrorClassification::ServerInternal },
    Rule { needle: "500", class: ErrorClassification::ServerInternal },
    Rule { needle: "failed to initialize", class: ErrorClassification::McpInitFailed },
    Rule { needle: "initialization failed", class: ErrorClassification::McpInitFailed },
    Rule { needle: "auth required", class: ErrorClassification::McpAuthRequired },
    Rule { needle: "authentication required", class: ErrorClassification::McpAuthRequired },
    Rule { needle: "failed to connect", class: ErrorClassification::McpConnectionFailed },
    Rule { needle: "connection closed", class: ErrorClassification::McpConnectionFailed },
];

/// Classify a raw error string against the rule table (spec §4.5 part a).
/// The mechanical classification is final; there is no LLM-based
/// enrichment pass over it in this build.
pub fn classify_error(raw: &str) -> ErrorClassification {
    let lowered = raw.to_lowercase();
    for rule in RULES {
        if lowered.contains(rule.needle) {
            return rule.class;
        }
    }
    ErrorClassification::Unknown
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_auth_before_connection() {
        assert_eq!(classify_error("401 Unauthorized: invalid api key"), ErrorClassification::AuthInvalidApiKey);
    }

    #[test]
    fn classifies_rate_limit_as_retryable() {
        let class = classify_error("HTTP 429: rate limit exceeded");
        assert_eq!(class, ErrorClassification::ServerRateLimit);
        assert!(class.is_retryable());
    }

    #[test]
    fn auth_errors_are_never_retryable() {
        let class = classify_error("invalid api key supplied");
        assert!(class.is_auth());
        assert!(!class.is_retryable());
    }

    #[test]
    fn unknown_text_falls_back_to_unknown_non_retryable() {
        let class = classify_error("the gremlins ate the request");
        assert_eq!(class, ErrorClassification::Unknown);
        assert!(!class.is_retryable());
    }
}
