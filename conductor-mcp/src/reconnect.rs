//! Reconnection management for MCP server transports.

use std::time::Duration;

use tracing::{error, info, warn};

use crate::error::{McpError, McpResult};

/// Retries a connect operation with exponential backoff, capped at
/// `max_delay`, giving up after `max_retries` attempts.
pub struct ReconnectionManager {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for ReconnectionManager {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl ReconnectionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// delay = min(base_delay * 2^(attempt-1), max_delay)
    pub fn calculate_backoff(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let exponent = attempt.saturating_sub(1).min(63);
        let factor = 2u64.saturating_pow(exponent);
        let delay = (self.base_delay.as_millis() as u64).saturating_mul(factor);
        Duration::from_millis(delay.min(self.max_delay.as_millis() as u64))
    }

    pub async fn reconnect<F, Fut, T>(&self, server_name: &str, mut connect_fn: F) -> McpResult<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = McpResult<T>>,
    {
        for attempt in 1..=self.max_retries {
            match connect_fn().await {
                Ok(val) => {
                    info!(server = server_name, attempt, "reconnected");
                    return Ok(val);
                }
                Err(e) => {
                    if attempt >= self.max_retries {
                        error!(server = server_name, attempt, error = %e, "reconnect exhausted");
                        return Err(e);
                    }
                    let delay = self.calculate_backoff(attempt);
                    warn!(server = server_name, attempt, error = %e, ?delay, "reconnect attempt failed");
                    tokio::time::sleep(delay).await;
                }
            }
        }
        Err(McpError::ConnectionFailed(format!("max retries reached for {server_name}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_until_cap() {
        let manager = ReconnectionManager::new();
        assert_eq!(manager.calculate_backoff(1), Duration::from_millis(500));
        assert_eq!(manager.calculate_backoff(2), Duration::from_millis(1000));
        assert_eq!(manager.calculate_backoff(5), Duration::from_millis(8000));
        assert_eq!(manager.calculate_backoff(20), manager.max_delay);
    }

    #[tokio::test]
    async fn reconnect_retries_then_succeeds() {
        let manager = ReconnectionManager {
            max_retries: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        };
        let mut attempts = 0u32;
        let result = manager
            .reconnect("test-mcp", || {
                attempts += 1;
                let ok = attempts >= 2;
                async move {
                    if ok {
                        Ok(42)
                    } else {
                        Err(McpError::ConnectionFailed("not yet".into()))
                    }
                }
            })
            .await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn reconnect_gives_up_after_max_retries() {
        let manager = ReconnectionManager {
            max_retries: 2,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
        };
        let result: McpResult<()> = manager
            .reconnect("test-mcp", || async { Err(McpError::ConnectionFailed("nope".into())) })
            .await;
        assert!(result.is_err());
    }
}
