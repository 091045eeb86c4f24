//! Agent descriptors: the immutable configuration a run executes under.

use serde::{Deserialize, Serialize};

use crate::ids::McpName;

/// A single tool exposed by an MCP server, reduced to what the Planner's
/// prompt needs: `mcpName: [toolName, ...]` plus enough detail for argument
/// validation (spec §4.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    /// JSON schema for the tool's arguments, as advertised by the MCP server.
    pub input_schema: serde_json::Value,
}

/// One MCP server an agent is allowed to use, with its tool catalogue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpServerHandle {
    pub name: McpName,
    pub tools: Vec<ToolDescriptor>,
}

impl McpServerHandle {
    pub fn has_tool(&self, tool_name: &str) -> bool {
        self.tools.iter().any(|t| t.name == tool_name)
    }
}

/// The LLM capability set the Planner may dispatch to directly, independent
/// of any MCP server (spec §4.2).
pub const LLM_CAPABILITIES: &[&str] =
    &["analyze", "compare", "summarize", "format", "translate", "extract"];

/// Immutable, per-run configuration: name, mission, allow-listed MCP
/// servers, default language, optional welcome text (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentDescriptor {
    pub name: String,
    pub mission: String,
    pub mcp_servers: Vec<McpServerHandle>,
    pub default_language: Option<String>,
    pub welcome_text: Option<String>,
}

impl AgentDescriptor {
    pub fn mcp(&self, name: &McpName) -> Option<&McpServerHandle> {
        self.mcp_servers.iter().find(|s| &s.name == name)
    }

    pub fn has_mcp(&self, name: &McpName) -> bool {
        self.mcp_servers.iter().any(|s| &s.name == name)
    }

    /// Compact `mcpName: [toolName, ...]` view for the Planner prompt.
    pub fn tool_catalogue(&self) -> Vec<(String, Vec<String>)> {
        self.mcp_servers
            .iter()
            .map(|s| (s.name.0.clone(), s.tools.iter().map(|t| t.name.clone()).collect()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agent() -> AgentDescriptor {
        AgentDescriptor {
            name: "crypto-agent".into(),
            mission: "Answer crypto market questions".into(),
            mcp_servers: vec![McpServerHandle {
                name: "coingecko-mcp".into(),
                tools: vec![ToolDescriptor {
                    name: "get_current_fng_tool".into(),
                    description: "Fetch Fear & Greed index".into(),
                    input_schema: serde_json::json!({}),
                }],
            }],
            default_language: Some("en".into()),
            welcome_text: None,
        }
    }

    #[test]
    fn finds_mcp_by_name() {
        let a = agent();
        assert!(a.has_mcp(&"coingecko-mcp".into()));
        assert!(!a.has_mcp(&"dexscreener-mcp".into()));
    }

    #[test]
    fn catalogue_is_compact() {
        let a = agent();
        let cat = a.tool_catalogue();
        assert_eq!(cat, vec![("coingecko-mcp".to_string(), vec!["get_current_fng_tool".to_string()])]);
    }
}
