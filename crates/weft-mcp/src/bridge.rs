use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::debug;

use rmcp::model::Tool as McpTool;

use weft_core::error::Result;
use weft_core::traits::Capability;
use weft_core::types::{CapabilityContext, ToolResult};

use crate::McpServer;

/// A capability that forwards to a tool on an MCP server.
pub struct McpBridgedCapability {
    tool_name: String,
    description: String,
    schema: serde_json::Value,
    server: Arc<McpServer>,
    timeout: u64,
}

impl Capability for McpBridgedCapability {
    fn name(&self) -> &str {
        &self.tool_name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn input_schema(&self) -> serde_json::Value {
        self.schema.clone()
    }

    fn invoke(
        &self,
        input: serde_json::Value,
        _ctx: CapabilityContext,
    ) -> BoxFuture<'_, Result<ToolResult>> {
        Box::pin(async move {
            let arguments = input.as_object().cloned();
            debug!(server = %self.server.name(), tool = %self.tool_name, "Calling MCP tool");

            match self.server.call_tool(&self.tool_name, arguments).await {
                Ok(result) => Ok(result),
                Err(e) => Ok(ToolResult::error(e.to_string())),
            }
        })
    }

    fn timeout_secs(&self) -> u64 {
        self.timeout
    }
}

fn is_enabled(tool_name: &str, disabled: &[String]) -> bool {
    !disabled.iter().any(|d| d == tool_name)
}

/// Wrap every listed tool not named in `disabled` as a capability.
pub fn bridge_tools(
    server: &Arc<McpServer>,
    tools: &[McpTool],
    disabled: &[String],
    timeout_secs: u64,
) -> Vec<Arc<dyn Capability>> {
    let mut bridged: Vec<Arc<dyn Capability>> = Vec::new();
    for tool in tools {
        if !is_enabled(&tool.name, disabled) {
            debug!(server = %server.name(), tool = %tool.name, "Skipping disabled MCP tool");
            continue;
        }

        let description = tool
            .description
            .as_ref()
            .map(|d| d.to_string())
            .unwrap_or_else(|| format!("MCP tool: {}", tool.name));

        let schema = serde_json::to_value(&*tool.input_schema)
            .unwrap_or(serde_json::json!({"type": "object"}));

        bridged.push(Arc::new(McpBridgedCapability {
            tool_name: tool.name.to_string(),
            description,
            schema,
            server: server.clone(),
            timeout: timeout_secs,
        }));
        debug!(server = %server.name(), tool = %tool.name, "Bridged MCP tool");
    }
    bridged
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_names_match_exactly() {
        let disabled = vec!["delete_file".to_string()];
        assert!(!is_enabled("delete_file", &disabled));
        assert!(is_enabled("delete_files", &disabled));
        assert!(is_enabled("read_file", &[]));
    }
}
