use std::collections::HashMap;
use std::time::Duration;

use tracing::{debug, info};

use rmcp::model::{CallToolRequestParams, RawContent, Tool as McpTool};
use rmcp::service::RunningService;
use rmcp::{RoleClient, ServiceExt};

use weft_core::error::{Result, WeftError};
use weft_core::types::ToolResult;

use crate::handler::WeftClientHandler;

type McpConnection = RunningService<RoleClient, WeftClientHandler>;

/// One running MCP server and the client session talking to it.
pub struct McpServer {
    name: String,
    connection: McpConnection,
}

impl McpServer {
    /// Spawn `command` and complete the MCP handshake within `startup_timeout_secs`.
    pub async fn connect(
        name: &str,
        command: &str,
        args: &[String],
        env: Option<&HashMap<String, String>>,
        startup_timeout_secs: u64,
    ) -> Result<Self> {
        let mut cmd = tokio::process::Command::new(command);
        cmd.args(args);
        if let Some(env) = env {
            for (k, v) in env {
                cmd.env(k, v);
            }
        }

        let transport = rmcp::transport::TokioChildProcess::new(cmd)
            .map_err(|e| WeftError::Mcp(format!("Failed to spawn {}: {}", command, e)))?;

        let handler = WeftClientHandler::new(name);
        let connection = tokio::time::timeout(
            Duration::from_secs(startup_timeout_secs),
            handler.serve(transport),
        )
        .await
        .map_err(|_| {
            WeftError::Mcp(format!(
                "MCP server '{}' did not initialize within {}s",
                name, startup_timeout_secs
            ))
        })?
        .map_err(|e| {
            WeftError::Mcp(format!("Failed to initialize MCP client for {}: {}", name, e))
        })?;

        info!(server = %name, command = %command, "MCP server connected");
        Ok(Self {
            name: name.to_string(),
            connection,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_closed(&self) -> bool {
        self.connection.is_closed()
    }

    pub async fn list_tools(&self) -> Result<Vec<McpTool>> {
        let tools = self.connection.list_all_tools().await.map_err(|e| {
            WeftError::Mcp(format!("Failed to list tools from '{}': {}", self.name, e))
        })?;
        debug!(server = %self.name, count = tools.len(), "Listed MCP tools");
        Ok(tools)
    }

    pub async fn call_tool(
        &self,
        tool_name: &str,
        arguments: Option<serde_json::Map<String, serde_json::Value>>,
    ) -> Result<ToolResult> {
        let params = CallToolRequestParams {
            name: tool_name.to_string().into(),
            arguments,
            meta: None,
            task: None,
        };

        let result = self.connection.call_tool(params).await.map_err(|e| {
            WeftError::Mcp(format!(
                "Tool call '{}.{}' failed: {}",
                self.name, tool_name, e
            ))
        })?;

        let content: Vec<String> = result
            .content
            .iter()
            .map(|c| match c.raw {
                RawContent::Text(ref t) => t.text.to_string(),
                _ => format!("{:?}", c.raw),
            })
            .collect();
        let content = content.join("\n");

        if result.is_error.unwrap_or(false) {
            Ok(ToolResult::error(content))
        } else {
            Ok(ToolResult::success(content))
        }
    }
}
