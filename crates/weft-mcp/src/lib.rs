//! Tools served by external processes over the MCP stdio transport.

mod bridge;
mod client;
mod handler;

pub use bridge::{bridge_tools, McpBridgedCapability};
pub use client::McpServer;
pub use handler::WeftClientHandler;

use std::sync::Arc;

use tracing::info;

use weft_core::config::McpConfig;
use weft_core::error::{Result, WeftError};
use weft_core::recovery::LaunchSpec;
use weft_core::traits::Capability;

/// Start the server described by `launch`, list its tools, and bridge every
/// tool not named in `disabled_tools`.
///
/// The returned capabilities share one connection; the child process lives
/// until the last of them is dropped.
pub async fn spawn_capabilities(
    server_name: &str,
    launch: &LaunchSpec,
    config: &McpConfig,
) -> Result<Vec<Arc<dyn Capability>>> {
    let command = launch
        .command
        .as_deref()
        .filter(|c| !c.trim().is_empty())
        .ok_or_else(|| WeftError::Mcp(format!("No command configured for '{}'", server_name)))?;

    let server = McpServer::connect(
        server_name,
        command,
        launch.args.as_deref().unwrap_or_default(),
        launch.env.as_ref(),
        config.startup_timeout_secs,
    )
    .await?;
    let server = Arc::new(server);

    let tools = server.list_tools().await?;
    let listed = tools.len();
    let disabled = launch.disabled_tools.as_deref().unwrap_or_default();
    let capabilities = bridge_tools(&server, &tools, disabled, config.call_timeout_secs);

    info!(
        server = %server_name,
        listed,
        bridged = capabilities.len(),
        "MCP server ready"
    );
    Ok(capabilities)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_command_is_an_error() {
        let err = spawn_capabilities("empty", &LaunchSpec::default(), &McpConfig::default())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, WeftError::Mcp(_)));
    }

    #[tokio::test]
    async fn unspawnable_command_is_an_error() {
        let launch = LaunchSpec {
            command: Some("/nonexistent/weft-test-mcp-server".into()),
            ..Default::default()
        };
        let err = spawn_capabilities("ghost", &launch, &McpConfig::default())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, WeftError::Mcp(_)));
    }
}
