use std::collections::HashMap;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::stream::BoxStream;

use crate::config::ModelConfig;
use crate::error::Result;
use crate::records::{AgentRecord, GraphRecord, ToolRecord};
use crate::types::*;

/// Streaming chat client for one provider.
pub trait LlmClient: Send + Sync + 'static {
    /// Send a chat request and receive a stream of deltas.
    fn chat_stream(
        &self,
        config: &ModelConfig,
        messages: Vec<ChatMessage>,
        tools: &[ToolDefinition],
    ) -> BoxFuture<'_, Result<BoxStream<'_, Result<StreamDelta>>>>;
}

/// An invocable unit an agent can call: a built-in operation, an MCP tool,
/// or a nested agent.
pub trait Capability: Send + Sync + 'static {
    /// Name used in model tool calls.
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON Schema for the input object.
    fn input_schema(&self) -> serde_json::Value;

    fn invoke(
        &self,
        input: serde_json::Value,
        ctx: CapabilityContext,
    ) -> BoxFuture<'_, Result<ToolResult>>;

    /// Timeout in seconds for one invocation.
    fn timeout_secs(&self) -> u64 {
        30
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            input_schema: self.input_schema(),
        }
    }
}

/// Read-only, point-in-time access to persisted definitions.
pub trait GraphStore: Send + Sync + 'static {
    fn get_graph(&self, id: &str) -> BoxFuture<'_, Result<Option<GraphRecord>>>;

    fn get_agent(&self, id: &str) -> BoxFuture<'_, Result<Option<AgentRecord>>>;

    fn get_tool(&self, id: &str) -> BoxFuture<'_, Result<Option<ToolRecord>>>;

    /// Current edit timestamp of a graph; `None` when the graph has none or is gone.
    fn graph_last_edited(&self, id: &str) -> BoxFuture<'_, Result<Option<DateTime<Utc>>>>;
}

/// Maps a logical model id to the id actually sent to the provider.
pub trait ModelCatalog: Send + Sync + 'static {
    fn resolve(&self, model_id: &str) -> String;
}

/// Catalog backed by a fixed alias table; unknown ids pass through.
#[derive(Debug, Clone, Default)]
pub struct StaticCatalog {
    aliases: HashMap<String, String>,
}

impl StaticCatalog {
    pub fn new(aliases: HashMap<String, String>) -> Self {
        Self { aliases }
    }
}

impl ModelCatalog for StaticCatalog {
    fn resolve(&self, model_id: &str) -> String {
        self.aliases
            .get(model_id)
            .cloned()
            .unwrap_or_else(|| model_id.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_catalog_maps_aliases() {
        let catalog = StaticCatalog::new(HashMap::from([(
            "claude-sonnet".to_string(),
            "us.anthropic.claude-sonnet".to_string(),
        )]));
        assert_eq!(catalog.resolve("claude-sonnet"), "us.anthropic.claude-sonnet");
        assert_eq!(catalog.resolve("gpt-4o"), "gpt-4o");
    }
}
