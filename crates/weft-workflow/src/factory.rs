//! Turns resolved tool and agent records into live capabilities and agents.

use std::path::PathBuf;
use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::{debug, warn};

use weft_agent::{Agent, NestedAgentCapability};
use weft_core::config::{AppConfig, ModelConfig};
use weft_core::error::Result;
use weft_core::graph::{ResolvedAgent, ResolvedTool};
use weft_core::records::ToolKind;
use weft_core::recovery::{locate_launch, parse_config};
use weft_core::traits::{Capability, LlmClient, ModelCatalog};
use weft_tools::{Builtin, BuiltinCapability, CapabilitySet};

struct Shared {
    llm: Arc<dyn LlmClient>,
    catalog: Arc<dyn ModelCatalog>,
    config: AppConfig,
    working_dir: PathBuf,
}

/// Materializes one [`ResolvedTool`] into zero or more capabilities.
///
/// Every failure is logged and reported as `None`; a broken tool never stops
/// the agent that links it from being built.
#[derive(Clone)]
pub struct CapabilityFactory {
    shared: Arc<Shared>,
}

impl CapabilityFactory {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        catalog: Arc<dyn ModelCatalog>,
        config: AppConfig,
    ) -> Self {
        let working_dir = config.working_dir();
        Self {
            shared: Arc::new(Shared {
                llm,
                catalog,
                config,
                working_dir,
            }),
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.shared.config
    }

    pub fn create<'a>(
        &'a self,
        tool: &'a ResolvedTool,
    ) -> BoxFuture<'a, Option<Vec<Arc<dyn Capability>>>> {
        Box::pin(async move {
            let created = match tool.kind {
                ToolKind::Builtin => self.create_builtin(tool),
                ToolKind::Mcp => self.create_mcp(tool).await,
                ToolKind::Agent => self.create_nested_agent(tool).await,
                ToolKind::Unknown => {
                    warn!(tool = %tool.id, name = %tool.name, "Tool has an unknown kind; skipping");
                    None
                }
            };
            if let Some(caps) = &created {
                debug!(tool = %tool.id, name = %tool.name, kind = %tool.kind, count = caps.len(), "Tool materialized");
            }
            created
        })
    }

    fn create_builtin(&self, tool: &ResolvedTool) -> Option<Vec<Arc<dyn Capability>>> {
        match Builtin::from_name(&tool.name) {
            Some(builtin) => Some(vec![Arc::new(BuiltinCapability(builtin))]),
            None => {
                warn!(tool = %tool.id, name = %tool.name, kind = %tool.kind, "No built-in operation with this name");
                None
            }
        }
    }

    async fn create_mcp(&self, tool: &ResolvedTool) -> Option<Vec<Arc<dyn Capability>>> {
        let config = parse_config(tool.config.as_deref());
        let launch = locate_launch(&config);
        if launch.command.as_deref().map_or(true, |c| c.trim().is_empty()) {
            warn!(tool = %tool.id, name = %tool.name, kind = %tool.kind, "MCP tool config has no command");
            return None;
        }

        match weft_mcp::spawn_capabilities(&tool.name, &launch, &self.shared.config.mcp).await {
            Ok(caps) => Some(caps),
            Err(e) => {
                warn!(tool = %tool.id, name = %tool.name, kind = %tool.kind, error = %e, "Failed to start MCP tool");
                None
            }
        }
    }

    async fn create_nested_agent(&self, tool: &ResolvedTool) -> Option<Vec<Arc<dyn Capability>>> {
        let Some(nested) = tool.agent.as_deref() else {
            warn!(tool = %tool.id, name = %tool.name, kind = %tool.kind, "Agent tool has no joined agent");
            return None;
        };

        match AgentBuilder::new(self.clone()).build(nested).await {
            Ok(agent) => {
                let capability = NestedAgentCapability::new(Arc::new(agent), &nested.description);
                Some(vec![Arc::new(capability)])
            }
            Err(e) => {
                warn!(tool = %tool.id, name = %tool.name, kind = %tool.kind, error = %e, "Failed to build nested agent");
                None
            }
        }
    }
}

/// Builds an [`Agent`] from a [`ResolvedAgent`], creating its tools through
/// the factory.
#[derive(Clone)]
pub struct AgentBuilder {
    factory: CapabilityFactory,
}

impl AgentBuilder {
    pub fn new(factory: CapabilityFactory) -> Self {
        Self { factory }
    }

    pub fn factory(&self) -> &CapabilityFactory {
        &self.factory
    }

    /// Provider settings for `model_id`, or for the configured default model.
    /// Either way the id goes through the model catalog.
    pub fn model_for(&self, model_id: Option<&str>) -> ModelConfig {
        let shared = &self.factory.shared;
        let requested = model_id
            .filter(|m| !m.trim().is_empty())
            .unwrap_or(&shared.config.model.model_id);
        shared
            .config
            .model
            .with_model_id(shared.catalog.resolve(requested))
    }

    pub fn build<'a>(&'a self, agent: &'a ResolvedAgent) -> BoxFuture<'a, Result<Agent>> {
        Box::pin(async move {
            let mut capabilities = CapabilitySet::new();
            for tool in &agent.tools {
                if let Some(caps) = self.factory.create(tool).await {
                    capabilities.extend(caps);
                }
            }
            Ok(self.instantiate(
                &agent.name,
                &agent.prompt,
                agent.model_id.as_deref(),
                capabilities,
            ))
        })
    }

    /// Create an agent from parts that are already materialized.
    pub fn instantiate(
        &self,
        name: &str,
        prompt: &str,
        model_id: Option<&str>,
        capabilities: CapabilitySet,
    ) -> Agent {
        let shared = &self.factory.shared;
        let model = self.model_for(model_id);
        debug!(agent = %name, model = %model.model_id, capabilities = capabilities.len(), "Building agent");
        Agent::new(name, prompt, model, shared.llm.clone())
            .with_capabilities(capabilities)
            .with_settings(shared.config.agent.clone())
            .with_working_dir(shared.working_dir.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use weft_core::traits::StaticCatalog;
    use weft_test_utils::MockLlmClient;

    fn factory_with(aliases: HashMap<String, String>) -> CapabilityFactory {
        CapabilityFactory::new(
            Arc::new(MockLlmClient::new()),
            Arc::new(StaticCatalog::new(aliases)),
            AppConfig::default(),
        )
    }

    fn tool(name: &str, kind: ToolKind, config: Option<&str>) -> ResolvedTool {
        ResolvedTool {
            id: format!("t-{}", name),
            name: name.into(),
            description: String::new(),
            kind,
            config: config.map(str::to_string),
            agent: None,
        }
    }

    fn resolved_agent(name: &str, tools: Vec<ResolvedTool>) -> ResolvedAgent {
        ResolvedAgent {
            id: format!("a-{}", name),
            name: name.into(),
            description: String::new(),
            prompt: format!("You are {}.", name),
            model_id: None,
            tools,
        }
    }

    #[tokio::test]
    async fn builtin_lookup_is_case_insensitive() {
        let factory = factory_with(HashMap::new());
        let caps = factory
            .create(&tool("Calculator", ToolKind::Builtin, None))
            .await
            .unwrap();
        assert_eq!(caps.len(), 1);
        assert_eq!(caps[0].name(), "calculator");
        assert!(factory
            .create(&tool("python_repl", ToolKind::Builtin, None))
            .await
            .is_none());
    }

    #[tokio::test]
    async fn mcp_without_command_is_none() {
        let factory = factory_with(HashMap::new());
        let t = tool("files", ToolKind::Mcp, Some("{args: ['-y'],}"));
        assert!(factory.create(&t).await.is_none());
        let t = tool("files", ToolKind::Mcp, Some(r#"{"command": "   "}"#));
        assert!(factory.create(&t).await.is_none());
    }

    #[tokio::test]
    async fn unknown_kind_and_missing_nested_agent_are_none() {
        let factory = factory_with(HashMap::new());
        assert!(factory.create(&tool("x", ToolKind::Unknown, None)).await.is_none());
        assert!(factory.create(&tool("y", ToolKind::Agent, None)).await.is_none());
    }

    #[tokio::test]
    async fn agent_survives_broken_tools() {
        let builder = AgentBuilder::new(factory_with(HashMap::new()));
        let agent = builder
            .build(&resolved_agent(
                "Helper",
                vec![
                    tool("calculator", ToolKind::Builtin, None),
                    tool("files", ToolKind::Mcp, Some("not even close to json")),
                    tool("nope", ToolKind::Builtin, None),
                ],
            ))
            .await
            .unwrap();
        assert_eq!(agent.capabilities().names(), vec!["calculator"]);
        assert_eq!(agent.system_prompt(), "You are Helper.");
    }

    #[tokio::test]
    async fn nested_agent_becomes_sanitized_capability() {
        let builder = AgentBuilder::new(factory_with(HashMap::new()));
        let mut t = tool("delegate", ToolKind::Agent, None);
        t.agent = Some(Box::new(resolved_agent("Research Bot", vec![])));

        let caps = builder.factory().create(&t).await.unwrap();
        assert_eq!(caps[0].name(), "Research_Bot");
        assert_eq!(caps[0].description(), "Execute the agent called Research Bot");
    }

    #[test]
    fn model_ids_resolve_through_catalog() {
        let builder = AgentBuilder::new(factory_with(HashMap::from([(
            "claude-sonnet".to_string(),
            "us.anthropic.claude-sonnet".to_string(),
        )])));
        assert_eq!(
            builder.model_for(Some("claude-sonnet")).model_id,
            "us.anthropic.claude-sonnet"
        );
        assert_eq!(builder.model_for(Some("gpt-4o")).model_id, "gpt-4o");
        assert_eq!(
            builder.model_for(None).model_id,
            AppConfig::default().model.model_id
        );
    }
}
