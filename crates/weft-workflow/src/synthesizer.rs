//! Builds the top-level agent that serves a session.

use std::fmt::Write as _;
use std::sync::Arc;

use tracing::{debug, info, warn};

use weft_agent::{Agent, NestedAgentCapability};
use weft_core::error::Result;
use weft_core::fragment::FragmentSink;
use weft_core::graph::{ResolvedGraph, ResolvedNode};
use weft_core::records::NodeKind;
use weft_core::types::SessionId;
use weft_tools::CapabilitySet;

use crate::factory::AgentBuilder;

const ROLE: &str = "You are the Workflow Orchestrator responsible for managing the execution of this workflow. You receive user messages and route them through the workflow according to the graph structure below.";

const INSTRUCTIONS: &str = "\
1. When you receive a user message, identify the appropriate starting point in the workflow.
2. Route the message through the workflow according to the graph structure.
3. Each agent or tool in the workflow will process the message and produce a response.
4. Follow the graph edges to determine the next node (agent or tool) to invoke.
5. For agent nodes, use the corresponding agent tool to process the message.
6. For tool nodes, use the corresponding tool directly to process the message.
7. Return the final response to the user.
";

/// The agent a session hands every user message to.
pub struct Orchestrator {
    agent: Arc<Agent>,
    direct: bool,
}

impl Orchestrator {
    pub fn agent(&self) -> &Arc<Agent> {
        &self.agent
    }

    pub fn prompt(&self) -> &str {
        self.agent.system_prompt()
    }

    /// True when the graph's single agent serves the session unwrapped.
    pub fn is_direct(&self) -> bool {
        self.direct
    }

    pub fn capability_names(&self) -> Vec<String> {
        self.agent
            .capabilities()
            .names()
            .into_iter()
            .map(str::to_string)
            .collect()
    }

    pub async fn run(
        &self,
        session_id: &SessionId,
        message: &str,
        sink: &FragmentSink,
    ) -> Result<String> {
        self.agent.run(session_id, message, sink).await
    }
}

/// Build the orchestrator for `graph`.
///
/// Agents that fail to build are skipped. A graph with exactly one agent node
/// and no edges is served by that agent as-is.
pub async fn synthesize(graph: &ResolvedGraph, builder: &AgentBuilder) -> Result<Orchestrator> {
    let mut agents = Vec::new();
    for resolved in graph.agents() {
        match builder.build(resolved).await {
            Ok(agent) => agents.push((Arc::new(agent), resolved.description.as_str())),
            Err(e) => warn!(graph = %graph.id, agent = %resolved.id, error = %e, "Skipping agent that failed to build"),
        }
    }

    if graph.agent_node_count() == 1 && agents.len() == 1 && graph.edges.is_empty() {
        let (agent, _) = agents.remove(0);
        info!(graph = %graph.id, agent = %agent.name(), "Single agent serves the session directly");
        return Ok(Orchestrator {
            agent,
            direct: true,
        });
    }

    let mut capabilities = CapabilitySet::new();
    for (agent, description) in agents {
        capabilities.register(Arc::new(NestedAgentCapability::new(agent, description)));
    }
    for tool in graph.tools() {
        if let Some(caps) = builder.factory().create(tool).await {
            capabilities.extend(caps);
        }
    }

    let prompt = build_prompt(graph);
    debug!(graph = %graph.id, capabilities = capabilities.len(), "Synthesized orchestrator");
    let agent = builder.instantiate(
        &format!("{} orchestrator", graph.name),
        &prompt,
        graph.model_id.as_deref(),
        capabilities,
    );
    Ok(Orchestrator {
        agent: Arc::new(agent),
        direct: false,
    })
}

/// System prompt describing the graph's nodes and allowed hand-offs.
pub fn build_prompt(graph: &ResolvedGraph) -> String {
    let mut prompt = format!("# Workflow: {}\n\n{}\n\n", graph.name, graph.description);
    let _ = write!(prompt, "## Your Role\n{}\n\n", ROLE);

    prompt.push_str("## Workflow Graph Structure\n### Nodes:\n");
    for node in graph.nodes.iter().filter(|n| !n.kind.is_terminal()) {
        let _ = writeln!(
            prompt,
            "- {} (ID: {}, Type: {})",
            node.display_name(),
            node.id,
            node.kind
        );
    }

    prompt.push_str("\n### Edges:\n");
    for edge in &graph.edges {
        let source = match graph.node(&edge.source) {
            Some(n) if n.kind == NodeKind::Input => "the initial input".to_string(),
            found => label(found, &edge.source),
        };
        let target = match graph.node(&edge.target) {
            Some(n) if n.kind == NodeKind::Output => "the user as final response".to_string(),
            found => label(found, &edge.target),
        };
        let _ = writeln!(prompt, "- you may send the result from {} to {}", source, target);
    }

    let _ = write!(prompt, "\n## Instructions\n{}", INSTRUCTIONS);
    prompt
}

fn label(node: Option<&ResolvedNode>, id: &str) -> String {
    match node {
        Some(n) => n.display_name(),
        None => format!("Node {}", id),
    }
}
