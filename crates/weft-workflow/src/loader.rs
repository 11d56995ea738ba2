//! Joins persisted records into a [`ResolvedGraph`] without instantiating anything.

use std::collections::HashSet;

use futures::future::BoxFuture;
use tracing::{debug, warn};

use weft_core::error::{Result, WeftError};
use weft_core::graph::*;
use weft_core::records::{AgentRecord, NodeKind, ToolKind, ToolRecord};
use weft_core::traits::GraphStore;

use crate::WorkflowTarget;

pub async fn load(store: &dyn GraphStore, target: &WorkflowTarget) -> Result<ResolvedGraph> {
    match target {
        WorkflowTarget::Graph(id) => load_graph(store, id).await,
        WorkflowTarget::Agent(id) => load_agent(store, id).await,
    }
}

/// Load a graph with every agent, tool, and nested agent it references.
///
/// References that no longer exist leave their node unresolved.
pub async fn load_graph(store: &dyn GraphStore, graph_id: &str) -> Result<ResolvedGraph> {
    let graph = store
        .get_graph(graph_id)
        .await?
        .ok_or_else(|| WeftError::not_found("Workflow", graph_id))?;

    let mut nodes = Vec::with_capacity(graph.nodes.len());
    for node in graph.nodes {
        let reference = match (node.kind, node.reference_id.as_deref()) {
            (NodeKind::Agent, Some(agent_id)) => match store.get_agent(agent_id).await? {
                Some(agent) => {
                    let mut path = HashSet::new();
                    NodeReference::Agent(resolve_agent(store, agent, &mut path).await?)
                }
                None => {
                    warn!(graph = %graph_id, node = %node.id, agent = %agent_id, "Agent node references a missing agent");
                    NodeReference::None
                }
            },
            (NodeKind::Tool, Some(tool_id)) => match store.get_tool(tool_id).await? {
                Some(tool) => {
                    let mut path = HashSet::new();
                    NodeReference::Tool(resolve_tool(store, tool, None, &mut path).await?)
                }
                None => {
                    warn!(graph = %graph_id, node = %node.id, tool = %tool_id, "Tool node references a missing tool");
                    NodeReference::None
                }
            },
            (NodeKind::Agent | NodeKind::Tool, None) => {
                warn!(graph = %graph_id, node = %node.id, kind = %node.kind, "Node has no reference");
                NodeReference::None
            }
            (NodeKind::Unknown, _) => {
                warn!(graph = %graph_id, node = %node.id, "Node has an unknown kind");
                NodeReference::None
            }
            (NodeKind::Input | NodeKind::Output, _) => NodeReference::None,
        };
        nodes.push(ResolvedNode {
            id: node.id,
            kind: node.kind,
            reference,
        });
    }

    debug!(graph = %graph_id, nodes = nodes.len(), edges = graph.edges.len(), "Graph loaded");
    Ok(ResolvedGraph {
        id: graph.id,
        name: graph.name,
        description: graph.description,
        model_id: graph.model_id,
        last_edited: graph.last_edited,
        nodes,
        edges: graph.edges,
    })
}

/// Load a single agent as a one-node graph with no edges.
pub async fn load_agent(store: &dyn GraphStore, agent_id: &str) -> Result<ResolvedGraph> {
    let agent = store
        .get_agent(agent_id)
        .await?
        .ok_or_else(|| WeftError::not_found("Agent", agent_id))?;
    let mut path = HashSet::new();
    let resolved = resolve_agent(store, agent, &mut path).await?;

    Ok(ResolvedGraph {
        id: resolved.id.clone(),
        name: resolved.name.clone(),
        description: resolved.description.clone(),
        model_id: resolved.model_id.clone(),
        last_edited: None,
        nodes: vec![ResolvedNode {
            id: resolved.id.clone(),
            kind: NodeKind::Agent,
            reference: NodeReference::Agent(resolved),
        }],
        edges: Vec::new(),
    })
}

/// `path` holds the agents being resolved above this one, so a nested agent
/// that refers back up the chain is left unjoined.
fn resolve_agent<'a>(
    store: &'a dyn GraphStore,
    agent: AgentRecord,
    path: &'a mut HashSet<String>,
) -> BoxFuture<'a, Result<ResolvedAgent>> {
    Box::pin(async move {
        path.insert(agent.id.clone());

        let mut tools = Vec::with_capacity(agent.tools.len());
        for link in &agent.tools {
            match store.get_tool(&link.tool_id).await? {
                Some(tool) => {
                    tools.push(
                        resolve_tool(store, tool, link.config_override.clone(), path).await?,
                    );
                }
                None => {
                    warn!(agent = %agent.id, tool = %link.tool_id, "Agent links a missing tool");
                }
            }
        }

        path.remove(&agent.id);
        Ok(ResolvedAgent {
            id: agent.id,
            name: agent.name,
            description: agent.description,
            prompt: agent.prompt,
            model_id: agent.model_id,
            tools,
        })
    })
}

async fn resolve_tool(
    store: &dyn GraphStore,
    tool: ToolRecord,
    config_override: Option<String>,
    path: &mut HashSet<String>,
) -> Result<ResolvedTool> {
    let mut nested = None;
    if tool.kind == ToolKind::Agent {
        match tool.agent_id.as_deref() {
            Some(agent_id) if path.contains(agent_id) => {
                warn!(tool = %tool.id, agent = %agent_id, "Nested agent reference cycle; not joining");
            }
            Some(agent_id) => match store.get_agent(agent_id).await? {
                Some(agent) => {
                    nested = Some(Box::new(resolve_agent(store, agent, path).await?));
                }
                None => {
                    warn!(tool = %tool.id, agent = %agent_id, "Agent tool references a missing agent");
                }
            },
            None => {
                warn!(tool = %tool.id, "Agent tool has no agent id");
            }
        }
    }

    Ok(ResolvedTool {
        id: tool.id,
        name: tool.name,
        description: tool.description,
        kind: tool.kind,
        config: config_override.or(tool.config),
        agent: nested,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use weft_core::records::AgentToolLink;
    use weft_test_utils::fixtures::{self, *};
    use weft_test_utils::MemoryGraphStore;

    #[tokio::test]
    async fn joins_agents_and_tools() {
        let store = fixtures::summarizer_store();
        let graph = load_graph(&store, SUMMARIZER_GRAPH).await.unwrap();

        assert_eq!(graph.name, "Summarize");
        assert_eq!(graph.nodes.len(), 3);
        let agent = graph.agents().next().unwrap();
        assert_eq!(agent.name, "Summarizer");
        assert_eq!(agent.tools[0].name, "current_time");
        assert!(graph.last_edited.is_some());
    }

    #[tokio::test]
    async fn unknown_graph_is_not_found() {
        let store = MemoryGraphStore::new();
        let err = load_graph(&store, "missing").await.unwrap_err();
        assert!(matches!(err, WeftError::NotFound { kind: "Workflow", .. }));
    }

    #[tokio::test]
    async fn dangling_references_leave_nodes_unresolved() {
        let store = MemoryGraphStore::new();
        store.insert_graph(graph(
            "g",
            "Broken",
            vec![
                node("n1", NodeKind::Agent, Some("ghost")),
                node("n2", NodeKind::Tool, Some("gone")),
            ],
            vec![edge("n1", "n2")],
        ));
        let graph = load_graph(&store, "g").await.unwrap();
        assert!(graph
            .nodes
            .iter()
            .all(|n| matches!(n.reference, NodeReference::None)));
        assert_eq!(graph.nodes[0].display_name(), "Node n1");
    }

    #[tokio::test]
    async fn association_override_replaces_tool_config() {
        let store = MemoryGraphStore::new();
        store.insert_tool(mcp_tool("t1", "fs", r#"{"command": "default"}"#));
        let mut a = agent("a1", "A", "p", &[]);
        a.tools.push(AgentToolLink {
            tool_id: "t1".into(),
            config_override: Some(r#"{"command": "override"}"#.into()),
        });
        store.insert_agent(a);

        let graph = load_agent(&store, "a1").await.unwrap();
        let agent = graph.agents().next().unwrap();
        assert_eq!(agent.tools[0].config.as_deref(), Some(r#"{"command": "override"}"#));
        assert!(graph.edges.is_empty());
        assert!(graph.last_edited.is_none());
        assert_eq!(graph.name, "A");
    }

    #[tokio::test]
    async fn nested_agents_join_recursively_and_cycles_stop() {
        let store = MemoryGraphStore::new();
        store.insert_tool(agent_tool("t-b", "B tool", "a-b"));
        store.insert_tool(agent_tool("t-a", "A tool", "a-a"));
        store.insert_agent(agent("a-a", "A", "p", &["t-b"]));
        store.insert_agent(agent("a-b", "B", "p", &["t-a"]));

        let graph = load_agent(&store, "a-a").await.unwrap();
        let a = graph.agents().next().unwrap();
        let b = a.tools[0].agent.as_ref().unwrap();
        assert_eq!(b.name, "B");
        // B's link back to A is left unjoined.
        assert_eq!(b.tools[0].kind, ToolKind::Agent);
        assert!(b.tools[0].agent.is_none());
    }

    #[tokio::test]
    async fn loading_agent_target_matches_load_agent() {
        let store = fixtures::summarizer_store();
        let graph = load(&store, &WorkflowTarget::Agent(SUMMARIZER_AGENT.into()))
            .await
            .unwrap();
        assert_eq!(graph.agent_node_count(), 1);
        let err = load(&store, &WorkflowTarget::Agent("nope".into())).await.unwrap_err();
        assert!(matches!(err, WeftError::NotFound { kind: "Agent", .. }));
    }
}
