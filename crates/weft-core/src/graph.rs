//! Execution-ready snapshots of a graph, fully joined.
//!
//! A [`ResolvedGraph`] is produced once per session and never changes while
//! that session runs, even if the store is edited underneath it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::records::{EdgeRecord, NodeKind, ToolKind};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolvedTool {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub kind: ToolKind,
    /// Effective config: the association override if one was set, else the tool's own.
    #[serde(default)]
    pub config: Option<String>,
    /// Joined nested agent for `agent`-kind tools.
    #[serde(default)]
    pub agent: Option<Box<ResolvedAgent>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolvedAgent {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub prompt: String,
    #[serde(default)]
    pub model_id: Option<String>,
    #[serde(default)]
    pub tools: Vec<ResolvedTool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeReference {
    Agent(ResolvedAgent),
    Tool(ResolvedTool),
    /// Input/output nodes, or a reference that no longer exists.
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolvedNode {
    pub id: String,
    pub kind: NodeKind,
    pub reference: NodeReference,
}

impl ResolvedNode {
    pub fn display_name(&self) -> String {
        match &self.reference {
            NodeReference::Agent(a) => a.name.clone(),
            NodeReference::Tool(t) => t.name.clone(),
            NodeReference::None => format!("Node {}", self.id),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolvedGraph {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub model_id: Option<String>,
    #[serde(default)]
    pub last_edited: Option<DateTime<Utc>>,
    pub nodes: Vec<ResolvedNode>,
    #[serde(default)]
    pub edges: Vec<EdgeRecord>,
}

impl ResolvedGraph {
    pub fn node(&self, id: &str) -> Option<&ResolvedNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Agent nodes whose reference was resolved, in node order.
    pub fn agents(&self) -> impl Iterator<Item = &ResolvedAgent> {
        self.nodes.iter().filter_map(|n| match (&n.kind, &n.reference) {
            (NodeKind::Agent, NodeReference::Agent(a)) => Some(a),
            _ => None,
        })
    }

    /// Tool nodes whose reference was resolved, in node order.
    pub fn tools(&self) -> impl Iterator<Item = &ResolvedTool> {
        self.nodes.iter().filter_map(|n| match (&n.kind, &n.reference) {
            (NodeKind::Tool, NodeReference::Tool(t)) => Some(t),
            _ => None,
        })
    }

    pub fn agent_node_count(&self) -> usize {
        self.nodes.iter().filter(|n| n.kind == NodeKind::Agent).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agent(name: &str) -> ResolvedAgent {
        ResolvedAgent {
            id: format!("{name}-id"),
            name: name.to_string(),
            description: String::new(),
            prompt: "p".into(),
            model_id: None,
            tools: vec![],
        }
    }

    #[test]
    fn display_name_falls_back_to_node_id() {
        let node = ResolvedNode {
            id: "n7".into(),
            kind: NodeKind::Agent,
            reference: NodeReference::None,
        };
        assert_eq!(node.display_name(), "Node n7");
    }

    #[test]
    fn agents_skip_unresolved_nodes() {
        let graph = ResolvedGraph {
            id: "g".into(),
            name: "G".into(),
            description: String::new(),
            model_id: None,
            last_edited: None,
            nodes: vec![
                ResolvedNode {
                    id: "a".into(),
                    kind: NodeKind::Agent,
                    reference: NodeReference::Agent(agent("A")),
                },
                ResolvedNode {
                    id: "b".into(),
                    kind: NodeKind::Agent,
                    reference: NodeReference::None,
                },
            ],
            edges: vec![],
        };
        assert_eq!(graph.agents().count(), 1);
        assert_eq!(graph.agent_node_count(), 2);
    }

    #[test]
    fn snapshot_survives_json() {
        let graph = ResolvedGraph {
            id: "g".into(),
            name: "G".into(),
            description: "d".into(),
            model_id: Some("m".into()),
            last_edited: Some(Utc::now()),
            nodes: vec![ResolvedNode {
                id: "a".into(),
                kind: NodeKind::Agent,
                reference: NodeReference::Agent(agent("A")),
            }],
            edges: vec![],
        };
        let json = serde_json::to_string(&graph).unwrap();
        let back: ResolvedGraph = serde_json::from_str(&json).unwrap();
        assert_eq!(back.agents().next().unwrap().name, "A");
        assert_eq!(back.last_edited, graph.last_edited);
    }
}
