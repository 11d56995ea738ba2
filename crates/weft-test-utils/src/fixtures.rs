//! Record builders and ready-made stores for common graph shapes.

use chrono::{TimeZone, Utc};

use weft_core::records::*;

use crate::MemoryGraphStore;

pub const SUMMARIZER_GRAPH: &str = "g-summarize";
pub const SUMMARIZER_AGENT: &str = "a-summarizer";
pub const CHAIN_GRAPH: &str = "g-chain";

pub fn builtin_tool(id: &str, name: &str) -> ToolRecord {
    ToolRecord {
        id: id.to_string(),
        name: name.to_string(),
        description: format!("{} tool", name),
        kind: ToolKind::Builtin,
        config: None,
        agent_id: None,
    }
}

pub fn mcp_tool(id: &str, name: &str, config: &str) -> ToolRecord {
    ToolRecord {
        id: id.to_string(),
        name: name.to_string(),
        description: String::new(),
        kind: ToolKind::Mcp,
        config: Some(config.to_string()),
        agent_id: None,
    }
}

/// A tool that exposes another agent.
pub fn agent_tool(id: &str, name: &str, agent_id: &str) -> ToolRecord {
    ToolRecord {
        id: id.to_string(),
        name: name.to_string(),
        description: String::new(),
        kind: ToolKind::Agent,
        config: None,
        agent_id: Some(agent_id.to_string()),
    }
}

pub fn agent(id: &str, name: &str, prompt: &str, tool_ids: &[&str]) -> AgentRecord {
    AgentRecord {
        id: id.to_string(),
        name: name.to_string(),
        description: format!("The {} agent", name),
        prompt: prompt.to_string(),
        model_id: None,
        tools: tool_ids
            .iter()
            .map(|t| AgentToolLink {
                tool_id: t.to_string(),
                config_override: None,
            })
            .collect(),
    }
}

pub fn node(id: &str, kind: NodeKind, reference_id: Option<&str>) -> NodeRecord {
    NodeRecord {
        id: id.to_string(),
        kind,
        reference_id: reference_id.map(str::to_string),
        position: Position::default(),
    }
}

pub fn edge(source: &str, target: &str) -> EdgeRecord {
    EdgeRecord {
        source: source.to_string(),
        target: target.to_string(),
    }
}

pub fn graph(id: &str, name: &str, nodes: Vec<NodeRecord>, edges: Vec<EdgeRecord>) -> GraphRecord {
    GraphRecord {
        id: id.to_string(),
        name: name.to_string(),
        description: format!("{} workflow", name),
        model_id: None,
        last_edited: Some(Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()),
        nodes,
        edges,
    }
}

/// `[input] -> [agent: Summarizer] -> [output]`.
pub fn summarizer_store() -> MemoryGraphStore {
    let store = MemoryGraphStore::new();
    store.insert_tool(builtin_tool("t-time", "current_time"));
    store.insert_agent(agent(
        SUMMARIZER_AGENT,
        "Summarizer",
        "You summarize text in one sentence.",
        &["t-time"],
    ));
    store.insert_graph(graph(
        SUMMARIZER_GRAPH,
        "Summarize",
        vec![
            node("in", NodeKind::Input, None),
            node("n-sum", NodeKind::Agent, Some(SUMMARIZER_AGENT)),
            node("out", NodeKind::Output, None),
        ],
        vec![edge("in", "n-sum"), edge("n-sum", "out")],
    ));
    store
}

/// `[input] -> [agent: A] -> [agent: B] -> [output]`.
pub fn chain_store() -> MemoryGraphStore {
    let store = MemoryGraphStore::new();
    store.insert_agent(agent("a-a", "A", "You are A.", &[]));
    store.insert_agent(agent("a-b", "B", "You are B.", &[]));
    store.insert_graph(graph(
        CHAIN_GRAPH,
        "Chain",
        vec![
            node("in", NodeKind::Input, None),
            node("n-a", NodeKind::Agent, Some("a-a")),
            node("n-b", NodeKind::Agent, Some("a-b")),
            node("out", NodeKind::Output, None),
        ],
        vec![edge("in", "n-a"), edge("n-a", "n-b"), edge("n-b", "out")],
    ));
    store
}
