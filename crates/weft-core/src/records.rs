//! Persisted definitions as supplied by the graph store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What a tool record turns into when it is materialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolKind {
    Builtin,
    /// Tools served by an external MCP process.
    Mcp,
    /// A nested agent exposed as a single capability.
    Agent,
    #[serde(other)]
    Unknown,
}

impl ToolKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Builtin => "builtin",
            Self::Mcp => "mcp",
            Self::Agent => "agent",
            Self::Unknown => "unknown",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "builtin" => Self::Builtin,
            "mcp" => Self::Mcp,
            "agent" => Self::Agent,
            _ => Self::Unknown,
        }
    }
}

impl std::fmt::Display for ToolKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolRecord {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub kind: ToolKind,
    /// Free-text configuration as typed into the editor.
    #[serde(default)]
    pub config: Option<String>,
    /// Nested agent for `agent`-kind tools.
    #[serde(default)]
    pub agent_id: Option<String>,
}

/// Association between an agent and one of its tools.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentToolLink {
    pub tool_id: String,
    /// Replaces the tool's own config for this agent when present.
    #[serde(default)]
    pub config_override: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRecord {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub prompt: String,
    #[serde(default)]
    pub model_id: Option<String>,
    #[serde(default)]
    pub tools: Vec<AgentToolLink>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Agent,
    Tool,
    Input,
    Output,
    #[serde(other)]
    Unknown,
}

impl NodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Agent => "agent",
            Self::Tool => "tool",
            Self::Input => "input",
            Self::Output => "output",
            Self::Unknown => "unknown",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "agent" => Self::Agent,
            "tool" => Self::Tool,
            "input" => Self::Input,
            "output" => Self::Output,
            _ => Self::Unknown,
        }
    }

    /// Input and output nodes mark the ends of the graph and carry no capability.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Input | Self::Output)
    }
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Editor layout position. Not used for execution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeRecord {
    pub id: String,
    pub kind: NodeKind,
    #[serde(default)]
    pub reference_id: Option<String>,
    #[serde(default)]
    pub position: Position,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeRecord {
    pub source: String,
    pub target: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphRecord {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub model_id: Option<String>,
    #[serde(default)]
    pub last_edited: Option<DateTime<Utc>>,
    #[serde(default)]
    pub nodes: Vec<NodeRecord>,
    #[serde(default)]
    pub edges: Vec<EdgeRecord>,
}
