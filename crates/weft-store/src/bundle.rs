//! JSON export format for moving definitions between stores.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use weft_core::error::{Result, WeftError};
use weft_core::records::{AgentRecord, GraphRecord, ToolRecord};

use crate::store::{write_agent, write_graph, write_tool, SqliteGraphStore};

/// Tools, agents, and graphs as one JSON document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Bundle {
    #[serde(default)]
    pub tools: Vec<ToolRecord>,
    #[serde(default)]
    pub agents: Vec<AgentRecord>,
    #[serde(default)]
    pub graphs: Vec<GraphRecord>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub tools: usize,
    pub agents: usize,
    pub graphs: usize,
}

impl std::fmt::Display for ImportSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} tools, {} agents, {} graphs",
            self.tools, self.agents, self.graphs
        )
    }
}

impl Bundle {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            WeftError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_json(&content)
    }
}

impl SqliteGraphStore {
    /// Write every record of `bundle` in one transaction, replacing records
    /// with the same ids.
    pub fn import(&self, bundle: &Bundle) -> Result<ImportSummary> {
        self.with_conn(|conn| {
            let tx = conn
                .transaction()
                .map_err(|e| WeftError::Database(e.to_string()))?;
            for tool in &bundle.tools {
                write_tool(&tx, tool)?;
            }
            for agent in &bundle.agents {
                write_agent(&tx, agent)?;
            }
            for graph in &bundle.graphs {
                write_graph(&tx, graph)?;
            }
            tx.commit().map_err(|e| WeftError::Database(e.to_string()))
        })?;

        let summary = ImportSummary {
            tools: bundle.tools.len(),
            agents: bundle.agents.len(),
            graphs: bundle.graphs.len(),
        };
        info!(%summary, "Bundle imported");
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weft_core::records::ToolKind;
    use weft_core::traits::GraphStore;

    const BUNDLE: &str = r#"{
        "tools": [
            {"id": "t1", "name": "calculator", "kind": "builtin"},
            {"id": "t2", "name": "files", "kind": "mcp", "config": "{command: 'npx', args: ['-y', 'fs'],}"}
        ],
        "agents": [
            {"id": "a1", "name": "Helper", "prompt": "Help.", "tools": [{"tool_id": "t1"}, {"tool_id": "t2"}]}
        ],
        "graphs": [
            {
                "id": "g1",
                "name": "Help desk",
                "nodes": [
                    {"id": "in", "kind": "input"},
                    {"id": "n1", "kind": "agent", "reference_id": "a1", "position": {"x": 1, "y": 2}},
                    {"id": "out", "kind": "output"}
                ],
                "edges": [{"source": "in", "target": "n1"}, {"source": "n1", "target": "out"}]
            }
        ]
    }"#;

    #[tokio::test]
    async fn import_round_trips_through_store() {
        let store = SqliteGraphStore::in_memory().unwrap();
        let summary = store.import(&Bundle::from_json(BUNDLE).unwrap()).unwrap();
        assert_eq!(
            summary,
            ImportSummary {
                tools: 2,
                agents: 1,
                graphs: 1
            }
        );

        let tool = store.get_tool("t2").await.unwrap().unwrap();
        assert_eq!(tool.kind, ToolKind::Mcp);
        assert!(tool.config.unwrap().contains("npx"));

        let graph = store.get_graph("g1").await.unwrap().unwrap();
        assert_eq!(graph.nodes.len(), 3);
        assert_eq!(graph.edges[1].target, "out");
        assert_eq!(store.get_agent("a1").await.unwrap().unwrap().tools.len(), 2);
    }

    #[test]
    fn malformed_bundle_is_json_error() {
        assert!(matches!(
            Bundle::from_json("{\"tools\": 3}"),
            Err(WeftError::Json(_))
        ));
    }
}
