use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;

use weft_core::error::Result;
use weft_core::records::{AgentRecord, GraphRecord, ToolRecord};
use weft_core::traits::GraphStore;

/// In-memory [`GraphStore`] that tests can edit while sessions run.
#[derive(Default)]
pub struct MemoryGraphStore {
    graphs: RwLock<HashMap<String, GraphRecord>>,
    agents: RwLock<HashMap<String, AgentRecord>>,
    tools: RwLock<HashMap<String, ToolRecord>>,
}

impl MemoryGraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_graph(&self, graph: GraphRecord) {
        self.graphs.write().unwrap().insert(graph.id.clone(), graph);
    }

    pub fn insert_agent(&self, agent: AgentRecord) {
        self.agents.write().unwrap().insert(agent.id.clone(), agent);
    }

    pub fn insert_tool(&self, tool: ToolRecord) {
        self.tools.write().unwrap().insert(tool.id.clone(), tool);
    }

    pub fn remove_graph(&self, id: &str) {
        self.graphs.write().unwrap().remove(id);
    }

    /// Mark a graph as edited now.
    pub fn touch_graph(&self, id: &str) {
        self.touch_graph_at(id, Utc::now());
    }

    pub fn touch_graph_at(&self, id: &str, at: DateTime<Utc>) {
        if let Some(graph) = self.graphs.write().unwrap().get_mut(id) {
            graph.last_edited = Some(at);
        }
    }
}

impl GraphStore for MemoryGraphStore {
    fn get_graph(&self, id: &str) -> BoxFuture<'_, Result<Option<GraphRecord>>> {
        let graph = self.graphs.read().unwrap().get(id).cloned();
        Box::pin(async move { Ok(graph) })
    }

    fn get_agent(&self, id: &str) -> BoxFuture<'_, Result<Option<AgentRecord>>> {
        let agent = self.agents.read().unwrap().get(id).cloned();
        Box::pin(async move { Ok(agent) })
    }

    fn get_tool(&self, id: &str) -> BoxFuture<'_, Result<Option<ToolRecord>>> {
        let tool = self.tools.read().unwrap().get(id).cloned();
        Box::pin(async move { Ok(tool) })
    }

    fn graph_last_edited(&self, id: &str) -> BoxFuture<'_, Result<Option<DateTime<Utc>>>> {
        let edited = self
            .graphs
            .read()
            .unwrap()
            .get(id)
            .and_then(|g| g.last_edited);
        Box::pin(async move { Ok(edited) })
    }
}
