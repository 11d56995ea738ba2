use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;
use tracing::debug;

use weft_core::error::{Result, WeftError};
use weft_core::records::*;
use weft_core::traits::GraphStore;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS tool (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        description TEXT NOT NULL DEFAULT '',
        tool_type TEXT NOT NULL,
        config TEXT,
        agent_id TEXT
    );

    CREATE TABLE IF NOT EXISTS agent (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        description TEXT NOT NULL DEFAULT '',
        prompt TEXT NOT NULL,
        model_id TEXT
    );

    CREATE TABLE IF NOT EXISTS agent_tool (
        agent_id TEXT NOT NULL REFERENCES agent(id) ON DELETE CASCADE,
        tool_id TEXT NOT NULL,
        config_override TEXT,
        seq INTEGER NOT NULL,
        PRIMARY KEY (agent_id, tool_id)
    );

    CREATE TABLE IF NOT EXISTS workflow (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        description TEXT NOT NULL DEFAULT '',
        model_id TEXT,
        last_edited TEXT
    );

    CREATE TABLE IF NOT EXISTS workflow_node (
        workflow_id TEXT NOT NULL REFERENCES workflow(id) ON DELETE CASCADE,
        id TEXT NOT NULL,
        node_type TEXT NOT NULL,
        reference_id TEXT,
        position_x REAL NOT NULL DEFAULT 0,
        position_y REAL NOT NULL DEFAULT 0,
        seq INTEGER NOT NULL,
        PRIMARY KEY (workflow_id, id)
    );

    CREATE TABLE IF NOT EXISTS workflow_edge (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        workflow_id TEXT NOT NULL REFERENCES workflow(id) ON DELETE CASCADE,
        source_id TEXT NOT NULL,
        target_id TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_edge_workflow ON workflow_edge(workflow_id, id);
";

fn db_err(e: rusqlite::Error) -> WeftError {
    WeftError::Database(e.to_string())
}

fn parse_timestamp(ts: Option<String>) -> Option<DateTime<Utc>> {
    ts.and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

/// One row of [`SqliteGraphStore::list_graphs`].
#[derive(Debug, Clone, PartialEq)]
pub struct GraphSummary {
    pub id: String,
    pub name: String,
    pub last_edited: Option<DateTime<Utc>>,
}

/// SQLite-backed store of tools, agents, and workflow graphs.
pub struct SqliteGraphStore {
    conn: Mutex<Connection>,
}

impl SqliteGraphStore {
    /// Open or create a SQLite database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                WeftError::Database(format!("Failed to create db directory: {}", e))
            })?;
        }

        let conn = Connection::open(path).map_err(db_err)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(db_err)?;
        Self::init(conn, Some(path))
    }

    /// Open an in-memory database (for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        Self::init(conn, None)
    }

    fn init(conn: Connection, path: Option<&Path>) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys=ON;").map_err(db_err)?;
        conn.execute_batch(SCHEMA).map_err(db_err)?;
        if let Some(path) = path {
            debug!(path = %path.display(), "Graph store opened");
        }
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub(crate) fn with_conn<T>(&self, f: impl FnOnce(&mut Connection) -> Result<T>) -> Result<T> {
        let mut conn = self
            .conn
            .lock()
            .map_err(|e| WeftError::Database(e.to_string()))?;
        f(&mut conn)
    }

    pub fn insert_tool(&self, tool: &ToolRecord) -> Result<()> {
        self.with_conn(|conn| write_tool(conn, tool))
    }

    /// Insert or replace an agent together with its tool links.
    pub fn insert_agent(&self, agent: &AgentRecord) -> Result<()> {
        self.with_conn(|conn| {
            let tx = conn.transaction().map_err(db_err)?;
            write_agent(&tx, agent)?;
            tx.commit().map_err(db_err)
        })
    }

    /// Insert or replace a graph with its nodes and edges. A graph without an
    /// edit time is stamped with the current time.
    pub fn insert_graph(&self, graph: &GraphRecord) -> Result<()> {
        self.with_conn(|conn| {
            let tx = conn.transaction().map_err(db_err)?;
            write_graph(&tx, graph)?;
            tx.commit().map_err(db_err)
        })
    }

    /// Record that a graph was edited now.
    pub fn touch_graph(&self, id: &str) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let changed = self.with_conn(|conn| {
            conn.execute(
                "UPDATE workflow SET last_edited = ?1 WHERE id = ?2",
                params![now, id],
            )
            .map_err(db_err)
        })?;
        if changed == 0 {
            return Err(WeftError::not_found("Workflow", id));
        }
        Ok(())
    }

    pub fn delete_graph(&self, id: &str) -> Result<bool> {
        let changed = self.with_conn(|conn| {
            conn.execute("DELETE FROM workflow WHERE id = ?1", params![id])
                .map_err(db_err)
        })?;
        Ok(changed > 0)
    }

    pub fn list_graphs(&self) -> Result<Vec<GraphSummary>> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare("SELECT id, name, last_edited FROM workflow ORDER BY name, id")
                .map_err(db_err)?;
            let rows = stmt
                .query_map([], |row| {
                    Ok(GraphSummary {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        last_edited: parse_timestamp(row.get(2)?),
                    })
                })
                .map_err(db_err)?;
            rows.collect::<std::result::Result<Vec<_>, _>>().map_err(db_err)
        })
    }

    fn read_graph(&self, id: &str) -> Result<Option<GraphRecord>> {
        self.with_conn(|conn| {
            let header = conn
                .query_row(
                    "SELECT name, description, model_id, last_edited FROM workflow WHERE id = ?1",
                    params![id],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, Option<String>>(2)?,
                            row.get::<_, Option<String>>(3)?,
                        ))
                    },
                )
                .optional()
                .map_err(db_err)?;
            let Some((name, description, model_id, last_edited)) = header else {
                return Ok(None);
            };

            let mut stmt = conn
                .prepare(
                    "SELECT id, node_type, reference_id, position_x, position_y
                     FROM workflow_node WHERE workflow_id = ?1 ORDER BY seq",
                )
                .map_err(db_err)?;
            let nodes = stmt
                .query_map(params![id], |row| {
                    let kind: String = row.get(1)?;
                    Ok(NodeRecord {
                        id: row.get(0)?,
                        kind: NodeKind::parse(&kind),
                        reference_id: row.get(2)?,
                        position: Position {
                            x: row.get(3)?,
                            y: row.get(4)?,
                        },
                    })
                })
                .map_err(db_err)?
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(db_err)?;

            let mut stmt = conn
                .prepare(
                    "SELECT source_id, target_id FROM workflow_edge
                     WHERE workflow_id = ?1 ORDER BY id",
                )
                .map_err(db_err)?;
            let edges = stmt
                .query_map(params![id], |row| {
                    Ok(EdgeRecord {
                        source: row.get(0)?,
                        target: row.get(1)?,
                    })
                })
                .map_err(db_err)?
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(db_err)?;

            Ok(Some(GraphRecord {
                id: id.to_string(),
                name,
                description,
                model_id,
                last_edited: parse_timestamp(last_edited),
                nodes,
                edges,
            }))
        })
    }

    fn read_agent(&self, id: &str) -> Result<Option<AgentRecord>> {
        self.with_conn(|conn| {
            let agent = conn
                .query_row(
                    "SELECT name, description, prompt, model_id FROM agent WHERE id = ?1",
                    params![id],
                    |row| {
                        Ok(AgentRecord {
                            id: id.to_string(),
                            name: row.get(0)?,
                            description: row.get(1)?,
                            prompt: row.get(2)?,
                            model_id: row.get(3)?,
                            tools: Vec::new(),
                        })
                    },
                )
                .optional()
                .map_err(db_err)?;
            let Some(mut agent) = agent else {
                return Ok(None);
            };

            let mut stmt = conn
                .prepare(
                    "SELECT tool_id, config_override FROM agent_tool
                     WHERE agent_id = ?1 ORDER BY seq",
                )
                .map_err(db_err)?;
            agent.tools = stmt
                .query_map(params![id], |row| {
                    Ok(AgentToolLink {
                        tool_id: row.get(0)?,
                        config_override: row.get(1)?,
                    })
                })
                .map_err(db_err)?
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(db_err)?;
            Ok(Some(agent))
        })
    }

    fn read_tool(&self, id: &str) -> Result<Option<ToolRecord>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT name, description, tool_type, config, agent_id FROM tool WHERE id = ?1",
                params![id],
                |row| {
                    let kind: String = row.get(2)?;
                    Ok(ToolRecord {
                        id: id.to_string(),
                        name: row.get(0)?,
                        description: row.get(1)?,
                        kind: ToolKind::parse(&kind),
                        config: row.get(3)?,
                        agent_id: row.get(4)?,
                    })
                },
            )
            .optional()
            .map_err(db_err)
        })
    }
}

pub(crate) fn write_tool(conn: &Connection, tool: &ToolRecord) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO tool (id, name, description, tool_type, config, agent_id)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            tool.id,
            tool.name,
            tool.description,
            tool.kind.as_str(),
            tool.config,
            tool.agent_id
        ],
    )
    .map_err(db_err)?;
    Ok(())
}

pub(crate) fn write_agent(conn: &Connection, agent: &AgentRecord) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO agent (id, name, description, prompt, model_id)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            agent.id,
            agent.name,
            agent.description,
            agent.prompt,
            agent.model_id
        ],
    )
    .map_err(db_err)?;
    conn.execute("DELETE FROM agent_tool WHERE agent_id = ?1", params![agent.id])
        .map_err(db_err)?;
    for (seq, link) in agent.tools.iter().enumerate() {
        conn.execute(
            "INSERT OR REPLACE INTO agent_tool (agent_id, tool_id, config_override, seq)
             VALUES (?1, ?2, ?3, ?4)",
            params![agent.id, link.tool_id, link.config_override, seq as i64],
        )
        .map_err(db_err)?;
    }
    Ok(())
}

pub(crate) fn write_graph(conn: &Connection, graph: &GraphRecord) -> Result<()> {
    let last_edited = graph.last_edited.unwrap_or_else(Utc::now).to_rfc3339();
    conn.execute(
        "INSERT OR REPLACE INTO workflow (id, name, description, model_id, last_edited)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            graph.id,
            graph.name,
            graph.description,
            graph.model_id,
            last_edited
        ],
    )
    .map_err(db_err)?;
    // Foreign keys may be off for databases created by other tools.
    conn.execute("DELETE FROM workflow_node WHERE workflow_id = ?1", params![graph.id])
        .map_err(db_err)?;
    conn.execute("DELETE FROM workflow_edge WHERE workflow_id = ?1", params![graph.id])
        .map_err(db_err)?;

    for (seq, node) in graph.nodes.iter().enumerate() {
        conn.execute(
            "INSERT INTO workflow_node
                (workflow_id, id, node_type, reference_id, position_x, position_y, seq)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                graph.id,
                node.id,
                node.kind.as_str(),
                node.reference_id,
                node.position.x,
                node.position.y,
                seq as i64
            ],
        )
        .map_err(db_err)?;
    }
    for edge in &graph.edges {
        conn.execute(
            "INSERT INTO workflow_edge (workflow_id, source_id, target_id) VALUES (?1, ?2, ?3)",
            params![graph.id, edge.source, edge.target],
        )
        .map_err(db_err)?;
    }
    Ok(())
}

impl GraphStore for SqliteGraphStore {
    fn get_graph(&self, id: &str) -> BoxFuture<'_, Result<Option<GraphRecord>>> {
        let id = id.to_string();
        Box::pin(async move { self.read_graph(&id) })
    }

    fn get_agent(&self, id: &str) -> BoxFuture<'_, Result<Option<AgentRecord>>> {
        let id = id.to_string();
        Box::pin(async move { self.read_agent(&id) })
    }

    fn get_tool(&self, id: &str) -> BoxFuture<'_, Result<Option<ToolRecord>>> {
        let id = id.to_string();
        Box::pin(async move { self.read_tool(&id) })
    }

    fn graph_last_edited(&self, id: &str) -> BoxFuture<'_, Result<Option<DateTime<Utc>>>> {
        let id = id.to_string();
        Box::pin(async move {
            let ts = self.with_conn(|conn| {
                conn.query_row(
                    "SELECT last_edited FROM workflow WHERE id = ?1",
                    params![id],
                    |row| row.get::<_, Option<String>>(0),
                )
                .optional()
                .map_err(db_err)
            })?;
            Ok(parse_timestamp(ts.flatten()))
        })
    }
}
