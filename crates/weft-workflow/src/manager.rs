//! Session lifecycle: activation, message delivery, history, termination.
//!
//! All registry state lives in one actor task; the public methods talk to it
//! with request/response messages.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use weft_core::config::SessionConfig;
use weft_core::error::{Result, WeftError};
use weft_core::traits::GraphStore;
use weft_core::types::{HistoryEntry, SessionId};

use crate::dispatch::{self, DispatchRequest, TurnStream};
use crate::launcher::WorkerLauncher;
use crate::protocol::Frame;
use crate::WorkflowTarget;

/// Returned by [`SessionManager::activate`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Activation {
    pub session_id: SessionId,
    /// Display name of the graph or agent the session runs.
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionInfo {
    pub session_id: SessionId,
    pub target: WorkflowTarget,
    pub name: String,
}

#[derive(Clone)]
struct SessionEntry {
    target: WorkflowTarget,
    name: String,
    /// Graph edit stamp the session was built from.
    last_edited: Option<DateTime<Utc>>,
    dispatcher: mpsc::UnboundedSender<DispatchRequest>,
}

enum RegistryRequest {
    Register {
        session_id: SessionId,
        entry: SessionEntry,
    },
    Lookup {
        session_id: SessionId,
        reply: oneshot::Sender<Option<SessionEntry>>,
    },
    Remove {
        session_id: SessionId,
        reply: Option<oneshot::Sender<Option<SessionEntry>>>,
    },
    RemoveWorkflow {
        workflow_id: String,
        reply: oneshot::Sender<Vec<(SessionId, SessionEntry)>>,
    },
    Latest {
        workflow_id: String,
        reply: oneshot::Sender<Option<SessionId>>,
    },
    List {
        reply: oneshot::Sender<Vec<SessionInfo>>,
    },
}

#[derive(Default)]
struct Registry {
    sessions: HashMap<SessionId, SessionEntry>,
    latest: HashMap<String, SessionId>,
}

impl Registry {
    async fn run(mut self, mut requests: mpsc::UnboundedReceiver<RegistryRequest>) {
        while let Some(request) = requests.recv().await {
            match request {
                RegistryRequest::Register { session_id, entry } => {
                    self.latest
                        .insert(entry.target.id().to_string(), session_id.clone());
                    self.sessions.insert(session_id, entry);
                }
                RegistryRequest::Lookup { session_id, reply } => {
                    let _ = reply.send(self.sessions.get(&session_id).cloned());
                }
                RegistryRequest::Remove { session_id, reply } => {
                    let removed = self.remove(&session_id);
                    if let Some(reply) = reply {
                        let _ = reply.send(removed);
                    }
                }
                RegistryRequest::RemoveWorkflow { workflow_id, reply } => {
                    let ids: Vec<SessionId> = self
                        .sessions
                        .iter()
                        .filter(|(_, e)| e.target.id() == workflow_id)
                        .map(|(id, _)| id.clone())
                        .collect();
                    let removed = ids
                        .into_iter()
                        .filter_map(|id| self.remove(&id).map(|e| (id, e)))
                        .collect();
                    let _ = reply.send(removed);
                }
                RegistryRequest::Latest { workflow_id, reply } => {
                    let _ = reply.send(self.latest.get(&workflow_id).cloned());
                }
                RegistryRequest::List { reply } => {
                    let mut list: Vec<SessionInfo> = self
                        .sessions
                        .iter()
                        .map(|(id, e)| SessionInfo {
                            session_id: id.clone(),
                            target: e.target.clone(),
                            name: e.name.clone(),
                        })
                        .collect();
                    list.sort_by(|a, b| a.session_id.as_str().cmp(b.session_id.as_str()));
                    let _ = reply.send(list);
                }
            }
        }
        debug!("Session registry stopped");
    }

    fn remove(&mut self, session_id: &SessionId) -> Option<SessionEntry> {
        let entry = self.sessions.remove(session_id)?;
        let workflow_id = entry.target.id();
        if self.latest.get(workflow_id) == Some(session_id) {
            self.latest.remove(workflow_id);
        }
        Some(entry)
    }
}

/// Starts session workers and routes messages to them.
#[derive(Clone)]
pub struct SessionManager {
    registry: mpsc::UnboundedSender<RegistryRequest>,
    launcher: Arc<WorkerLauncher>,
    store: Arc<dyn GraphStore>,
    config: SessionConfig,
}

impl SessionManager {
    /// Must be called inside a tokio runtime.
    pub fn new(launcher: WorkerLauncher, store: Arc<dyn GraphStore>, config: SessionConfig) -> Self {
        let (registry, requests) = mpsc::unbounded_channel();
        tokio::spawn(Registry::default().run(requests));
        Self {
            registry,
            launcher: Arc::new(launcher),
            store,
            config,
        }
    }

    /// Start a worker for `target` and wait until it is ready.
    pub async fn activate(&self, target: WorkflowTarget) -> Result<Activation> {
        let name = self.describe(&target).await?;
        let session_id = SessionId::new();
        let mut worker = self.launcher.launch(&session_id, &target)?;

        let timeout_secs = self.config.startup_timeout_secs;
        let ready = tokio::time::timeout(Duration::from_secs(timeout_secs), worker.recv()).await;
        match ready {
            Ok(Some(Frame::Started)) => {}
            Ok(Some(Frame::Failed(error))) => {
                worker.kill();
                return Err(WeftError::WorkerStartup(error));
            }
            Ok(Some(other)) => {
                worker.kill();
                return Err(WeftError::WorkerStartup(format!(
                    "unexpected frame before STARTED: {}",
                    other.encode()
                )));
            }
            Ok(None) => {
                return Err(WeftError::WorkerStartup(
                    "worker exited before reporting readiness".into(),
                ));
            }
            Err(_) => {
                worker.kill();
                return Err(WeftError::WorkerStartupTimeout(timeout_secs));
            }
        }

        // The worker has loaded its graph by now; stamp the session with what it saw.
        let last_edited = match self.edit_stamp(&target).await {
            Ok(stamp) => stamp,
            Err(e) => {
                worker.kill();
                return Err(e);
            }
        };

        let registry = self.registry.clone();
        let dispatcher = dispatch::spawn(worker, move |session_id| {
            let _ = registry.send(RegistryRequest::Remove {
                session_id,
                reply: None,
            });
        });
        let entry = SessionEntry {
            target: target.clone(),
            name: name.clone(),
            last_edited,
            dispatcher,
        };
        self.send_registry(RegistryRequest::Register {
            session_id: session_id.clone(),
            entry,
        })?;
        info!(session = %session_id, %target, name = %name, "Session activated");

        Ok(Activation { session_id, name })
    }

    /// Deliver a user message. The returned stream carries the turn's
    /// fragments and ends with exactly one terminal event.
    pub async fn send_message(&self, session_id: &SessionId, text: &str) -> Result<TurnStream> {
        if text.trim().is_empty() {
            return Err(WeftError::EmptyMessage);
        }
        let entry = self.entry(session_id).await?;
        self.ensure_fresh(&entry).await?;

        let (events, rx) = mpsc::unbounded_channel();
        let request = DispatchRequest::Turn {
            message: text.to_string(),
            events,
        };
        if entry.dispatcher.send(request).is_err() {
            warn!(session = %session_id, "Dispatcher gone; dropping session");
            self.forget(session_id);
            return Ok(TurnStream::lost());
        }
        debug!(session = %session_id, chars = text.len(), "Message queued");
        Ok(TurnStream::new(rx))
    }

    /// The session's history, oldest first.
    pub async fn history(&self, session_id: &SessionId) -> Result<Vec<HistoryEntry>> {
        let entry = self.entry(session_id).await?;
        let (reply, rx) = oneshot::channel();
        entry
            .dispatcher
            .send(DispatchRequest::History { reply })
            .map_err(|_| WeftError::WorkerGone(session_id.to_string()))?;

        let timeout_secs = self.config.history_timeout_secs;
        match tokio::time::timeout(Duration::from_secs(timeout_secs), rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(WeftError::WorkerGone(session_id.to_string())),
            Err(_) => Err(WeftError::HistoryTimeout(timeout_secs)),
        }
    }

    /// Stop a session. Unknown or already-terminated ids are ignored.
    pub async fn terminate(&self, session_id: &SessionId) -> bool {
        let removed = self
            .call(|reply| RegistryRequest::Remove {
                session_id: session_id.clone(),
                reply: Some(reply),
            })
            .await
            .flatten();
        match removed {
            Some(entry) => {
                let _ = entry.dispatcher.send(DispatchRequest::Terminate);
                info!(session = %session_id, "Session terminated");
                true
            }
            None => {
                debug!(session = %session_id, "Terminate for unknown session ignored");
                false
            }
        }
    }

    /// Stop every session running `workflow_id`. Returns how many were stopped.
    pub async fn terminate_workflow(&self, workflow_id: &str) -> usize {
        let removed = self
            .call(|reply| RegistryRequest::RemoveWorkflow {
                workflow_id: workflow_id.to_string(),
                reply,
            })
            .await
            .unwrap_or_default();
        for (session_id, entry) in &removed {
            let _ = entry.dispatcher.send(DispatchRequest::Terminate);
            info!(session = %session_id, workflow = %workflow_id, "Session terminated");
        }
        removed.len()
    }

    /// Most recently activated live session for a graph or agent id.
    pub async fn latest_session(&self, workflow_id: &str) -> Option<SessionId> {
        self.call(|reply| RegistryRequest::Latest {
            workflow_id: workflow_id.to_string(),
            reply,
        })
        .await
        .flatten()
    }

    pub async fn sessions(&self) -> Vec<SessionInfo> {
        self.call(|reply| RegistryRequest::List { reply })
            .await
            .unwrap_or_default()
    }

    async fn describe(&self, target: &WorkflowTarget) -> Result<String> {
        match target {
            WorkflowTarget::Graph(id) => {
                let graph = self
                    .store
                    .get_graph(id)
                    .await?
                    .ok_or_else(|| WeftError::not_found("Workflow", id.as_str()))?;
                Ok(graph.name)
            }
            WorkflowTarget::Agent(id) => {
                let agent = self
                    .store
                    .get_agent(id)
                    .await?
                    .ok_or_else(|| WeftError::not_found("Agent", id.as_str()))?;
                Ok(agent.name)
            }
        }
    }

    async fn edit_stamp(&self, target: &WorkflowTarget) -> Result<Option<DateTime<Utc>>> {
        if !target.tracks_edits() {
            return Ok(None);
        }
        self.store.graph_last_edited(target.id()).await
    }

    async fn ensure_fresh(&self, entry: &SessionEntry) -> Result<()> {
        if !entry.target.tracks_edits() {
            return Ok(());
        }
        let id = entry.target.id();
        let current = self.store.graph_last_edited(id).await?;
        if is_stale(entry.last_edited, current) {
            warn!(workflow = %id, "Workflow edited since activation");
            return Err(WeftError::GraphEdited(id.to_string()));
        }
        Ok(())
    }

    async fn entry(&self, session_id: &SessionId) -> Result<SessionEntry> {
        self.call(|reply| RegistryRequest::Lookup {
            session_id: session_id.clone(),
            reply,
        })
        .await
        .flatten()
        .ok_or_else(|| WeftError::SessionNotFound(session_id.to_string()))
    }

    fn forget(&self, session_id: &SessionId) {
        let _ = self.registry.send(RegistryRequest::Remove {
            session_id: session_id.clone(),
            reply: None,
        });
    }

    fn send_registry(&self, request: RegistryRequest) -> Result<()> {
        self.registry
            .send(request)
            .map_err(|_| WeftError::WorkerStartup("session registry is not running".into()))
    }

    async fn call<T>(
        &self,
        request: impl FnOnce(oneshot::Sender<T>) -> RegistryRequest,
    ) -> Option<T> {
        let (reply, rx) = oneshot::channel();
        self.registry.send(request(reply)).ok()?;
        rx.await.ok()
    }
}

/// A session is stale once the stored graph carries a newer edit stamp than
/// the one it was built from.
fn is_stale(captured: Option<DateTime<Utc>>, current: Option<DateTime<Utc>>) -> bool {
    match (captured, current) {
        (Some(captured), Some(current)) => current > captured,
        (None, Some(_)) => true,
        (_, None) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn staleness() {
        let t0 = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let t1 = Utc.with_ymd_and_hms(2024, 5, 1, 12, 5, 0).unwrap();
        assert!(!is_stale(Some(t0), Some(t0)));
        assert!(is_stale(Some(t0), Some(t1)));
        assert!(!is_stale(Some(t1), Some(t0)));
        assert!(is_stale(None, Some(t0)));
        assert!(!is_stale(Some(t0), None));
    }
}
