//! Starting session workers, in-process or as child processes.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec};
use tracing::{debug, info, warn};

use weft_core::error::{Result, WeftError};
use weft_core::types::SessionId;

use crate::protocol::{Frame, InputCommand};
use crate::worker::{run_worker, WorkerContext};
use crate::WorkflowTarget;

/// How long a child gets to exit after `TERMINATE` before it is killed.
const EXIT_GRACE: Duration = Duration::from_secs(5);

/// Where session workers run.
#[derive(Clone)]
pub enum WorkerLauncher {
    /// A tokio task in this process.
    Task(WorkerContext),
    /// A child process running `<exe> worker ...`, talking over stdin/stdout.
    Process {
        exe: PathBuf,
        config_path: Option<PathBuf>,
    },
}

impl WorkerLauncher {
    /// Re-execute the running binary for every worker.
    pub fn current_exe(config_path: Option<PathBuf>) -> Result<Self> {
        Ok(Self::Process {
            exe: std::env::current_exe()?,
            config_path,
        })
    }

    pub fn launch(&self, session_id: &SessionId, target: &WorkflowTarget) -> Result<WorkerHandle> {
        let (input_tx, input_rx) = mpsc::unbounded_channel::<InputCommand>();
        let (output_tx, output_rx) = mpsc::unbounded_channel::<Frame>();

        let process = match self {
            Self::Task(ctx) => {
                let task = tokio::spawn(run_worker(
                    session_id.clone(),
                    target.clone(),
                    ctx.clone(),
                    input_rx,
                    output_tx,
                ));
                debug!(session = %session_id, %target, "Worker task spawned");
                WorkerProcess::Task(task)
            }
            Self::Process { exe, config_path } => {
                let child = spawn_child(exe, config_path.as_ref(), session_id, target, input_rx, output_tx)?;
                WorkerProcess::Child(child)
            }
        };

        Ok(WorkerHandle {
            session_id: session_id.clone(),
            input: input_tx,
            output: output_rx,
            process,
        })
    }
}

fn spawn_child(
    exe: &PathBuf,
    config_path: Option<&PathBuf>,
    session_id: &SessionId,
    target: &WorkflowTarget,
    mut input_rx: mpsc::UnboundedReceiver<InputCommand>,
    output_tx: mpsc::UnboundedSender<Frame>,
) -> Result<Child> {
    let mut cmd = Command::new(exe);
    if let Some(path) = config_path {
        cmd.arg("--config").arg(path);
    }
    cmd.arg("worker").arg("--session").arg(session_id.as_str());
    match target {
        WorkflowTarget::Graph(id) => cmd.arg("--graph").arg(id),
        WorkflowTarget::Agent(id) => cmd.arg("--agent").arg(id),
    };
    cmd.stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .kill_on_drop(true);

    let mut child = cmd
        .spawn()
        .map_err(|e| WeftError::WorkerStartup(format!("failed to spawn {}: {}", exe.display(), e)))?;
    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| WeftError::WorkerStartup("worker stdin unavailable".into()))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| WeftError::WorkerStartup("worker stdout unavailable".into()))?;
    info!(session = %session_id, %target, pid = ?child.id(), "Worker process spawned");

    tokio::spawn(async move {
        let mut lines = FramedWrite::new(stdin, LinesCodec::new());
        while let Some(command) = input_rx.recv().await {
            if let Err(e) = lines.send(command.encode()).await {
                debug!(error = %e, "Worker stdin closed");
                break;
            }
        }
    });

    let session = session_id.clone();
    tokio::spawn(async move {
        let mut lines = FramedRead::new(stdout, LinesCodec::new());
        while let Some(line) = lines.next().await {
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    warn!(session = %session, error = %e, "Unreadable worker output");
                    break;
                }
            };
            match Frame::decode(&line) {
                Ok(frame) => {
                    if output_tx.send(frame).is_err() {
                        break;
                    }
                }
                Err(e) => warn!(session = %session, error = %e, "Ignoring worker output line"),
            }
        }
        debug!(session = %session, "Worker output ended");
    });

    Ok(child)
}

enum WorkerProcess {
    Task(JoinHandle<()>),
    Child(Child),
}

/// A running worker: its command channel, its frame channel, and whatever
/// keeps it alive.
pub struct WorkerHandle {
    session_id: SessionId,
    input: mpsc::UnboundedSender<InputCommand>,
    output: mpsc::UnboundedReceiver<Frame>,
    process: WorkerProcess,
}

impl WorkerHandle {
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// Queue a command. Fails once the worker has stopped reading.
    pub fn send(&self, command: InputCommand) -> Result<()> {
        self.input
            .send(command)
            .map_err(|_| WeftError::WorkerGone(self.session_id.to_string()))
    }

    /// Next frame, or `None` once the worker is gone.
    pub async fn recv(&mut self) -> Option<Frame> {
        self.output.recv().await
    }

    /// Stop the worker immediately.
    pub fn kill(&mut self) {
        match &mut self.process {
            WorkerProcess::Task(task) => task.abort(),
            WorkerProcess::Child(child) => {
                if let Err(e) = child.start_kill() {
                    debug!(session = %self.session_id, error = %e, "Worker process already gone");
                }
            }
        }
    }

    /// Ask the worker to stop, killing it if it has not exited after a grace
    /// period.
    pub fn shutdown(self) {
        let WorkerHandle {
            session_id,
            input,
            process,
            ..
        } = self;
        let _ = input.send(InputCommand::Terminate);
        drop(input);

        match process {
            WorkerProcess::Task(_) => {}
            WorkerProcess::Child(mut child) => {
                tokio::spawn(async move {
                    match tokio::time::timeout(EXIT_GRACE, child.wait()).await {
                        Ok(Ok(status)) => debug!(session = %session_id, %status, "Worker process exited"),
                        Ok(Err(e)) => warn!(session = %session_id, error = %e, "Failed waiting for worker"),
                        Err(_) => {
                            warn!(session = %session_id, "Worker ignored TERMINATE; killing it");
                            let _ = child.kill().await;
                        }
                    }
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;
    use weft_core::config::AppConfig;
    use weft_core::traits::StaticCatalog;
    use weft_test_utils::fixtures::{self, SUMMARIZER_GRAPH};
    use weft_test_utils::MockLlmClient;

    fn task_launcher() -> WorkerLauncher {
        WorkerLauncher::Task(WorkerContext {
            store: Arc::new(fixtures::summarizer_store()),
            llm: Arc::new(MockLlmClient::new()),
            catalog: Arc::new(StaticCatalog::new(HashMap::new())),
            config: AppConfig::default(),
        })
    }

    #[tokio::test]
    async fn task_worker_starts_and_shuts_down() {
        let mut handle = task_launcher()
            .launch(&SessionId::from("s1"), &WorkflowTarget::Graph(SUMMARIZER_GRAPH.into()))
            .unwrap();
        assert_eq!(handle.recv().await, Some(Frame::Started));
        handle.send(InputCommand::Terminate).unwrap();
        assert_eq!(handle.recv().await, None);
        assert!(handle.send(InputCommand::Retrieve).is_err());
    }

    #[tokio::test]
    async fn missing_executable_is_a_startup_error() {
        let launcher = WorkerLauncher::Process {
            exe: PathBuf::from("/nonexistent/weft-worker-binary"),
            config_path: None,
        };
        let err = launcher
            .launch(&SessionId::from("s2"), &WorkflowTarget::Agent("a".into()))
            .err()
            .unwrap();
        assert!(matches!(err, WeftError::WorkerStartup(_)));
    }
}
