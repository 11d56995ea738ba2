//! Session workers running as child processes of the `weft` binary.
//!
//! The model endpoint points at a closed local port, so every turn fails
//! quickly with a request error; the protocol around it is what is checked.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{ChildStdin, ChildStdout, Command};

use weft_core::config::SessionConfig;
use weft_core::error::WeftError;
use weft_core::traits::GraphStore;
use weft_core::types::Role;
use weft_store::{Bundle, SqliteGraphStore};
use weft_workflow::{Frame, InputCommand, SessionManager, TurnEvent, WorkerLauncher, WorkflowTarget};

const WAIT: Duration = Duration::from_secs(20);

const BUNDLE: &str = r#"{
  "agents": [{"id": "a-echo", "name": "Echo", "prompt": "Repeat what the user says."}],
  "graphs": [{"id": "g-echo", "name": "Echo graph",
              "nodes": [{"id": "n-e", "kind": "agent", "reference_id": "a-echo"}]}]
}"#;

struct Workspace {
    _dir: tempfile::TempDir,
    config: PathBuf,
    db: PathBuf,
}

fn workspace() -> Workspace {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("weft.db");
    let config = dir.path().join("weft.toml");
    let toml = format!(
        r#"
[model]
provider = "openai"
model_id = "test-model"
base_url = "http://127.0.0.1:9/v1/chat/completions"

[store]
path = '{}'
"#,
        db.display()
    );
    std::fs::write(&config, toml).unwrap();

    let store = SqliteGraphStore::open(&db).unwrap();
    store.import(&Bundle::from_json(BUNDLE).unwrap()).unwrap();
    Workspace {
        _dir: dir,
        config,
        db,
    }
}

async fn send(stdin: &mut ChildStdin, command: InputCommand) {
    stdin
        .write_all(format!("{}\n", command.encode()).as_bytes())
        .await
        .unwrap();
    stdin.flush().await.unwrap();
}

async fn next_frame(lines: &mut Lines<BufReader<ChildStdout>>) -> Frame {
    let line = tokio::time::timeout(WAIT, lines.next_line())
        .await
        .expect("worker wrote nothing in time")
        .unwrap()
        .expect("worker closed stdout");
    Frame::decode(&line).unwrap()
}

async fn turn_end(lines: &mut Lines<BufReader<ChildStdout>>) -> Frame {
    loop {
        match next_frame(lines).await {
            Frame::Data(_) => continue,
            frame => return frame,
        }
    }
}

#[tokio::test]
async fn worker_binary_serves_frames_and_exits_on_terminate() {
    let ws = workspace();
    let mut child = Command::new(env!("CARGO_BIN_EXE_weft"))
        .arg("--config")
        .arg(&ws.config)
        .args(["worker", "--session", "s-proc", "--graph", "g-echo"])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .unwrap();
    let mut stdin = child.stdin.take().unwrap();
    let mut lines = BufReader::new(child.stdout.take().unwrap()).lines();

    assert_eq!(next_frame(&mut lines).await, Frame::Started);

    send(&mut stdin, InputCommand::Retrieve).await;
    assert_eq!(next_frame(&mut lines).await, Frame::History(vec![]));

    send(&mut stdin, InputCommand::Message("hello".into())).await;
    assert!(matches!(turn_end(&mut lines).await, Frame::AnsweredError(_)));

    send(&mut stdin, InputCommand::Retrieve).await;
    let Frame::History(entries) = next_frame(&mut lines).await else {
        panic!("expected HISTORY");
    };
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].role, Role::User);
    assert_eq!(entries[0].content, "hello");

    // Stdin stays open: the worker has to leave on TERMINATE alone.
    send(&mut stdin, InputCommand::Terminate).await;
    let status = tokio::time::timeout(WAIT, child.wait())
        .await
        .expect("worker still running after TERMINATE")
        .unwrap();
    assert!(status.success());
    drop(stdin);
}

#[tokio::test]
async fn process_mode_session_round_trip() {
    let ws = workspace();
    let store: Arc<dyn GraphStore> = Arc::new(SqliteGraphStore::open(&ws.db).unwrap());
    let launcher = WorkerLauncher::Process {
        exe: PathBuf::from(env!("CARGO_BIN_EXE_weft")),
        config_path: Some(ws.config.clone()),
    };
    let manager = SessionManager::new(launcher, store, SessionConfig::default());

    let activation = manager
        .activate(WorkflowTarget::Agent("a-echo".into()))
        .await
        .unwrap();
    assert_eq!(activation.name, "Echo");
    let session = activation.session_id;
    assert!(manager.history(&session).await.unwrap().is_empty());

    let (_, end) = manager
        .send_message(&session, "hello")
        .await
        .unwrap()
        .collect_text()
        .await;
    assert!(matches!(end, TurnEvent::Failed(_)));

    let history = manager.history(&session).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].content, "hello");

    assert!(manager.terminate(&session).await);
    assert!(!manager.terminate(&session).await);
    assert!(manager.sessions().await.is_empty());
}

#[tokio::test]
async fn process_mode_reports_worker_side_failures() {
    let ws = workspace();
    // The manager sees the graph; the worker's store (from the config) does not.
    let store = SqliteGraphStore::in_memory().unwrap();
    store
        .import(
            &Bundle::from_json(
                r#"{"graphs": [{"id": "g-elsewhere", "name": "Elsewhere", "nodes": []}]}"#,
            )
            .unwrap(),
        )
        .unwrap();
    let launcher = WorkerLauncher::Process {
        exe: PathBuf::from(env!("CARGO_BIN_EXE_weft")),
        config_path: Some(ws.config.clone()),
    };
    let manager = SessionManager::new(launcher, Arc::new(store), SessionConfig::default());

    let err = manager
        .activate(WorkflowTarget::Graph("g-elsewhere".into()))
        .await
        .err()
        .unwrap();
    assert!(matches!(err, WeftError::WorkerStartup(ref e) if e.contains("g-elsewhere")));
    assert!(manager.sessions().await.is_empty());
}
