//! The per-session worker loop.
//!
//! A worker builds its orchestrator once, reports `STARTED`, then serves
//! commands in arrival order until `TERMINATE` or until its input closes.

use std::any::Any;
use std::io::BufRead;
use std::panic::AssertUnwindSafe;
use std::pin::pin;
use std::sync::Arc;

use futures::{FutureExt, SinkExt};
use tokio::sync::mpsc;
use tokio_util::codec::{FramedWrite, LinesCodec};
use tracing::{debug, error, info, warn};

use weft_core::config::AppConfig;
use weft_core::error::Result;
use weft_core::fragment::{Fragment, FragmentSink};
use weft_core::traits::{GraphStore, LlmClient, ModelCatalog};
use weft_core::types::{HistoryEntry, Role, SessionId};

use crate::factory::{AgentBuilder, CapabilityFactory};
use crate::protocol::{Frame, InputCommand};
use crate::synthesizer::{synthesize, Orchestrator};
use crate::{loader, WorkflowTarget};

/// Everything a worker needs to build its orchestrator.
#[derive(Clone)]
pub struct WorkerContext {
    pub store: Arc<dyn GraphStore>,
    pub llm: Arc<dyn LlmClient>,
    pub catalog: Arc<dyn ModelCatalog>,
    pub config: AppConfig,
}

impl WorkerContext {
    async fn initialize(&self, target: &WorkflowTarget) -> Result<Orchestrator> {
        let graph = loader::load(self.store.as_ref(), target).await?;
        let factory =
            CapabilityFactory::new(self.llm.clone(), self.catalog.clone(), self.config.clone());
        synthesize(&graph, &AgentBuilder::new(factory)).await
    }
}

/// Run one session worker to completion.
///
/// Frames go to `output`; the worker stops when `input` yields `TERMINATE`,
/// when `input` closes, or when nobody reads `output` any more.
pub async fn run_worker(
    session_id: SessionId,
    target: WorkflowTarget,
    ctx: WorkerContext,
    mut input: mpsc::UnboundedReceiver<InputCommand>,
    output: mpsc::UnboundedSender<Frame>,
) {
    let init = AssertUnwindSafe(ctx.initialize(&target)).catch_unwind().await;
    let orchestrator = match init {
        Ok(Ok(orchestrator)) => orchestrator,
        Ok(Err(e)) => {
            error!(session = %session_id, %target, error = %e, "Worker initialization failed");
            let _ = output.send(Frame::Failed(e.to_string()));
            return;
        }
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            error!(session = %session_id, %target, error = %message, "Worker initialization panicked");
            let _ = output.send(Frame::Failed(message));
            return;
        }
    };

    if output.send(Frame::Started).is_err() {
        return;
    }
    info!(session = %session_id, %target, direct = orchestrator.is_direct(), "Worker ready");

    let mut history: Vec<HistoryEntry> = Vec::new();
    while let Some(command) = input.recv().await {
        let delivered = match command {
            InputCommand::Terminate => break,
            InputCommand::Retrieve => output.send(Frame::History(history.clone())).is_ok(),
            InputCommand::Message(text) => {
                run_turn(&session_id, &orchestrator, &mut history, text, &output).await
            }
        };
        if !delivered {
            debug!(session = %session_id, "Output closed; stopping worker");
            break;
        }
    }
    info!(session = %session_id, "Worker stopped");
}

/// Serve one message. Returns false once `output` is closed.
async fn run_turn(
    session_id: &SessionId,
    orchestrator: &Orchestrator,
    history: &mut Vec<HistoryEntry>,
    text: String,
    output: &mpsc::UnboundedSender<Frame>,
) -> bool {
    history.push(HistoryEntry::now(Role::User, text.as_str()));

    let (fragment_tx, mut fragments) = mpsc::unbounded_channel::<Fragment>();
    let sink = FragmentSink::new(fragment_tx);
    let mut turn = pin!(AssertUnwindSafe(orchestrator.run(session_id, &text, &sink)).catch_unwind());

    let outcome = loop {
        tokio::select! {
            biased;
            Some(fragment) = fragments.recv() => {
                if output.send(Frame::Data(fragment)).is_err() {
                    return false;
                }
            }
            outcome = &mut turn => break outcome,
        }
    };
    while let Ok(fragment) = fragments.try_recv() {
        if output.send(Frame::Data(fragment)).is_err() {
            return false;
        }
    }

    let frame = match outcome {
        Ok(Ok(answer)) => {
            history.push(HistoryEntry::now(Role::Assistant, answer));
            Frame::Answered
        }
        Ok(Err(e)) => {
            warn!(session = %session_id, error = %e, "Turn failed");
            Frame::AnsweredError(e.to_string())
        }
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            error!(session = %session_id, error = %message, "Turn panicked");
            Frame::AnsweredError(message)
        }
    };
    output.send(frame).is_ok()
}

/// Run a worker over this process's stdin and stdout.
///
/// Each stdin line is one [`InputCommand`]; each stdout line is one
/// [`Frame`]. Logs must go to stderr. Returns as soon as the worker stops,
/// even if stdin is still open.
pub async fn serve_stdio(session_id: SessionId, target: WorkflowTarget, ctx: WorkerContext) {
    let (input_tx, input_rx) = mpsc::unbounded_channel();
    let (output_tx, mut output_rx) = mpsc::unbounded_channel::<Frame>();

    // A blocking stdin read cannot be cancelled, so it gets a detached thread
    // that dies with the process.
    let reader = std::thread::Builder::new()
        .name("weft-stdin".into())
        .spawn(move || read_commands(std::io::stdin().lock(), &input_tx));
    if let Err(e) = reader {
        error!(session = %session_id, error = %e, "Failed to start stdin reader");
    }

    let writer = tokio::spawn(async move {
        let mut lines = FramedWrite::new(tokio::io::stdout(), LinesCodec::new());
        while let Some(frame) = output_rx.recv().await {
            if let Err(e) = lines.send(frame.encode()).await {
                warn!(error = %e, "Failed to write frame");
                break;
            }
        }
    });

    run_worker(session_id, target, ctx, input_rx, output_tx).await;
    let _ = writer.await;
}

/// Decode command lines from `reader` until it ends or nobody is listening.
fn read_commands(reader: impl BufRead, commands: &mpsc::UnboundedSender<InputCommand>) {
    for line in reader.lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                warn!(error = %e, "Stdin read failed");
                break;
            }
        };
        match InputCommand::decode(&line) {
            Ok(command) => {
                if commands.send(command).is_err() {
                    break;
                }
            }
            Err(e) => warn!(error = %e, "Ignoring unreadable input line"),
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("panic: {}", s)
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("panic: {}", s)
    } else {
        "panic: unknown cause".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use weft_core::fragment::FragmentDelta;
    use weft_core::traits::StaticCatalog;
    use weft_test_utils::fixtures::{self, SUMMARIZER_GRAPH};
    use weft_test_utils::{MockLlmClient, MockReply};

    fn context(llm: MockLlmClient) -> WorkerContext {
        WorkerContext {
            store: Arc::new(fixtures::summarizer_store()),
            llm: Arc::new(llm),
            catalog: Arc::new(StaticCatalog::new(HashMap::new())),
            config: AppConfig::default(),
        }
    }

    struct Running {
        input: mpsc::UnboundedSender<InputCommand>,
        output: mpsc::UnboundedReceiver<Frame>,
    }

    fn start(target: WorkflowTarget, llm: MockLlmClient) -> Running {
        let (input, input_rx) = mpsc::unbounded_channel();
        let (output_tx, output) = mpsc::unbounded_channel();
        tokio::spawn(run_worker(
            SessionId::from("s-test"),
            target,
            context(llm),
            input_rx,
            output_tx,
        ));
        Running { input, output }
    }

    async fn until_turn_end(output: &mut mpsc::UnboundedReceiver<Frame>) -> Vec<Frame> {
        let mut frames = Vec::new();
        while let Some(frame) = output.recv().await {
            let done = matches!(frame, Frame::Answered | Frame::AnsweredError(_));
            frames.push(frame);
            if done {
                break;
            }
        }
        frames
    }

    #[tokio::test]
    async fn turn_streams_fragments_then_answers() {
        let mut w = start(
            WorkflowTarget::Graph(SUMMARIZER_GRAPH.into()),
            MockLlmClient::new().with_chunks(&["Short ", "summary."]),
        );
        assert_eq!(w.output.recv().await, Some(Frame::Started));

        w.input.send(InputCommand::Message("Summarize this".into())).unwrap();
        let frames = until_turn_end(&mut w.output).await;
        assert_eq!(
            &frames[..2],
            &[
                Frame::Data(Fragment::text("Short ")),
                Frame::Data(Fragment::text("summary."))
            ]
        );
        assert_eq!(frames.last(), Some(&Frame::Answered));
        assert_eq!(frames.iter().filter(|f| **f == Frame::Answered).count(), 1);

        w.input.send(InputCommand::Retrieve).unwrap();
        let Some(Frame::History(entries)) = w.output.recv().await else {
            panic!("expected history");
        };
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].role, Role::User);
        assert_eq!(entries[1].content, "Short summary.");
    }

    #[tokio::test]
    async fn retrieve_before_any_message_is_empty() {
        let mut w = start(
            WorkflowTarget::Graph(SUMMARIZER_GRAPH.into()),
            MockLlmClient::new(),
        );
        assert_eq!(w.output.recv().await, Some(Frame::Started));
        w.input.send(InputCommand::Retrieve).unwrap();
        assert_eq!(w.output.recv().await, Some(Frame::History(vec![])));
    }

    #[tokio::test]
    async fn failed_and_panicking_turns_keep_worker_alive() {
        let mut w = start(
            WorkflowTarget::Graph(SUMMARIZER_GRAPH.into()),
            MockLlmClient::new()
                .with_error("upstream unavailable")
                .with_panic("boom")
                .with_text("recovered"),
        );
        assert_eq!(w.output.recv().await, Some(Frame::Started));

        w.input.send(InputCommand::Message("one".into())).unwrap();
        let frames = until_turn_end(&mut w.output).await;
        assert!(matches!(frames.last(), Some(Frame::AnsweredError(e)) if e.contains("upstream unavailable")));

        w.input.send(InputCommand::Message("two".into())).unwrap();
        let frames = until_turn_end(&mut w.output).await;
        assert!(matches!(frames.last(), Some(Frame::AnsweredError(e)) if e.contains("boom")));

        w.input.send(InputCommand::Message("three".into())).unwrap();
        let frames = until_turn_end(&mut w.output).await;
        assert_eq!(frames.last(), Some(&Frame::Answered));

        w.input.send(InputCommand::Retrieve).unwrap();
        let Some(Frame::History(entries)) = w.output.recv().await else {
            panic!("expected history");
        };
        let roles: Vec<Role> = entries.iter().map(|e| e.role).collect();
        assert_eq!(roles, vec![Role::User, Role::User, Role::User, Role::Assistant]);
    }

    #[tokio::test]
    async fn unknown_graph_reports_failed() {
        let mut w = start(WorkflowTarget::Graph("missing".into()), MockLlmClient::new());
        let Some(Frame::Failed(error)) = w.output.recv().await else {
            panic!("expected FAILED");
        };
        assert!(error.contains("missing"));
        assert_eq!(w.output.recv().await, None);
    }

    #[test]
    fn command_lines_are_decoded_in_order() {
        let input = "RETRIEVE\nnot json\n\"hello\"\nTERMINATE\n";
        let (tx, mut rx) = mpsc::unbounded_channel();
        read_commands(std::io::Cursor::new(input), &tx);
        assert_eq!(rx.try_recv().unwrap(), InputCommand::Retrieve);
        assert_eq!(rx.try_recv().unwrap(), InputCommand::Message("hello".into()));
        assert_eq!(rx.try_recv().unwrap(), InputCommand::Terminate);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn terminate_stops_worker() {
        let mut w = start(
            WorkflowTarget::Agent(fixtures::SUMMARIZER_AGENT.into()),
            MockLlmClient::new(),
        );
        assert_eq!(w.output.recv().await, Some(Frame::Started));
        w.input.send(InputCommand::Terminate).unwrap();
        assert_eq!(w.output.recv().await, None);
    }

    #[tokio::test]
    async fn nested_agent_text_is_relabelled() {
        let llm = MockLlmClient::new()
            .with_reply(MockReply::tool_call(
                "Summarizer",
                serde_json::json!({"input": "long text"}),
            ))
            .with_text("inner summary")
            .with_text("done");
        let mut w = start(WorkflowTarget::Graph(SUMMARIZER_GRAPH.into()), llm);
        assert_eq!(w.output.recv().await, Some(Frame::Started));

        w.input.send(InputCommand::Message("go".into())).unwrap();
        let frames = until_turn_end(&mut w.output).await;
        let nested = frames.iter().find_map(|f| match f {
            Frame::Data(Fragment {
                delta: FragmentDelta::ToolUse { input },
                current_tool_use: Some(tool),
            }) if tool.tool_use_id == "agent" => Some((tool.name.clone(), input.clone())),
            _ => None,
        });
        assert_eq!(nested, Some(("Summarizer".to_string(), "inner summary".to_string())));
        assert_eq!(frames.last(), Some(&Frame::Answered));
    }
}
