//! Routes a session worker's frames to whoever is waiting for them.
//!
//! Each session has exactly one dispatcher task. It owns the worker handle,
//! forwards turn and history requests to the worker in arrival order, and
//! hands every incoming frame to the oldest waiter of the matching kind.
//! Turns and history requests are answered in FIFO order, so a history dump
//! can never be mistaken for turn output.

use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use weft_core::error::{Result, WeftError};
use weft_core::fragment::Fragment;
use weft_core::types::{HistoryEntry, SessionId};

use crate::launcher::WorkerHandle;
use crate::protocol::{Frame, InputCommand};

/// One event of a running turn.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnEvent {
    Delta(Fragment),
    /// The turn finished normally.
    Complete,
    /// The turn failed; the session can take another message.
    Failed(String),
    /// The worker is gone; the session must be re-activated.
    SessionLost,
}

impl TurnEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Delta(_))
    }
}

/// Events of a single turn. Ends after its one terminal event.
pub struct TurnStream {
    events: mpsc::UnboundedReceiver<TurnEvent>,
    done: bool,
}

impl TurnStream {
    pub(crate) fn new(events: mpsc::UnboundedReceiver<TurnEvent>) -> Self {
        Self {
            events,
            done: false,
        }
    }

    /// A stream that reports the session as lost and ends.
    pub(crate) fn lost() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(TurnEvent::SessionLost);
        Self::new(rx)
    }

    /// Drain the turn, concatenating text and nested tool-use output.
    /// Returns the text together with the terminal event.
    pub async fn collect_text(mut self) -> (String, TurnEvent) {
        use futures::StreamExt;

        let mut text = String::new();
        while let Some(event) = self.next().await {
            match event {
                TurnEvent::Delta(fragment) => text.push_str(fragment.content()),
                terminal => return (text, terminal),
            }
        }
        (text, TurnEvent::SessionLost)
    }
}

impl Stream for TurnStream {
    type Item = TurnEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<TurnEvent>> {
        if self.done {
            return Poll::Ready(None);
        }
        match self.events.poll_recv(cx) {
            Poll::Ready(Some(event)) => {
                self.done = event.is_terminal();
                Poll::Ready(Some(event))
            }
            // The dispatcher dropped the turn without finishing it.
            Poll::Ready(None) => {
                self.done = true;
                Poll::Ready(Some(TurnEvent::SessionLost))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

pub(crate) enum DispatchRequest {
    Turn {
        message: String,
        events: mpsc::UnboundedSender<TurnEvent>,
    },
    History {
        reply: oneshot::Sender<Result<Vec<HistoryEntry>>>,
    },
    Terminate,
}

/// Spawn the dispatcher for an already-started worker. `on_lost` runs once if
/// the worker goes away on its own.
pub(crate) fn spawn(
    worker: WorkerHandle,
    on_lost: impl FnOnce(SessionId) + Send + 'static,
) -> mpsc::UnboundedSender<DispatchRequest> {
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(Dispatcher::new(worker).run(rx, on_lost));
    tx
}

struct Dispatcher {
    worker: WorkerHandle,
    turns: VecDeque<mpsc::UnboundedSender<TurnEvent>>,
    history: VecDeque<oneshot::Sender<Result<Vec<HistoryEntry>>>>,
}

impl Dispatcher {
    fn new(worker: WorkerHandle) -> Self {
        Self {
            worker,
            turns: VecDeque::new(),
            history: VecDeque::new(),
        }
    }

    async fn run(
        mut self,
        mut requests: mpsc::UnboundedReceiver<DispatchRequest>,
        on_lost: impl FnOnce(SessionId),
    ) {
        let session = self.worker.session_id().clone();
        loop {
            tokio::select! {
                request = requests.recv() => match request {
                    Some(DispatchRequest::Terminate) | None => {
                        debug!(session = %session, "Dispatcher shutting down worker");
                        self.fail_pending();
                        self.worker.shutdown();
                        return;
                    }
                    Some(request) => self.forward(request),
                },
                frame = self.worker.recv() => match frame {
                    Some(frame) => self.route(frame),
                    None => {
                        warn!(session = %session, "Worker exited unexpectedly");
                        self.fail_pending();
                        on_lost(session);
                        return;
                    }
                },
            }
        }
    }

    fn forward(&mut self, request: DispatchRequest) {
        match request {
            DispatchRequest::Turn { message, events } => {
                if self.worker.send(InputCommand::Message(message)).is_ok() {
                    self.turns.push_back(events);
                } else {
                    let _ = events.send(TurnEvent::SessionLost);
                }
            }
            DispatchRequest::History { reply } => match self.worker.send(InputCommand::Retrieve) {
                Ok(()) => self.history.push_back(reply),
                Err(e) => {
                    let _ = reply.send(Err(e));
                }
            },
            DispatchRequest::Terminate => {}
        }
    }

    fn route(&mut self, frame: Frame) {
        let session = self.worker.session_id().clone();
        match frame {
            Frame::Data(fragment) => match self.turns.front() {
                // A caller that stopped listening still gets its turn finished.
                Some(events) => {
                    let _ = events.send(TurnEvent::Delta(fragment));
                }
                None => warn!(session = %session, "Fragment with no turn in flight"),
            },
            Frame::Answered => self.finish_turn(TurnEvent::Complete),
            Frame::AnsweredError(error) => self.finish_turn(TurnEvent::Failed(error)),
            Frame::History(entries) => match self.history.pop_front() {
                Some(reply) => {
                    let _ = reply.send(Ok(entries));
                }
                None => warn!(session = %session, "History with no request waiting"),
            },
            Frame::Started | Frame::Failed(_) => {
                warn!(session = %session, frame = %frame.encode(), "Unexpected frame after startup")
            }
        }
    }

    fn finish_turn(&mut self, event: TurnEvent) {
        match self.turns.pop_front() {
            Some(events) => {
                let _ = events.send(event);
            }
            None => warn!(session = %self.worker.session_id(), "Turn end with no turn in flight"),
        }
    }

    fn fail_pending(&mut self) {
        for events in self.turns.drain(..) {
            let _ = events.send(TurnEvent::SessionLost);
        }
        let session = self.worker.session_id().to_string();
        for reply in self.history.drain(..) {
            let _ = reply.send(Err(WeftError::WorkerGone(session.clone())));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn turn_stream_ends_after_terminal_event() {
        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(TurnEvent::Delta(Fragment::text("hi"))).unwrap();
        tx.send(TurnEvent::Complete).unwrap();
        tx.send(TurnEvent::Delta(Fragment::text("late"))).unwrap();

        let events: Vec<TurnEvent> = TurnStream::new(rx).collect().await;
        assert_eq!(
            events,
            vec![TurnEvent::Delta(Fragment::text("hi")), TurnEvent::Complete]
        );
    }

    #[tokio::test]
    async fn dropped_turn_reports_session_lost() {
        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(TurnEvent::Delta(Fragment::text("partial"))).unwrap();
        drop(tx);

        let (text, end) = TurnStream::new(rx).collect_text().await;
        assert_eq!(text, "partial");
        assert_eq!(end, TurnEvent::SessionLost);
    }

    #[tokio::test]
    async fn lost_stream_yields_one_event() {
        let events: Vec<TurnEvent> = TurnStream::lost().collect().await;
        assert_eq!(events, vec![TurnEvent::SessionLost]);
    }
}
