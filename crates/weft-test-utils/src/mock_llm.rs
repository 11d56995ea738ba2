use std::collections::VecDeque;
use std::sync::Mutex;

use futures::future::BoxFuture;
use futures::stream::{self, BoxStream};

use weft_core::config::ModelConfig;
use weft_core::error::{Result, WeftError};
use weft_core::traits::LlmClient;
use weft_core::types::*;

/// One scripted model response.
#[derive(Debug, Clone)]
pub enum MockReply {
    /// Stream the chunks as text deltas, then end the turn.
    Text(Vec<String>),
    /// Optionally stream some text, then request one tool call.
    ToolCall {
        text: Option<String>,
        id: String,
        name: String,
        input: serde_json::Value,
    },
    /// Stream exactly these deltas.
    Deltas(Vec<StreamDelta>),
    /// Fail the request.
    Error(String),
    /// Panic while the request is being made.
    Panic(String),
}

impl MockReply {
    pub fn text(text: &str) -> Self {
        Self::Text(vec![text.to_string()])
    }

    pub fn chunks(chunks: &[&str]) -> Self {
        Self::Text(chunks.iter().map(|c| c.to_string()).collect())
    }

    pub fn tool_call(name: &str, input: serde_json::Value) -> Self {
        Self::ToolCall {
            text: None,
            id: format!("call-{}", name),
            name: name.to_string(),
            input,
        }
    }

    fn into_deltas(self) -> Vec<Result<StreamDelta>> {
        match self {
            Self::Text(chunks) => {
                let mut deltas: Vec<Result<StreamDelta>> = chunks
                    .into_iter()
                    .map(|c| Ok(StreamDelta::TextDelta(c)))
                    .collect();
                deltas.push(Ok(StreamDelta::Stop(StopReason::EndTurn)));
                deltas
            }
            Self::ToolCall {
                text,
                id,
                name,
                input,
            } => {
                let mut deltas = Vec::new();
                if let Some(text) = text {
                    deltas.push(Ok(StreamDelta::TextDelta(text)));
                }
                deltas.push(Ok(StreamDelta::ToolUseStart { index: 0, id, name }));
                deltas.push(Ok(StreamDelta::ToolInputDelta {
                    index: 0,
                    delta: input.to_string(),
                }));
                deltas.push(Ok(StreamDelta::Stop(StopReason::ToolUse)));
                deltas
            }
            Self::Deltas(deltas) => deltas.into_iter().map(Ok).collect(),
            Self::Error(_) | Self::Panic(_) => Vec::new(),
        }
    }
}

/// What the client was asked, captured for assertions.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub model_id: String,
    pub system: String,
    pub messages: Vec<ChatMessage>,
    pub tools: Vec<String>,
}

/// Scripted [`LlmClient`]. Replies are consumed in order; once the script is
/// exhausted the fallback reply (if any) is repeated.
#[derive(Default)]
pub struct MockLlmClient {
    script: Mutex<VecDeque<MockReply>>,
    fallback: Option<MockReply>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl MockLlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_reply(self, reply: MockReply) -> Self {
        self.script.lock().unwrap().push_back(reply);
        self
    }

    pub fn with_text(self, text: &str) -> Self {
        self.with_reply(MockReply::text(text))
    }

    pub fn with_chunks(self, chunks: &[&str]) -> Self {
        self.with_reply(MockReply::chunks(chunks))
    }

    pub fn with_tool_call(self, name: &str, input: serde_json::Value) -> Self {
        self.with_reply(MockReply::tool_call(name, input))
    }

    pub fn with_error(self, message: &str) -> Self {
        self.with_reply(MockReply::Error(message.to_string()))
    }

    pub fn with_panic(self, message: &str) -> Self {
        self.with_reply(MockReply::Panic(message.to_string()))
    }

    /// Reply used when the script runs out.
    pub fn with_fallback(mut self, reply: MockReply) -> Self {
        self.fallback = Some(reply);
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    fn next_reply(&self) -> Option<MockReply> {
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .or_else(|| self.fallback.clone())
    }
}

impl LlmClient for MockLlmClient {
    fn chat_stream(
        &self,
        config: &ModelConfig,
        messages: Vec<ChatMessage>,
        tools: &[ToolDefinition],
    ) -> BoxFuture<'_, Result<BoxStream<'_, Result<StreamDelta>>>> {
        let system = messages
            .iter()
            .filter(|m| m.role == Role::System)
            .map(|m| m.text())
            .collect::<Vec<_>>()
            .join("\n");
        self.calls.lock().unwrap().push(RecordedCall {
            model_id: config.model_id.clone(),
            system,
            messages,
            tools: tools.iter().map(|t| t.name.clone()).collect(),
        });
        let reply = self.next_reply();

        Box::pin(async move {
            match reply {
                None => Err(WeftError::LlmRequest("mock script exhausted".into())),
                Some(MockReply::Error(msg)) => Err(WeftError::LlmRequest(msg)),
                Some(MockReply::Panic(msg)) => panic!("{}", msg),
                Some(reply) => {
                    let stream: BoxStream<'_, Result<StreamDelta>> =
                        Box::pin(stream::iter(reply.into_deltas()));
                    Ok(stream)
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn replays_script_then_fallback() {
        let mock = MockLlmClient::new()
            .with_chunks(&["a", "b"])
            .with_fallback(MockReply::text("again"));
        let config = ModelConfig::default();

        let mut stream = mock
            .chat_stream(&config, vec![ChatMessage::user("hi")], &[])
            .await
            .unwrap();
        let mut text = String::new();
        while let Some(delta) = stream.next().await {
            if let StreamDelta::TextDelta(t) = delta.unwrap() {
                text.push_str(&t);
            }
        }
        drop(stream);
        assert_eq!(text, "ab");

        assert!(mock.chat_stream(&config, vec![], &[]).await.is_ok());
        assert_eq!(mock.call_count(), 2);
    }

    #[tokio::test]
    async fn exhausted_script_errors() {
        let mock = MockLlmClient::new();
        let result = mock.chat_stream(&ModelConfig::default(), vec![], &[]).await;
        assert!(result.is_err());
    }
}
