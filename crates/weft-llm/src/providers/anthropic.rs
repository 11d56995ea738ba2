use futures::future::BoxFuture;
use futures::stream::{BoxStream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

use weft_core::config::ModelConfig;
use weft_core::error::{Result, WeftError};
use weft_core::traits::LlmClient;
use weft_core::types::*;

use crate::streaming::{sse_events, SseEvent};

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Client for the Anthropic messages API.
pub struct AnthropicClient {
    http: Client,
}

impl AnthropicClient {
    pub fn new() -> Self {
        Self {
            http: Client::new(),
        }
    }
}

impl Default for AnthropicClient {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<ApiMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<&'a ToolDefinition>,
    stream: bool,
}

#[derive(Serialize, Debug)]
struct ApiMessage {
    role: &'static str,
    content: Value,
}

#[derive(Deserialize, Debug)]
#[serde(tag = "type")]
enum StreamEvent {
    #[serde(rename = "message_start")]
    MessageStart { message: MessageStartInfo },
    #[serde(rename = "content_block_start")]
    ContentBlockStart {
        index: usize,
        content_block: BlockStart,
    },
    #[serde(rename = "content_block_delta")]
    ContentBlockDelta { index: usize, delta: BlockDelta },
    #[serde(rename = "message_delta")]
    MessageDelta {
        delta: MessageDeltaInfo,
        #[serde(default)]
        usage: Option<Usage>,
    },
    #[serde(rename = "error")]
    Error { error: ApiError },
    #[serde(other)]
    Other,
}

#[derive(Deserialize, Debug)]
struct MessageStartInfo {
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Deserialize, Debug)]
struct Usage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

#[derive(Deserialize, Debug)]
#[serde(tag = "type")]
enum BlockStart {
    #[serde(rename = "tool_use")]
    ToolUse { id: String, name: String },
    #[serde(other)]
    Other,
}

#[derive(Deserialize, Debug)]
#[serde(tag = "type")]
enum BlockDelta {
    #[serde(rename = "text_delta")]
    Text { text: String },
    #[serde(rename = "input_json_delta")]
    InputJson { partial_json: String },
    #[serde(other)]
    Other,
}

#[derive(Deserialize, Debug)]
struct MessageDeltaInfo {
    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Deserialize, Debug)]
struct ApiError {
    message: String,
}

/// Split out the system prompt; everything else maps onto user/assistant turns.
fn convert_messages(messages: Vec<ChatMessage>) -> (Option<String>, Vec<ApiMessage>) {
    let mut system: Option<String> = None;
    let mut api_msgs = Vec::with_capacity(messages.len());

    for msg in messages {
        let role = match msg.role {
            Role::System => {
                let text = msg.text();
                system = Some(match system {
                    Some(prev) => format!("{prev}\n\n{text}"),
                    None => text,
                });
                continue;
            }
            Role::User => "user",
            Role::Assistant => "assistant",
        };
        api_msgs.push(ApiMessage {
            role,
            content: convert_content(&msg.content),
        });
    }

    (system, api_msgs)
}

fn convert_content(blocks: &[ContentBlock]) -> Value {
    if let [ContentBlock::Text { text }] = blocks {
        return Value::String(text.clone());
    }

    blocks
        .iter()
        .map(|b| match b {
            ContentBlock::Text { text } => json!({ "type": "text", "text": text }),
            ContentBlock::ToolUse { id, name, input } => json!({
                "type": "tool_use",
                "id": id,
                "name": name,
                "input": input,
            }),
            ContentBlock::ToolResult {
                tool_use_id,
                content,
                is_error,
            } => json!({
                "type": "tool_result",
                "tool_use_id": tool_use_id,
                "content": content,
                "is_error": is_error,
            }),
        })
        .collect()
}

fn stop_reason(reason: &str) -> Option<StopReason> {
    match reason {
        "end_turn" => Some(StopReason::EndTurn),
        "tool_use" => Some(StopReason::ToolUse),
        "max_tokens" => Some(StopReason::MaxTokens),
        "stop_sequence" => Some(StopReason::StopSequence),
        _ => None,
    }
}

fn parse_event(event: &SseEvent) -> Option<Result<StreamDelta>> {
    let parsed: StreamEvent = match serde_json::from_str(&event.data) {
        Ok(p) => p,
        Err(e) => {
            warn!(data = %event.data, error = %e, "Failed to parse Anthropic SSE event");
            return None;
        }
    };

    match parsed {
        StreamEvent::MessageStart { message } => message.usage.map(|u| {
            Ok(StreamDelta::Usage {
                input_tokens: u.input_tokens,
                output_tokens: u.output_tokens,
            })
        }),
        StreamEvent::ContentBlockStart {
            index,
            content_block: BlockStart::ToolUse { id, name },
        } => Some(Ok(StreamDelta::ToolUseStart { index, id, name })),
        StreamEvent::ContentBlockDelta { index, delta } => match delta {
            BlockDelta::Text { text } => Some(Ok(StreamDelta::TextDelta(text))),
            BlockDelta::InputJson { partial_json } => Some(Ok(StreamDelta::ToolInputDelta {
                index,
                delta: partial_json,
            })),
            BlockDelta::Other => None,
        },
        StreamEvent::MessageDelta { delta, usage } => {
            if let Some(usage) = usage {
                debug!(output_tokens = usage.output_tokens, "Token usage");
            }
            delta
                .stop_reason
                .as_deref()
                .and_then(stop_reason)
                .map(|s| Ok(StreamDelta::Stop(s)))
        }
        StreamEvent::Error { error } => Some(Err(WeftError::LlmStream(error.message))),
        StreamEvent::ContentBlockStart { .. } | StreamEvent::Other => None,
    }
}

impl LlmClient for AnthropicClient {
    fn chat_stream(
        &self,
        config: &ModelConfig,
        messages: Vec<ChatMessage>,
        tools: &[ToolDefinition],
    ) -> BoxFuture<'_, Result<BoxStream<'_, Result<StreamDelta>>>> {
        let config = config.clone();
        let tools = tools.to_vec();

        Box::pin(async move {
            let api_key = config
                .api_key
                .as_deref()
                .ok_or_else(|| WeftError::Config("Anthropic API key not set".into()))?;
            let url = config.base_url.as_deref().unwrap_or(ANTHROPIC_API_URL);

            let (system, api_messages) = convert_messages(messages);
            let body = MessagesRequest {
                model: &config.model_id,
                max_tokens: config.max_tokens,
                temperature: (config.temperature > 0.0).then_some(config.temperature),
                system,
                messages: api_messages,
                tools: tools.iter().collect(),
                stream: true,
            };

            debug!(model = %config.model_id, tools = tools.len(), "Sending Anthropic request");

            let response = self
                .http
                .post(url)
                .header("x-api-key", api_key)
                .header("anthropic-version", ANTHROPIC_VERSION)
                .json(&body)
                .send()
                .await
                .map_err(|e| WeftError::LlmRequest(e.to_string()))?;

            if !response.status().is_success() {
                return Err(super::status_error(response).await);
            }

            let deltas = sse_events(response.bytes_stream()).filter_map(|event| async move {
                match event {
                    Ok(event) => parse_event(&event),
                    Err(e) => Some(Err(e)),
                }
            });

            Ok(Box::pin(deltas) as BoxStream<'_, Result<StreamDelta>>)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(data: &str) -> SseEvent {
        SseEvent {
            event_type: None,
            data: data.to_string(),
        }
    }

    #[test]
    fn system_messages_are_lifted() {
        let (system, msgs) = convert_messages(vec![
            ChatMessage::system("be brief"),
            ChatMessage::user("hello"),
        ]);
        assert_eq!(system.as_deref(), Some("be brief"));
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].role, "user");
        assert_eq!(msgs[0].content, json!("hello"));
    }

    #[test]
    fn tool_results_become_blocks() {
        let msg = ChatMessage {
            role: Role::User,
            content: vec![ContentBlock::ToolResult {
                tool_use_id: "t1".into(),
                content: "42".into(),
                is_error: false,
            }],
        };
        let (_, msgs) = convert_messages(vec![msg]);
        assert_eq!(msgs[0].content[0]["type"], "tool_result");
        assert_eq!(msgs[0].content[0]["tool_use_id"], "t1");
    }

    #[test]
    fn parses_text_and_tool_events() {
        let text = parse_event(&event(
            r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Hi"}}"#,
        ));
        assert!(matches!(text, Some(Ok(StreamDelta::TextDelta(t))) if t == "Hi"));

        let start = parse_event(&event(
            r#"{"type":"content_block_start","index":1,"content_block":{"type":"tool_use","id":"tu_1","name":"calculator","input":{}}}"#,
        ));
        assert!(matches!(start, Some(Ok(StreamDelta::ToolUseStart { index: 1, .. }))));

        let stop = parse_event(&event(
            r#"{"type":"message_delta","delta":{"stop_reason":"tool_use"},"usage":{"output_tokens":5}}"#,
        ));
        assert!(matches!(stop, Some(Ok(StreamDelta::Stop(StopReason::ToolUse)))));
    }

    #[test]
    fn ignores_ping_and_surfaces_errors() {
        assert!(parse_event(&event(r#"{"type":"ping"}"#)).is_none());
        let err = parse_event(&event(r#"{"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#));
        assert!(matches!(err, Some(Err(WeftError::LlmStream(m))) if m == "Overloaded"));
    }
}
