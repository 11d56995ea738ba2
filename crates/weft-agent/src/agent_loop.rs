use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use weft_core::config::{AgentConfig, ModelConfig};
use weft_core::error::{Result, WeftError};
use weft_core::fragment::FragmentSink;
use weft_core::traits::LlmClient;
use weft_core::types::*;
use weft_tools::CapabilitySet;

/// Accumulator for streaming tool call deltas.
#[derive(Debug, Default)]
struct ToolCallAccumulator {
    id: String,
    name: String,
    input_json: String,
}

/// An LLM agent with a fixed system prompt and capability set.
///
/// The agent remembers its conversation across calls to [`Agent::run`]. A run
/// that fails leaves the conversation as it was before the run.
pub struct Agent {
    name: String,
    system_prompt: String,
    model: ModelConfig,
    llm: Arc<dyn LlmClient>,
    capabilities: CapabilitySet,
    settings: AgentConfig,
    working_dir: PathBuf,
    conversation: Mutex<Vec<ChatMessage>>,
}

impl Agent {
    pub fn new(
        name: impl Into<String>,
        system_prompt: impl Into<String>,
        model: ModelConfig,
        llm: Arc<dyn LlmClient>,
    ) -> Self {
        Self {
            name: name.into(),
            system_prompt: system_prompt.into(),
            model,
            llm,
            capabilities: CapabilitySet::new(),
            settings: AgentConfig::default(),
            working_dir: std::env::temp_dir(),
            conversation: Mutex::new(Vec::new()),
        }
    }

    pub fn with_capabilities(mut self, capabilities: CapabilitySet) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn with_settings(mut self, settings: AgentConfig) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_working_dir(mut self, working_dir: PathBuf) -> Self {
        self.working_dir = working_dir;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    pub fn model_id(&self) -> &str {
        &self.model.model_id
    }

    pub fn capabilities(&self) -> &CapabilitySet {
        &self.capabilities
    }

    /// Forget everything said so far.
    pub async fn reset(&self) {
        self.conversation.lock().await.clear();
    }

    /// Run one user message to completion, streaming text and tool-use
    /// starts into `sink`. Returns the final assistant text.
    pub async fn run(
        &self,
        session_id: &SessionId,
        user_message: &str,
        sink: &FragmentSink,
    ) -> Result<String> {
        let max_turns = self.settings.max_turns;
        let mut conversation = self.conversation.lock().await;

        let mut messages = Vec::with_capacity(conversation.len() + 2);
        messages.push(ChatMessage::system(self.system_prompt.clone()));
        messages.extend(conversation.iter().cloned());
        let first_new = messages.len();
        messages.push(ChatMessage::user(user_message));

        let tool_defs = self.capabilities.definitions();
        let tool_ctx = CapabilityContext::new(session_id.clone(), self.working_dir.clone())
            .with_sink(sink.clone());

        let mut total_input_tokens = 0u64;
        let mut total_output_tokens = 0u64;

        for turn in 0..max_turns {
            debug!(agent = %self.name, turn, "Starting agent turn");

            let mut stream = self
                .llm
                .chat_stream(&self.model, messages.clone(), &tool_defs)
                .await?;

            let mut text_content = String::new();
            let mut tool_calls: BTreeMap<usize, ToolCallAccumulator> = BTreeMap::new();
            let mut stop_reason = None;

            while let Some(delta) = stream.next().await {
                match delta? {
                    StreamDelta::TextDelta(text) => {
                        sink.text(&text);
                        text_content.push_str(&text);
                    }
                    StreamDelta::ToolUseStart { index, id, name } => {
                        sink.tool_use_start(&id, &name);
                        let tc = tool_calls.entry(index).or_default();
                        tc.id = id;
                        tc.name = name;
                    }
                    StreamDelta::ToolInputDelta { index, delta } => {
                        if let Some(tc) = tool_calls.get_mut(&index) {
                            tc.input_json.push_str(&delta);
                        }
                    }
                    StreamDelta::Stop(reason) => {
                        stop_reason = Some(reason);
                    }
                    StreamDelta::Usage {
                        input_tokens,
                        output_tokens,
                    } => {
                        total_input_tokens += input_tokens;
                        total_output_tokens += output_tokens;
                    }
                }
            }
            drop(stream);

            // Indices come from the provider and may be sparse.
            let tool_calls: Vec<ToolCallAccumulator> = tool_calls
                .into_values()
                .filter(|tc| !tc.name.is_empty())
                .collect();

            let parsed_inputs: Vec<serde_json::Value> = tool_calls
                .iter()
                .map(|tc| parse_tool_input(&tc.input_json))
                .collect();

            let mut content_blocks = Vec::new();
            if !text_content.is_empty() {
                content_blocks.push(ContentBlock::Text {
                    text: text_content.clone(),
                });
            }
            for (tc, input) in tool_calls.iter().zip(parsed_inputs.iter()) {
                content_blocks.push(ContentBlock::ToolUse {
                    id: tc.id.clone(),
                    name: tc.name.clone(),
                    input: input.clone(),
                });
            }
            if !content_blocks.is_empty() {
                messages.push(ChatMessage {
                    role: Role::Assistant,
                    content: content_blocks,
                });
            }

            if tool_calls.is_empty() {
                if stop_reason == Some(StopReason::MaxTokens) {
                    warn!(agent = %self.name, "LLM hit max tokens");
                }
                info!(
                    agent = %self.name,
                    turn = turn + 1,
                    input_tokens = total_input_tokens,
                    output_tokens = total_output_tokens,
                    "Agent run complete"
                );
                conversation.extend(messages.drain(first_new..));
                return Ok(text_content);
            }

            let tool_results: Vec<(String, String, ToolResult)> =
                if self.settings.parallel_tools && tool_calls.len() > 1 {
                    let futs: Vec<_> = tool_calls
                        .iter()
                        .zip(parsed_inputs)
                        .map(|(tc, input)| {
                            let ctx = tool_ctx.clone();
                            async move {
                                let result = self.execute_tool(&tc.name, input, ctx).await;
                                (tc.name.clone(), tc.id.clone(), result)
                            }
                        })
                        .collect();
                    futures::future::join_all(futs).await
                } else {
                    let mut results = Vec::with_capacity(tool_calls.len());
                    for (tc, input) in tool_calls.iter().zip(parsed_inputs) {
                        let result = self.execute_tool(&tc.name, input, tool_ctx.clone()).await;
                        results.push((tc.name.clone(), tc.id.clone(), result));
                    }
                    results
                };

            let tool_result_blocks = tool_results
                .into_iter()
                .map(|(_, id, result)| ContentBlock::ToolResult {
                    tool_use_id: id,
                    content: compact_tool_output(
                        &result.content,
                        self.settings.max_tool_output_chars,
                    ),
                    is_error: result.is_error,
                })
                .collect();

            messages.push(ChatMessage {
                role: Role::User,
                content: tool_result_blocks,
            });
        }

        Err(WeftError::MaxTurnsExceeded(max_turns))
    }

    async fn execute_tool(
        &self,
        name: &str,
        input: serde_json::Value,
        ctx: CapabilityContext,
    ) -> ToolResult {
        debug!(agent = %self.name, tool = %name, "Executing capability");
        match self.capabilities.execute(name, input, ctx).await {
            Ok(result) => result,
            Err(e) => {
                error!(agent = %self.name, tool = %name, error = %e, "Capability execution failed");
                ToolResult::error(e.to_string())
            }
        }
    }
}

fn parse_tool_input(raw: &str) -> serde_json::Value {
    if raw.trim().is_empty() {
        return serde_json::Value::Object(Default::default());
    }
    serde_json::from_str(raw).unwrap_or(serde_json::Value::Null)
}

/// Cut output that exceeds `max_chars`, preferring a line boundary.
pub fn compact_tool_output(content: &str, max_chars: usize) -> String {
    if content.len() <= max_chars {
        return content.to_string();
    }

    let mut cut = max_chars;
    while !content.is_char_boundary(cut) {
        cut -= 1;
    }
    let truncated = &content[..cut];
    if let Some(nl_pos) = truncated.rfind('\n') {
        format!("{}\n[truncated]", &content[..nl_pos])
    } else {
        format!("{}\n[truncated]", truncated)
    }
}
