//! Agents exposed to other agents as a single capability.

use std::sync::{Arc, OnceLock};

use futures::future::BoxFuture;
use regex::Regex;
use serde::Deserialize;
use tracing::debug;

use weft_core::error::Result;
use weft_core::traits::Capability;
use weft_core::types::{CapabilityContext, ToolResult};

use crate::Agent;

/// Nested runs can take many model turns of their own.
const NESTED_AGENT_TIMEOUT_SECS: u64 = 900;

fn invalid_name_chars() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^a-zA-Z0-9_-]").unwrap())
}

/// Capability name for an agent: every character outside `[A-Za-z0-9_-]`
/// becomes `_`.
pub fn sanitize_name(name: &str) -> String {
    invalid_name_chars().replace_all(name, "_").into_owned()
}

#[derive(Deserialize)]
struct NestedAgentInput {
    input: String,
}

/// Runs a wrapped [`Agent`] with the caller's message.
///
/// Text the nested agent streams is re-labelled as tool-use input attributed
/// to this capability's name.
pub struct NestedAgentCapability {
    name: String,
    description: String,
    agent: Arc<Agent>,
}

impl NestedAgentCapability {
    pub fn new(agent: Arc<Agent>, description: &str) -> Self {
        let description = if description.trim().is_empty() {
            format!("Execute the agent called {}", agent.name())
        } else {
            description.to_string()
        };
        Self {
            name: sanitize_name(agent.name()),
            description,
            agent,
        }
    }

    pub fn agent(&self) -> &Arc<Agent> {
        &self.agent
    }
}

impl Capability for NestedAgentCapability {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "input": {
                    "type": "string",
                    "description": "The message for the agent to process"
                }
            },
            "required": ["input"]
        })
    }

    fn timeout_secs(&self) -> u64 {
        NESTED_AGENT_TIMEOUT_SECS
    }

    fn invoke(
        &self,
        input: serde_json::Value,
        ctx: CapabilityContext,
    ) -> BoxFuture<'_, Result<ToolResult>> {
        Box::pin(async move {
            let message = match input {
                serde_json::Value::String(s) => s,
                other => match serde_json::from_value::<NestedAgentInput>(other.clone()) {
                    Ok(parsed) => parsed.input,
                    // Models occasionally pick their own argument names.
                    Err(_) => other.to_string(),
                },
            };

            debug!(capability = %self.name, session = %ctx.session_id, "Running nested agent");
            let sink = ctx.sink.nested(self.name.clone());
            let output = self.agent.run(&ctx.session_id, &message, &sink).await?;
            Ok(ToolResult::success(output))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;
    use weft_core::config::ModelConfig;
    use weft_core::fragment::{Fragment, FragmentSink};
    use weft_core::types::SessionId;
    use weft_test_utils::MockLlmClient;

    #[test]
    fn sanitize_replaces_disallowed_characters() {
        assert_eq!(sanitize_name("Research Bot v2.0"), "Research_Bot_v2_0");
        assert_eq!(sanitize_name("ok_name-1"), "ok_name-1");
        assert_eq!(sanitize_name("héllo"), "h_llo");
        assert_eq!(sanitize_name("a b"), sanitize_name("a b"));
    }

    #[test]
    fn default_description_names_the_agent() {
        let mock = Arc::new(MockLlmClient::new());
        let agent = Arc::new(Agent::new("Writer", "p", ModelConfig::default(), mock));
        let cap = NestedAgentCapability::new(agent, "  ");
        assert_eq!(cap.description(), "Execute the agent called Writer");
        assert_eq!(cap.name(), "Writer");
    }

    #[tokio::test]
    async fn nested_text_is_relabelled() {
        let mock = Arc::new(MockLlmClient::new().with_chunks(&["sum", "mary"]));
        let agent = Arc::new(Agent::new("Sum Bot", "p", ModelConfig::default(), mock.clone()));
        let cap = NestedAgentCapability::new(agent, "Summarizes");
        let (tx, mut rx) = mpsc::unbounded_channel();
        let ctx = CapabilityContext::new(SessionId::new(), std::env::temp_dir())
            .with_sink(FragmentSink::new(tx));

        let result = cap
            .invoke(serde_json::json!({"input": "long text"}), ctx)
            .await
            .unwrap();
        assert_eq!(result.content, "summary");
        assert_eq!(
            rx.try_recv().unwrap(),
            Fragment::tool_use("agent", "Sum_Bot", "sum")
        );
        assert_eq!(mock.calls()[0].messages[1].text(), "long text");
    }
}
