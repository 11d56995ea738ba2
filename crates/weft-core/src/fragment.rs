//! Incremental output fragments streamed to the caller while a turn runs.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Tool use id reported for text produced inside a nested agent.
pub const NESTED_AGENT_TOOL_USE_ID: &str = "agent";

/// One streamed fragment: `{"delta": ..., "current_tool_use": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fragment {
    pub delta: FragmentDelta,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_tool_use: Option<CurrentToolUse>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FragmentDelta {
    #[serde(rename = "text")]
    Text(String),
    #[serde(rename = "toolUse")]
    ToolUse { input: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentToolUse {
    #[serde(rename = "toolUseId")]
    pub tool_use_id: String,
    pub name: String,
}

impl Fragment {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            delta: FragmentDelta::Text(text.into()),
            current_tool_use: None,
        }
    }

    pub fn tool_use(id: impl Into<String>, name: impl Into<String>, input: impl Into<String>) -> Self {
        Self {
            delta: FragmentDelta::ToolUse {
                input: input.into(),
            },
            current_tool_use: Some(CurrentToolUse {
                tool_use_id: id.into(),
                name: name.into(),
            }),
        }
    }

    /// The text carried by this fragment, whichever delta kind it is.
    pub fn content(&self) -> &str {
        match &self.delta {
            FragmentDelta::Text(t) => t,
            FragmentDelta::ToolUse { input } => input,
        }
    }
}

/// Destination for an agent's streamed output.
///
/// A top-level sink forwards text and tool-use starts as-is. A nested sink,
/// obtained with [`FragmentSink::nested`], re-labels text as tool-use input
/// attributed to the nested agent and drops the nested agent's own tool-use
/// starts.
#[derive(Debug, Clone, Default)]
pub struct FragmentSink {
    tx: Option<mpsc::UnboundedSender<Fragment>>,
    nested_as: Option<String>,
}

impl FragmentSink {
    pub fn new(tx: mpsc::UnboundedSender<Fragment>) -> Self {
        Self {
            tx: Some(tx),
            nested_as: None,
        }
    }

    /// A sink that drops everything.
    pub fn discard() -> Self {
        Self::default()
    }

    /// Derive the sink used by a nested agent exposed under `name`.
    pub fn nested(&self, name: impl Into<String>) -> Self {
        Self {
            tx: self.tx.clone(),
            nested_as: Some(name.into()),
        }
    }

    pub fn text(&self, text: &str) {
        if text.is_empty() {
            return;
        }
        let fragment = match &self.nested_as {
            Some(name) => Fragment::tool_use(NESTED_AGENT_TOOL_USE_ID, name.clone(), text),
            None => Fragment::text(text),
        };
        self.send(fragment);
    }

    pub fn tool_use_start(&self, id: &str, name: &str) {
        if self.nested_as.is_none() {
            self.send(Fragment::tool_use(id, name, ""));
        }
    }

    fn send(&self, fragment: Fragment) {
        if let Some(tx) = &self.tx {
            // A closed receiver means nobody is listening any more.
            let _ = tx.send(fragment);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_fragment_json_shape() {
        let json = serde_json::to_string(&Fragment::text("hi")).unwrap();
        assert_eq!(json, r#"{"delta":{"text":"hi"}}"#);
    }

    #[test]
    fn tool_use_fragment_json_shape() {
        let json = serde_json::to_value(Fragment::tool_use("t-1", "calculator", "")).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "delta": {"toolUse": {"input": ""}},
                "current_tool_use": {"toolUseId": "t-1", "name": "calculator"}
            })
        );
    }

    #[test]
    fn nested_sink_relabels_text() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink = FragmentSink::new(tx).nested("Summarizer");
        sink.text("partial");
        sink.tool_use_start("inner", "file_read");

        let got = rx.try_recv().unwrap();
        assert_eq!(got, Fragment::tool_use("agent", "Summarizer", "partial"));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn top_level_sink_forwards_tool_starts() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink = FragmentSink::new(tx);
        sink.text("");
        sink.tool_use_start("t-9", "shell");
        let got = rx.try_recv().unwrap();
        assert_eq!(got.current_tool_use.unwrap().name, "shell");
    }

    #[test]
    fn discard_sink_is_silent() {
        FragmentSink::discard().text("nothing happens");
    }
}
