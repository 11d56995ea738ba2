use thiserror::Error;

#[derive(Debug, Error)]
pub enum WeftError {
    // LLM errors
    #[error("LLM request failed: {0}")]
    LlmRequest(String),

    #[error("LLM streaming error: {0}")]
    LlmStream(String),

    #[error("LLM provider not supported: {0}")]
    UnsupportedProvider(String),

    #[error("LLM response parse error: {0}")]
    LlmParse(String),

    // Capability errors
    #[error("Capability not found: {0}")]
    CapabilityNotFound(String),

    #[error("Capability execution failed: {capability}: {message}")]
    CapabilityExecution { capability: String, message: String },

    #[error("Capability timeout after {timeout_secs}s: {capability}")]
    CapabilityTimeout { capability: String, timeout_secs: u64 },

    #[error("Capability input validation failed: {0}")]
    CapabilityValidation(String),

    // Agent errors
    #[error("Agent exceeded max turns ({0})")]
    MaxTurnsExceeded(usize),

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    // Storage errors
    #[error("Database error: {0}")]
    Database(String),

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    // MCP errors
    #[error("MCP error: {0}")]
    Mcp(String),

    // Session errors
    #[error("Workflow {0} was edited after this session started; restart the session")]
    GraphEdited(String),

    #[error("Worker failed to start: {0}")]
    WorkerStartup(String),

    #[error("Worker did not report readiness within {0}s")]
    WorkerStartupTimeout(u64),

    #[error("Worker for session {0} is gone")]
    WorkerGone(String),

    #[error("No history reply within {0}s")]
    HistoryTimeout(u64),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Message must not be empty")]
    EmptyMessage,

    #[error("Protocol error: {0}")]
    Protocol(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl WeftError {
    /// True when the session can no longer be used and must be re-activated.
    pub fn is_restart_required(&self) -> bool {
        matches!(
            self,
            Self::GraphEdited(_) | Self::WorkerGone(_) | Self::SessionNotFound(_)
        )
    }

    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, WeftError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn graph_edited_requires_restart() {
        assert!(WeftError::GraphEdited("wf-1".into()).is_restart_required());
        assert!(WeftError::WorkerGone("s".into()).is_restart_required());
        assert!(!WeftError::EmptyMessage.is_restart_required());
        assert!(!WeftError::LlmRequest("boom".into()).is_restart_required());
    }

    #[test]
    fn not_found_message() {
        let err = WeftError::not_found("Workflow", "abc");
        assert_eq!(err.to_string(), "Workflow not found: abc");
    }
}
