//! The closed set of built-in operations a tool record may name.

mod calculator;
mod environment;
mod files;
mod http;
mod journal;
mod shell;
mod time;

use std::path::{Path, PathBuf};

use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde_json::Value;

use weft_core::error::{Result, WeftError};
use weft_core::traits::Capability;
use weft_core::types::{CapabilityContext, ToolResult};

/// Built-in operations, looked up case-insensitively by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Builtin {
    CurrentTime,
    Calculator,
    FileRead,
    FileWrite,
    Editor,
    Shell,
    HttpRequest,
    Environment,
    Sleep,
    Journal,
}

impl Builtin {
    pub const ALL: [Builtin; 10] = [
        Builtin::CurrentTime,
        Builtin::Calculator,
        Builtin::FileRead,
        Builtin::FileWrite,
        Builtin::Editor,
        Builtin::Shell,
        Builtin::HttpRequest,
        Builtin::Environment,
        Builtin::Sleep,
        Builtin::Journal,
    ];

    pub fn from_name(name: &str) -> Option<Self> {
        let wanted = name.trim();
        Self::ALL
            .into_iter()
            .find(|b| b.name().eq_ignore_ascii_case(wanted))
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::CurrentTime => "current_time",
            Self::Calculator => "calculator",
            Self::FileRead => "file_read",
            Self::FileWrite => "file_write",
            Self::Editor => "editor",
            Self::Shell => "shell",
            Self::HttpRequest => "http_request",
            Self::Environment => "environment",
            Self::Sleep => "sleep",
            Self::Journal => "journal",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::CurrentTime => "Get the current date and time in ISO 8601 format, in UTC or local time.",
            Self::Calculator => "Evaluate an arithmetic expression. Supports + - * / % ^, parentheses, sqrt, sin, cos, tan, ln, log, exp, abs, floor, ceil, pi and e.",
            Self::FileRead => "Read a text file. Supports a 1-indexed line offset and a line limit for large files.",
            Self::FileWrite => "Write text to a file, creating parent directories. Overwrites unless append is true.",
            Self::Editor => "Edit a text file: view a line range, replace a unique string, or insert text after a line.",
            Self::Shell => "Run a shell command in the working directory. Returns stdout and stderr.",
            Self::HttpRequest => "Make an HTTP request. Returns status, headers, and body.",
            Self::Environment => "Read environment variables. Values of secret-looking variables are masked.",
            Self::Sleep => "Pause for a number of seconds (at most 300).",
            Self::Journal => "Keep a dated journal in the working directory: write entries, read a day, or list days.",
        }
    }

    pub fn input_schema(&self) -> Value {
        match self {
            Self::CurrentTime => time::current_time_schema(),
            Self::Calculator => calculator::schema(),
            Self::FileRead => files::read_schema(),
            Self::FileWrite => files::write_schema(),
            Self::Editor => files::editor_schema(),
            Self::Shell => shell::schema(),
            Self::HttpRequest => http::schema(),
            Self::Environment => environment::schema(),
            Self::Sleep => time::sleep_schema(),
            Self::Journal => journal::schema(),
        }
    }

    pub fn timeout_secs(&self) -> u64 {
        match self {
            Self::Shell => shell::MAX_TIMEOUT_SECS + 5,
            Self::Sleep => time::MAX_SLEEP_SECS + 5,
            Self::HttpRequest => 60,
            _ => 30,
        }
    }

    pub async fn run(&self, input: Value, ctx: &CapabilityContext) -> Result<ToolResult> {
        match self {
            Self::CurrentTime => time::current_time(parse_input(input)?),
            Self::Calculator => calculator::run(parse_input(input)?),
            Self::FileRead => files::read(parse_input(input)?, ctx).await,
            Self::FileWrite => files::write(parse_input(input)?, ctx).await,
            Self::Editor => files::edit(parse_input(input)?, ctx).await,
            Self::Shell => shell::run(parse_input(input)?, ctx).await,
            Self::HttpRequest => http::run(parse_input(input)?).await,
            Self::Environment => environment::run(parse_input(input)?),
            Self::Sleep => time::sleep(parse_input(input)?).await,
            Self::Journal => journal::run(parse_input(input)?, ctx).await,
        }
    }
}

impl std::fmt::Display for Builtin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A [`Builtin`] exposed as a capability.
#[derive(Debug, Clone, Copy)]
pub struct BuiltinCapability(pub Builtin);

impl Capability for BuiltinCapability {
    fn name(&self) -> &str {
        self.0.name()
    }

    fn description(&self) -> &str {
        self.0.description()
    }

    fn input_schema(&self) -> Value {
        self.0.input_schema()
    }

    fn timeout_secs(&self) -> u64 {
        self.0.timeout_secs()
    }

    fn invoke(&self, input: Value, ctx: CapabilityContext) -> BoxFuture<'_, Result<ToolResult>> {
        Box::pin(async move { self.0.run(input, &ctx).await })
    }
}

fn parse_input<T: DeserializeOwned>(input: Value) -> Result<T> {
    // Models sometimes send `null` for operations without parameters.
    let input = if input.is_null() {
        Value::Object(Default::default())
    } else {
        input
    };
    serde_json::from_value(input).map_err(|e| WeftError::CapabilityValidation(e.to_string()))
}

fn exec_error(builtin: Builtin, message: impl Into<String>) -> WeftError {
    WeftError::CapabilityExecution {
        capability: builtin.name().to_string(),
        message: message.into(),
    }
}

pub(crate) fn resolve_path(file_path: &str, working_dir: &Path) -> PathBuf {
    let path = PathBuf::from(file_path);
    if path.is_absolute() {
        path
    } else {
        working_dir.join(path)
    }
}

/// Cut `text` to at most `max` bytes on a char boundary, noting the cut.
pub(crate) fn truncate(mut text: String, max: usize) -> String {
    if text.len() <= max {
        return text;
    }
    let mut cut = max;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    text.truncate(cut);
    text.push_str("\n... (output truncated)");
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use weft_core::types::SessionId;

    #[test]
    fn lookup_is_case_insensitive() {
        assert_eq!(Builtin::from_name("Calculator"), Some(Builtin::Calculator));
        assert_eq!(Builtin::from_name("FILE_READ"), Some(Builtin::FileRead));
        assert_eq!(Builtin::from_name(" shell "), Some(Builtin::Shell));
        assert_eq!(Builtin::from_name("python_repl"), None);
    }

    #[test]
    fn every_builtin_round_trips_its_name() {
        for b in Builtin::ALL {
            assert_eq!(Builtin::from_name(b.name()), Some(b));
            assert_eq!(b.input_schema()["type"], "object");
        }
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        let out = truncate("ééééé".to_string(), 3);
        assert!(out.starts_with('é'));
        assert!(out.ends_with("(output truncated)"));
        assert_eq!(truncate("short".into(), 10), "short");
    }

    #[tokio::test]
    async fn capability_rejects_bad_input() {
        let cap = BuiltinCapability(Builtin::Calculator);
        let ctx = CapabilityContext::new(SessionId::new(), std::env::temp_dir());
        let err = cap
            .invoke(serde_json::json!({"expr": 1}), ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, WeftError::CapabilityValidation(_)));
    }
}
