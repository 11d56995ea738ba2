//! Line-oriented frames exchanged between a session and its worker.
//!
//! Worker output, one frame per line:
//! `STARTED`, `FAILED{"error":..}`, `data: <fragment json>`, `ANSWERED`,
//! `ANSWERED{"error":..}`, `HISTORY[..]`.
//!
//! Worker input, one command per line: `TERMINATE`, `RETRIEVE`, or the user
//! message as a JSON string.

use serde::{Deserialize, Serialize};

use weft_core::error::{Result, WeftError};
use weft_core::fragment::Fragment;
use weft_core::types::HistoryEntry;

const STARTED: &str = "STARTED";
const FAILED: &str = "FAILED";
const DATA: &str = "data: ";
const ANSWERED: &str = "ANSWERED";
const HISTORY: &str = "HISTORY";
const TERMINATE: &str = "TERMINATE";
const RETRIEVE: &str = "RETRIEVE";

#[derive(Serialize, Deserialize)]
struct ErrorPayload {
    error: String,
}

/// A frame written by a worker.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Initialization finished; the worker accepts messages.
    Started,
    /// Initialization failed; the worker is exiting.
    Failed(String),
    /// One incremental output fragment of the current turn.
    Data(Fragment),
    /// The current turn finished.
    Answered,
    /// The current turn failed; the worker keeps running.
    AnsweredError(String),
    /// Reply to [`InputCommand::Retrieve`].
    History(Vec<HistoryEntry>),
}

impl Frame {
    pub fn encode(&self) -> String {
        match self {
            Self::Started => STARTED.to_string(),
            Self::Failed(error) => format!("{}{}", FAILED, error_json(error)),
            Self::Data(fragment) => format!(
                "{}{}",
                DATA,
                serde_json::to_string(fragment).unwrap_or_else(|_| "{}".into())
            ),
            Self::Answered => ANSWERED.to_string(),
            Self::AnsweredError(error) => format!("{}{}", ANSWERED, error_json(error)),
            Self::History(entries) => format!(
                "{}{}",
                HISTORY,
                serde_json::to_string(entries).unwrap_or_else(|_| "[]".into())
            ),
        }
    }

    pub fn decode(line: &str) -> Result<Self> {
        let line = line.trim_end_matches(['\r', '\n']);
        if let Some(json) = line.strip_prefix(DATA) {
            return Ok(Self::Data(serde_json::from_str(json)?));
        }
        if line == STARTED {
            return Ok(Self::Started);
        }
        if let Some(rest) = line.strip_prefix(ANSWERED) {
            return if rest.is_empty() {
                Ok(Self::Answered)
            } else {
                Ok(Self::AnsweredError(parse_error(rest)?))
            };
        }
        if let Some(json) = line.strip_prefix(HISTORY) {
            return Ok(Self::History(serde_json::from_str(json)?));
        }
        if let Some(json) = line.strip_prefix(FAILED) {
            return Ok(Self::Failed(parse_error(json)?));
        }
        Err(WeftError::Protocol(format!("unrecognized frame: {}", truncate_for_log(line))))
    }
}

/// A command sent to a worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputCommand {
    Message(String),
    Retrieve,
    Terminate,
}

impl InputCommand {
    pub fn encode(&self) -> String {
        match self {
            Self::Message(text) => serde_json::Value::String(text.clone()).to_string(),
            Self::Retrieve => RETRIEVE.to_string(),
            Self::Terminate => TERMINATE.to_string(),
        }
    }

    pub fn decode(line: &str) -> Result<Self> {
        let line = line.trim_end_matches(['\r', '\n']);
        match line {
            TERMINATE => Ok(Self::Terminate),
            RETRIEVE => Ok(Self::Retrieve),
            quoted => serde_json::from_str::<String>(quoted)
                .map(Self::Message)
                .map_err(|_| {
                    WeftError::Protocol(format!(
                        "unrecognized command: {}",
                        truncate_for_log(quoted)
                    ))
                }),
        }
    }
}

fn error_json(error: &str) -> String {
    serde_json::to_string(&ErrorPayload {
        error: error.to_string(),
    })
    .unwrap_or_else(|_| "{}".into())
}

fn parse_error(json: &str) -> Result<String> {
    let payload: ErrorPayload = serde_json::from_str(json)?;
    Ok(payload.error)
}

fn truncate_for_log(line: &str) -> String {
    line.chars().take(80).collect()
}
