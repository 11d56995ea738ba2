use std::time::Duration;

use chrono::{Local, SecondsFormat, Utc};
use serde::Deserialize;
use serde_json::Value;

use weft_core::error::{Result, WeftError};
use weft_core::types::ToolResult;

pub(super) const MAX_SLEEP_SECS: u64 = 300;

#[derive(Deserialize)]
pub(super) struct CurrentTimeInput {
    #[serde(default)]
    timezone: Option<String>,
}

pub(super) fn current_time_schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "timezone": {
                "type": "string",
                "description": "\"UTC\" (default) or \"local\""
            }
        }
    })
}

pub(super) fn current_time(input: CurrentTimeInput) -> Result<ToolResult> {
    let zone = input.timezone.unwrap_or_else(|| "UTC".to_string());
    let now = match zone.to_ascii_lowercase().as_str() {
        "utc" | "z" | "" => Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        "local" => Local::now().to_rfc3339_opts(SecondsFormat::Secs, false),
        _ => {
            return Ok(ToolResult::error(format!(
                "Unsupported timezone '{}'; use \"UTC\" or \"local\"",
                zone
            )))
        }
    };
    Ok(ToolResult::success(now))
}

#[derive(Deserialize)]
pub(super) struct SleepInput {
    seconds: f64,
}

pub(super) fn sleep_schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "seconds": {
                "type": "number",
                "description": "How long to pause, in seconds (max 300)"
            }
        },
        "required": ["seconds"]
    })
}

pub(super) async fn sleep(input: SleepInput) -> Result<ToolResult> {
    if !input.seconds.is_finite() || input.seconds < 0.0 {
        return Err(WeftError::CapabilityValidation(
            "seconds must be a non-negative number".into(),
        ));
    }
    let secs = input.seconds.min(MAX_SLEEP_SECS as f64);
    tokio::time::sleep(Duration::from_secs_f64(secs)).await;
    Ok(ToolResult::success(format!("Slept for {} seconds", secs)))
}
