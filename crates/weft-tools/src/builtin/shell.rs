use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use weft_core::error::{Result, WeftError};
use weft_core::types::{CapabilityContext, ToolResult};

use super::{exec_error, truncate, Builtin};

pub(super) const MAX_TIMEOUT_SECS: u64 = 300;
const MAX_OUTPUT_CHARS: usize = 30_000;

#[derive(Deserialize)]
pub(super) struct ShellInput {
    command: String,
    #[serde(default = "default_timeout")]
    timeout: u64,
}

fn default_timeout() -> u64 {
    120
}

pub(super) fn schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "command": {
                "type": "string",
                "description": "The shell command to execute"
            },
            "timeout": {
                "type": "integer",
                "description": "Timeout in seconds (default 120, max 300)",
                "default": 120
            }
        },
        "required": ["command"]
    })
}

pub(super) async fn run(input: ShellInput, ctx: &CapabilityContext) -> Result<ToolResult> {
    let timeout_secs = input.timeout.clamp(1, MAX_TIMEOUT_SECS);
    debug!(command = %input.command, timeout_secs, "Executing shell command");

    let result = tokio::time::timeout(
        Duration::from_secs(timeout_secs),
        tokio::process::Command::new("sh")
            .arg("-c")
            .arg(&input.command)
            .current_dir(&ctx.working_dir)
            .kill_on_drop(true)
            .output(),
    )
    .await;

    let output = match result {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => return Err(exec_error(Builtin::Shell, e.to_string())),
        Err(_) => {
            return Err(WeftError::CapabilityTimeout {
                capability: Builtin::Shell.name().to_string(),
                timeout_secs,
            })
        }
    };

    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);

    let mut content = String::new();
    if !stdout.is_empty() {
        content.push_str(&stdout);
    }
    if !stderr.is_empty() {
        if !content.is_empty() {
            content.push('\n');
        }
        content.push_str("STDERR:\n");
        content.push_str(&stderr);
    }
    let mut content = truncate(content, MAX_OUTPUT_CHARS);
    if content.is_empty() {
        content = "(no output)".to_string();
    }

    if output.status.success() {
        Ok(ToolResult::success(content))
    } else {
        let code = output.status.code().unwrap_or(-1);
        Ok(ToolResult::error(format!("Exit code {}\n{}", code, content)))
    }
}
