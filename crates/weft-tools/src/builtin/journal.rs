use std::path::{Path, PathBuf};

use chrono::{NaiveDate, Utc};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use weft_core::error::{Result, WeftError};
use weft_core::types::{CapabilityContext, ToolResult};

use super::{exec_error, Builtin};

const JOURNAL_DIR: &str = "journal";

#[derive(Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub(super) enum JournalInput {
    Write { entry: String },
    Read {
        #[serde(default)]
        date: Option<String>,
    },
    List,
}

pub(super) fn schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "action": { "type": "string", "enum": ["write", "read", "list"] },
            "entry": { "type": "string", "description": "For write: the text to record" },
            "date": { "type": "string", "description": "For read: YYYY-MM-DD (default today)" }
        },
        "required": ["action"]
    })
}

fn day_file(dir: &Path, date: NaiveDate) -> PathBuf {
    dir.join(format!("{}.md", date.format("%Y-%m-%d")))
}

pub(super) async fn run(input: JournalInput, ctx: &CapabilityContext) -> Result<ToolResult> {
    let dir = ctx.working_dir.join(JOURNAL_DIR);
    match input {
        JournalInput::Write { entry } => {
            let now = Utc::now();
            let path = day_file(&dir, now.date_naive());
            tokio::fs::create_dir_all(&dir).await?;

            let existing = tokio::fs::read_to_string(&path).await.unwrap_or_default();
            let header = if existing.is_empty() {
                format!("# {}\n", now.format("%Y-%m-%d"))
            } else {
                String::new()
            };
            let content = format!(
                "{}{}\n## {}\n{}\n",
                existing,
                header,
                now.format("%H:%M UTC"),
                entry.trim()
            );
            tokio::fs::write(&path, content)
                .await
                .map_err(|e| exec_error(Builtin::Journal, e.to_string()))?;
            debug!(path = %path.display(), "Journal entry written");
            Ok(ToolResult::success(format!("Entry saved to {}", path.display())))
        }
        JournalInput::Read { date } => {
            let date = match date {
                Some(d) => NaiveDate::parse_from_str(d.trim(), "%Y-%m-%d").map_err(|e| {
                    WeftError::CapabilityValidation(format!("Invalid date '{}': {}", d, e))
                })?,
                None => Utc::now().date_naive(),
            };
            let path = day_file(&dir, date);
            match tokio::fs::read_to_string(&path).await {
                Ok(content) => Ok(ToolResult::success(content)),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ToolResult::success(
                    format!("No journal entries for {}", date.format("%Y-%m-%d")),
                )),
                Err(e) => Err(exec_error(Builtin::Journal, e.to_string())),
            }
        }
        JournalInput::List => {
            let mut days = Vec::new();
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    return Ok(ToolResult::success("The journal is empty"))
                }
                Err(e) => return Err(exec_error(Builtin::Journal, e.to_string())),
            };
            while let Some(entry) = entries.next_entry().await? {
                if let Some(stem) = entry.file_name().to_str().and_then(|n| n.strip_suffix(".md")) {
                    days.push(stem.to_string());
                }
            }
            days.sort();
            if days.is_empty() {
                Ok(ToolResult::success("The journal is empty"))
            } else {
                Ok(ToolResult::success(days.join("\n")))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weft_core::types::SessionId;

    #[tokio::test]
    async fn write_read_list() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = CapabilityContext::new(SessionId::new(), dir.path().to_path_buf());

        let empty = run(JournalInput::List, &ctx).await.unwrap();
        assert_eq!(empty.content, "The journal is empty");

        run(JournalInput::Write { entry: "first".into() }, &ctx).await.unwrap();
        run(JournalInput::Write { entry: "second".into() }, &ctx).await.unwrap();

        let today = run(JournalInput::Read { date: None }, &ctx).await.unwrap();
        assert!(today.content.contains("first"));
        assert!(today.content.contains("second"));
        assert_eq!(today.content.matches("# ").count(), 1 + 2);

        let listed = run(JournalInput::List, &ctx).await.unwrap();
        assert_eq!(listed.content, Utc::now().format("%Y-%m-%d").to_string());
    }

    #[tokio::test]
    async fn bad_date_is_validation_error() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = CapabilityContext::new(SessionId::new(), dir.path().to_path_buf());
        let err = run(JournalInput::Read { date: Some("yesterday".into()) }, &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, WeftError::CapabilityValidation(_)));
    }

    #[tokio::test]
    async fn missing_day_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = CapabilityContext::new(SessionId::new(), dir.path().to_path_buf());
        let result = run(JournalInput::Read { date: Some("2020-01-01".into()) }, &ctx)
            .await
            .unwrap();
        assert!(!result.is_error);
        assert!(result.content.contains("2020-01-01"));
    }
}
