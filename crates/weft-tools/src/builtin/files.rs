use serde::Deserialize;
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use weft_core::error::{Result, WeftError};
use weft_core::types::{CapabilityContext, ToolResult};

use super::{exec_error, resolve_path, Builtin};

const DEFAULT_LINE_LIMIT: usize = 2000;
const MAX_LINE_CHARS: usize = 2000;

#[derive(Deserialize)]
pub(super) struct ReadInput {
    path: String,
    #[serde(default)]
    offset: Option<usize>,
    #[serde(default)]
    limit: Option<usize>,
}

pub(super) fn read_schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "path": { "type": "string", "description": "File path, absolute or relative to the working directory" },
            "offset": { "type": "integer", "description": "First line to read (1-indexed)" },
            "limit": { "type": "integer", "description": "Maximum number of lines (default 2000)" }
        },
        "required": ["path"]
    })
}

pub(super) async fn read(input: ReadInput, ctx: &CapabilityContext) -> Result<ToolResult> {
    let path = resolve_path(&input.path, &ctx.working_dir);
    debug!(path = %path.display(), "Reading file");

    let content = tokio::fs::read_to_string(&path)
        .await
        .map_err(|e| exec_error(Builtin::FileRead, format!("{}: {}", path.display(), e)))?;

    Ok(ToolResult::success(number_lines(
        &content,
        input.offset.unwrap_or(1),
        input.limit.unwrap_or(DEFAULT_LINE_LIMIT),
    )))
}

fn number_lines(content: &str, offset: usize, limit: usize) -> String {
    let skip = offset.max(1) - 1;
    let mut output = String::new();
    for (i, line) in content.lines().enumerate().skip(skip).take(limit) {
        let shown: String = line.chars().take(MAX_LINE_CHARS).collect();
        output.push_str(&format!("{:>6}\t{}\n", i + 1, shown));
    }
    if output.is_empty() {
        output = "(empty file)".to_string();
    }
    output
}

#[derive(Deserialize)]
pub(super) struct WriteInput {
    path: String,
    content: String,
    #[serde(default)]
    append: bool,
}

pub(super) fn write_schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "path": { "type": "string", "description": "File path, absolute or relative to the working directory" },
            "content": { "type": "string", "description": "Text to write" },
            "append": { "type": "boolean", "description": "Append instead of overwriting (default false)" }
        },
        "required": ["path", "content"]
    })
}

pub(super) async fn write(input: WriteInput, ctx: &CapabilityContext) -> Result<ToolResult> {
    let path = resolve_path(&input.path, &ctx.working_dir);
    debug!(path = %path.display(), append = input.append, "Writing file");

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .write(true)
        .append(input.append)
        .truncate(!input.append)
        .open(&path)
        .await
        .map_err(|e| exec_error(Builtin::FileWrite, format!("{}: {}", path.display(), e)))?;
    file.write_all(input.content.as_bytes()).await?;
    file.flush().await?;

    Ok(ToolResult::success(format!(
        "Wrote {} bytes to {}",
        input.content.len(),
        path.display()
    )))
}

#[derive(Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub(super) enum EditorInput {
    View {
        path: String,
        #[serde(default)]
        view_range: Option<[usize; 2]>,
    },
    StrReplace {
        path: String,
        old_str: String,
        #[serde(default)]
        new_str: String,
    },
    Insert {
        path: String,
        insert_line: usize,
        new_str: String,
    },
}

pub(super) fn editor_schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "command": { "type": "string", "enum": ["view", "str_replace", "insert"] },
            "path": { "type": "string" },
            "view_range": {
                "type": "array",
                "items": { "type": "integer" },
                "description": "For view: [first, last] line numbers, 1-indexed, inclusive"
            },
            "old_str": { "type": "string", "description": "For str_replace: text that must occur exactly once" },
            "new_str": { "type": "string", "description": "For str_replace and insert: replacement or inserted text" },
            "insert_line": { "type": "integer", "description": "For insert: line after which to insert (0 = top)" }
        },
        "required": ["command", "path"]
    })
}

pub(super) async fn edit(input: EditorInput, ctx: &CapabilityContext) -> Result<ToolResult> {
    match input {
        EditorInput::View { path, view_range } => {
            let path = resolve_path(&path, &ctx.working_dir);
            let content = read_existing(&path).await?;
            let (offset, limit) = match view_range {
                Some([first, last]) if last >= first => (first, last - first + 1),
                Some(_) => {
                    return Err(WeftError::CapabilityValidation(
                        "view_range must be [first, last] with last >= first".into(),
                    ))
                }
                None => (1, usize::MAX),
            };
            Ok(ToolResult::success(number_lines(&content, offset, limit)))
        }
        EditorInput::StrReplace {
            path,
            old_str,
            new_str,
        } => {
            let path = resolve_path(&path, &ctx.working_dir);
            let content = read_existing(&path).await?;
            match content.matches(old_str.as_str()).count() {
                0 => Ok(ToolResult::error(format!("old_str not found in {}", path.display()))),
                1 => {
                    let updated = content.replacen(old_str.as_str(), &new_str, 1);
                    tokio::fs::write(&path, updated).await?;
                    debug!(path = %path.display(), "Replaced text");
                    Ok(ToolResult::success(format!("Edited {}", path.display())))
                }
                n => Ok(ToolResult::error(format!(
                    "old_str occurs {} times in {}; include more context to make it unique",
                    n,
                    path.display()
                ))),
            }
        }
        EditorInput::Insert {
            path,
            insert_line,
            new_str,
        } => {
            let path = resolve_path(&path, &ctx.working_dir);
            let content = read_existing(&path).await?;
            let mut lines: Vec<&str> = content.lines().collect();
            if insert_line > lines.len() {
                return Ok(ToolResult::error(format!(
                    "insert_line {} is past the end of {} ({} lines)",
                    insert_line,
                    path.display(),
                    lines.len()
                )));
            }
            lines.insert(insert_line, new_str.as_str());
            let mut updated = lines.join("\n");
            if content.ends_with('\n') || content.is_empty() {
                updated.push('\n');
            }
            tokio::fs::write(&path, updated).await?;
            Ok(ToolResult::success(format!(
                "Inserted text after line {} of {}",
                insert_line,
                path.display()
            )))
        }
    }
}

async fn read_existing(path: &std::path::Path) -> Result<String> {
    tokio::fs::read_to_string(path)
        .await
        .map_err(|e| exec_error(Builtin::Editor, format!("{}: {}", path.display(), e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use weft_core::types::SessionId;

    fn ctx(dir: &std::path::Path) -> CapabilityContext {
        CapabilityContext::new(SessionId::new(), dir.to_path_buf())
    }

    #[tokio::test]
    async fn write_then_read_relative_path() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ctx(dir.path());
        write(
            WriteInput {
                path: "notes/a.txt".into(),
                content: "one\ntwo\nthree\n".into(),
                append: false,
            },
            &ctx,
        )
        .await
        .unwrap();

        let result = read(
            ReadInput {
                path: "notes/a.txt".into(),
                offset: Some(2),
                limit: Some(1),
            },
            &ctx,
        )
        .await
        .unwrap();
        assert_eq!(result.content, "     2\ttwo\n");
    }

    #[tokio::test]
    async fn append_keeps_existing_content() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ctx(dir.path());
        for chunk in ["a", "b"] {
            write(
                WriteInput {
                    path: "log.txt".into(),
                    content: chunk.into(),
                    append: true,
                },
                &ctx,
            )
            .await
            .unwrap();
        }
        assert_eq!(std::fs::read_to_string(dir.path().join("log.txt")).unwrap(), "ab");
    }

    #[tokio::test]
    async fn str_replace_requires_unique_match() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ctx(dir.path());
        std::fs::write(dir.path().join("f.txt"), "x = 1\ny = 1\n").unwrap();

        let ambiguous = edit(
            EditorInput::StrReplace {
                path: "f.txt".into(),
                old_str: "= 1".into(),
                new_str: "= 2".into(),
            },
            &ctx,
        )
        .await
        .unwrap();
        assert!(ambiguous.is_error);

        let ok = edit(
            EditorInput::StrReplace {
                path: "f.txt".into(),
                old_str: "y = 1".into(),
                new_str: "y = 2".into(),
            },
            &ctx,
        )
        .await
        .unwrap();
        assert!(!ok.is_error);
        assert_eq!(std::fs::read_to_string(dir.path().join("f.txt")).unwrap(), "x = 1\ny = 2\n");
    }

    #[tokio::test]
    async fn insert_after_line() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ctx(dir.path());
        std::fs::write(dir.path().join("f.txt"), "a\nc\n").unwrap();
        edit(
            EditorInput::Insert {
                path: "f.txt".into(),
                insert_line: 1,
                new_str: "b".into(),
            },
            &ctx,
        )
        .await
        .unwrap();
        assert_eq!(std::fs::read_to_string(dir.path().join("f.txt")).unwrap(), "a\nb\nc\n");
    }

    #[test]
    fn editor_input_is_tagged_by_command() {
        let input: EditorInput = serde_json::from_value(serde_json::json!({
            "command": "view",
            "path": "x",
            "view_range": [1, 3]
        }))
        .unwrap();
        assert!(matches!(input, EditorInput::View { view_range: Some([1, 3]), .. }));
    }

    #[tokio::test]
    async fn missing_file_is_execution_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = read(
            ReadInput {
                path: "absent.txt".into(),
                offset: None,
                limit: None,
            },
            &ctx(dir.path()),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, WeftError::CapabilityExecution { .. }));
    }
}
