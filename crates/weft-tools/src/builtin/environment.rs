use serde::Deserialize;
use serde_json::Value;

use weft_core::error::Result;
use weft_core::types::ToolResult;

const MAX_LISTED: usize = 100;
const SECRET_MARKERS: [&str; 6] = ["KEY", "SECRET", "TOKEN", "PASSWORD", "CREDENTIAL", "AUTH"];

#[derive(Deserialize)]
pub(super) struct EnvironmentInput {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    prefix: Option<String>,
}

pub(super) fn schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "name": { "type": "string", "description": "Variable name. Omit to list variables." },
            "prefix": { "type": "string", "description": "When listing, only include names with this prefix" }
        }
    })
}

pub(super) fn run(input: EnvironmentInput) -> Result<ToolResult> {
    if let Some(name) = input.name {
        return Ok(match std::env::var(&name) {
            Ok(val) => ToolResult::success(format!("{}={}", name, display_value(&name, &val))),
            Err(_) => ToolResult::error(format!("'{}' is not set", name)),
        });
    }

    let prefix = input.prefix.unwrap_or_default();
    let mut vars: Vec<_> = std::env::vars()
        .filter(|(k, _)| k.starts_with(&prefix))
        .collect();
    vars.sort_by(|a, b| a.0.cmp(&b.0));
    let output = vars
        .into_iter()
        .take(MAX_LISTED)
        .map(|(k, v)| format!("{}={}", k, display_value(&k, &v)))
        .collect::<Vec<_>>()
        .join("\n");
    Ok(ToolResult::success(output))
}

fn is_secret(name: &str) -> bool {
    let upper = name.to_ascii_uppercase();
    SECRET_MARKERS.iter().any(|m| upper.contains(m))
}

fn display_value<'a>(name: &str, value: &'a str) -> &'a str {
    if is_secret(name) && !value.is_empty() {
        "****"
    } else {
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secrets_are_masked() {
        assert_eq!(display_value("ANTHROPIC_API_KEY", "sk-123"), "****");
        assert_eq!(display_value("github_token", "ghp"), "****");
        assert_eq!(display_value("HOME", "/root"), "/root");
    }

    #[test]
    fn unset_variable_is_error_result() {
        let result = run(EnvironmentInput {
            name: Some("WEFT_TEST_SURELY_UNSET_VAR".into()),
            prefix: None,
        })
        .unwrap();
        assert!(result.is_error);
    }

    #[test]
    fn reads_path() {
        let result = run(EnvironmentInput {
            name: Some("PATH".into()),
            prefix: None,
        })
        .unwrap();
        assert!(result.content.starts_with("PATH="));
    }
}
