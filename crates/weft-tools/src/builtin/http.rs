use std::collections::HashMap;
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use weft_core::error::{Result, WeftError};
use weft_core::types::ToolResult;

use super::{exec_error, truncate, Builtin};

const MAX_BODY_CHARS: usize = 10_000;

#[derive(Deserialize)]
pub(super) struct HttpRequestInput {
    url: String,
    #[serde(default = "default_method")]
    method: String,
    #[serde(default)]
    headers: HashMap<String, String>,
    #[serde(default)]
    body: Option<String>,
}

fn default_method() -> String {
    "GET".into()
}

pub(super) fn schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "url": { "type": "string" },
            "method": { "type": "string", "description": "HTTP method (default: GET)" },
            "headers": { "type": "object", "description": "Request headers" },
            "body": { "type": "string", "description": "Request body" }
        },
        "required": ["url"]
    })
}

fn parse_method(method: &str) -> Result<reqwest::Method> {
    method
        .to_uppercase()
        .parse::<reqwest::Method>()
        .map_err(|e| WeftError::CapabilityValidation(format!("Invalid method: {}", e)))
}

pub(super) async fn run(input: HttpRequestInput) -> Result<ToolResult> {
    let method = parse_method(&input.method)?;
    debug!(url = %input.url, %method, "HTTP request");

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()
        .map_err(|e| exec_error(Builtin::HttpRequest, e.to_string()))?;

    let mut req = client.request(method, &input.url);
    for (k, v) in &input.headers {
        req = req.header(k.as_str(), v.as_str());
    }
    if let Some(body) = input.body {
        req = req.body(body);
    }

    let resp = req
        .send()
        .await
        .map_err(|e| exec_error(Builtin::HttpRequest, e.to_string()))?;
    let status = resp.status();
    let headers = resp
        .headers()
        .iter()
        .map(|(k, v)| format!("{}: {}", k, v.to_str().unwrap_or("?")))
        .collect::<Vec<_>>()
        .join("\n");
    let body = resp.text().await.unwrap_or_default();

    let content = format!(
        "HTTP {} {}\n\n{}\n\n{}",
        status.as_u16(),
        status.canonical_reason().unwrap_or(""),
        headers,
        truncate(body, MAX_BODY_CHARS)
    );
    if status.is_client_error() || status.is_server_error() {
        Ok(ToolResult::error(content))
    } else {
        Ok(ToolResult::success(content))
    }
}
