pub mod anthropic;
pub mod openai;

pub use anthropic::AnthropicClient;
pub use openai::OpenAiClient;

/// Read a failed response into an `LlmRequest` error carrying the status.
pub(crate) async fn status_error(response: reqwest::Response) -> weft_core::WeftError {
    let status = response.status();
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "unknown error".to_string());
    weft_core::WeftError::LlmRequest(format!("HTTP {}: {}", status, body))
}
