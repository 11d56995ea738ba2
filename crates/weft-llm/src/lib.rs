pub mod providers;
pub mod retry;
pub mod streaming;

use std::sync::Arc;

use weft_core::config::ModelConfig;
use weft_core::traits::LlmClient;

pub use providers::anthropic::AnthropicClient;
pub use providers::openai::OpenAiClient;
pub use retry::RetryingClient;

/// Create an LLM client for the configured provider, wrapped in
/// [`RetryingClient`] when `[model.retry]` is present.
pub fn create_client(config: &ModelConfig) -> Arc<dyn LlmClient> {
    let client: Box<dyn LlmClient> = match config.provider.as_str() {
        "anthropic" | "claude" => Box::new(AnthropicClient::new()),
        // Everything else speaks the OpenAI chat completions dialect
        _ => Box::new(OpenAiClient::new()),
    };

    match &config.retry {
        Some(retry) => Arc::new(RetryingClient::new(client, retry.clone())),
        None => Arc::from(client),
    }
}
