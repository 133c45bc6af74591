pub mod openai;
pub mod retry;

use std::sync::Arc;

use tandem_core::config::ModelConfig;
use tandem_core::error::{Result, TandemError};
use tandem_core::traits::InferenceClient;

pub use openai::OpenAiClient;
pub use retry::RetryingClient;

/// Create an inference client based on the provider name, wrapped in a
/// retrying client when `[model.retry]` is configured.
pub fn create_client(config: &ModelConfig) -> Result<Arc<dyn InferenceClient>> {
    let client: Arc<dyn InferenceClient> = match config.provider.as_str() {
        "openai" | "ollama" | "groq" | "openrouter" | "vllm" => {
            Arc::new(OpenAiClient::new(config.clone())?)
        }
        other => {
            return Err(TandemError::Config(format!(
                "unsupported model provider: {}",
                other
            )))
        }
    };

    Ok(match &config.retry {
        Some(retry) => Arc::new(RetryingClient::new(client, retry.clone())),
        None => client,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(provider: &str) -> ModelConfig {
        ModelConfig {
            provider: provider.into(),
            model_id: "m".into(),
            base_url: Some("http://localhost:11434/v1/chat/completions".into()),
            api_key: None,
            max_tokens: 64,
            temperature: 0.0,
            timeout_secs: 5,
            retry: None,
        }
    }

    #[test]
    fn test_known_provider_builds() {
        assert!(create_client(&config("ollama")).is_ok());
    }

    #[test]
    fn test_unknown_provider_rejected() {
        let err = create_client(&config("carrier-pigeon")).err().unwrap();
        assert!(matches!(err, TandemError::Config(_)));
    }
}
