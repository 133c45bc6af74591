use std::time::Duration;

use futures::future::BoxFuture;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use tandem_core::config::ModelConfig;
use tandem_core::error::{Result, TandemError};
use tandem_core::traits::InferenceClient;
use tandem_core::types::{InferenceRequest, InferenceResult};

const OPENAI_API_URL: &str = "https://api.openai.com/v1/chat/completions";

/// Accept either a full endpoint or an API root like `https://host/v1`.
fn endpoint(base_url: Option<&str>) -> String {
    match base_url {
        None => OPENAI_API_URL.to_string(),
        Some(url) if url.ends_with("/chat/completions") => url.to_string(),
        Some(url) => format!("{}/chat/completions", url.trim_end_matches('/')),
    }
}

/// OpenAI-compatible client. Works with OpenAI, Ollama, vLLM, Groq, OpenRouter, etc.
pub struct OpenAiClient {
    http: Client,
    config: ModelConfig,
}

impl OpenAiClient {
    pub fn new(config: ModelConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| TandemError::Inference(e.to_string()))?;
        Ok(Self { http, config })
    }
}

// Request types
#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<OaiMessage>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<serde_json::Value>,
}

#[derive(Serialize)]
struct OaiMessage {
    role: &'static str,
    content: String,
}

// Response types
#[derive(Deserialize, Debug)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize, Debug)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize, Debug)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

fn build_request(config: &ModelConfig, request: &InferenceRequest) -> ChatRequest {
    let response_format = request.output_shape.as_ref().map(|schema| {
        serde_json::json!({
            "type": "json_schema",
            "json_schema": {
                "name": "output",
                "schema": schema,
            }
        })
    });

    ChatRequest {
        model: config.model_id.clone(),
        messages: vec![
            OaiMessage {
                role: "system",
                content: request.instruction.clone(),
            },
            OaiMessage {
                role: "user",
                content: request.input.clone(),
            },
        ],
        max_tokens: config.max_tokens,
        temperature: if config.temperature > 0.0 {
            Some(config.temperature)
        } else {
            None
        },
        response_format,
    }
}

fn parse_response(body: &str, structured: bool) -> Result<InferenceResult> {
    let response: ChatResponse = serde_json::from_str(body)
        .map_err(|e| TandemError::Inference(format!("malformed response: {}", e)))?;
    let content = response
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .ok_or_else(|| TandemError::Inference("response has no content".into()))?;

    if structured {
        let value = serde_json::from_str(&content).map_err(|e| {
            TandemError::Inference(format!("structured output is not valid JSON: {}", e))
        })?;
        Ok(InferenceResult::Structured(value))
    } else {
        Ok(InferenceResult::Text(content))
    }
}

impl InferenceClient for OpenAiClient {
    fn infer(&self, request: InferenceRequest) -> BoxFuture<'_, Result<InferenceResult>> {
        Box::pin(async move {
            let url = endpoint(self.config.base_url.as_deref());
            let body = build_request(&self.config, &request);

            let mut req = self.http.post(&url).json(&body);
            if let Some(api_key) = &self.config.api_key {
                req = req.header("Authorization", format!("Bearer {}", api_key));
            }

            debug!(model = %self.config.model_id, structured = request.output_shape.is_some(), "Sending inference request");
            let response = req
                .send()
                .await
                .map_err(|e| TandemError::Inference(e.to_string()))?;

            let status = response.status();
            let text = response
                .text()
                .await
                .map_err(|e| TandemError::Inference(e.to_string()))?;
            if !status.is_success() {
                return Err(TandemError::Inference(format!("HTTP {}: {}", status, text)));
            }

            parse_response(&text, request.output_shape.is_some())
        })
    }
}
