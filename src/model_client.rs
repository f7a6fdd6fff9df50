//! Ollama-backed extraction model.
//!
//! Sends the extraction prompt to `POST {url}/api/chat` with JSON output
//! mode enabled and validates the reply with
//! [`parse_model_content`](receipt_trace_core::extraction::parse_model_content).
//!
//! Each call is exactly one HTTP request. Timeouts and retries are applied
//! by the pipeline around [`ExtractionModel::extract`].

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use receipt_trace_core::error::ExtractionError;
use receipt_trace_core::extraction::{
    build_prompt, parse_model_content, ExtractionModel, ModelResponse,
};
use receipt_trace_core::models::RuleCandidate;

use crate::config::ModelConfig;

/// Ollama chat client for receipt extraction.
pub struct OllamaExtractor {
    client: Client,
    base_url: String,
    model: String,
    temperature: f32,
}

impl OllamaExtractor {
    pub fn new(config: &ModelConfig) -> Self {
        Self {
            client: Client::new(),
            base_url: config.url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            temperature: config.temperature,
        }
    }
}

#[derive(Serialize)]
struct OllamaChatRequest<'a> {
    model: &'a str,
    messages: Vec<OllamaChatMessage>,
    stream: bool,
    format: &'static str,
    options: OllamaOptions,
}

#[derive(Serialize)]
struct OllamaOptions {
    temperature: f32,
}

#[derive(Serialize, Deserialize)]
struct OllamaChatMessage {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct OllamaChatResponse {
    message: OllamaChatMessage,
}

#[async_trait]
impl ExtractionModel for OllamaExtractor {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn extract(
        &self,
        ocr_text: &str,
        candidates: &[RuleCandidate],
    ) -> Result<ModelResponse, ExtractionError> {
        let prompt = build_prompt(ocr_text, candidates);
        let body = OllamaChatRequest {
            model: &self.model,
            messages: vec![
                OllamaChatMessage {
                    role: "system".to_string(),
                    content: prompt.system,
                },
                OllamaChatMessage {
                    role: "user".to_string(),
                    content: prompt.user,
                },
            ],
            stream: false,
            format: "json",
            options: OllamaOptions {
                temperature: self.temperature,
            },
        };

        debug!(model = %self.model, candidates = candidates.len(), "Sending request to Ollama");

        let response = self
            .client
            .post(format!("{}/api/chat", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                ExtractionError::ServiceUnavailable(format!("Ollama request failed: {}", e))
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            return Err(ExtractionError::ServiceUnavailable(format!(
                "Ollama returned {}: {}",
                status,
                error_body.trim()
            )));
        }

        let text = response.text().await.map_err(|e| {
            ExtractionError::ServiceUnavailable(format!("failed to read Ollama response: {}", e))
        })?;
        let envelope: OllamaChatResponse = serde_json::from_str(&text).map_err(|e| {
            ExtractionError::Parse(format!("unexpected Ollama response envelope: {}", e))
        })?;

        debug!(bytes = envelope.message.content.len(), "Ollama replied");
        parse_model_content(&envelope.message.content)
    }
}
