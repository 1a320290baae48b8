// src/llm/client.rs
use reqwest::header;
use std::time::Duration;

use crate::llm::models::{GenerateOptions, GenerateRequest, GenerateResponse};
use crate::llm::TextGenerator;
use crate::utils::error::GenerationError;

pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";
pub const DEFAULT_MODEL: &str = "llama3";

/// Ollama HTTP client for the evaluation model.
pub struct OllamaClient {
    base_url: String,
    model: String,
    client: reqwest::Client,
}

impl OllamaClient {
    /// Creates a client; `timeout` bounds every request at the transport level.
    pub fn new(base_url: &str, model: &str, timeout: Duration) -> Result<Self, GenerationError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()?; // Propagate client build error if any

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            client,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

/// Appends the context excerpt unless the prompt already embeds it.
fn compose_prompt(prompt: &str, context: &str) -> String {
    let context = context.trim();
    if context.is_empty() || prompt.contains(context) {
        prompt.to_string()
    } else {
        format!("{}\n\nContext:\n{}", prompt, context)
    }
}

impl TextGenerator for OllamaClient {
    async fn generate(&self, prompt: &str, context: &str) -> Result<String, GenerationError> {
        let url = format!("{}/api/generate", self.base_url);
        let prompt = compose_prompt(prompt, context);
        let body = GenerateRequest {
            model: &self.model,
            prompt: &prompt,
            stream: false,
            options: GenerateOptions { temperature: 0.0 },
        };

        tracing::debug!("Sending {} byte prompt to {} ({})", prompt.len(), url, self.model);

        let response = self
            .client
            .post(&url)
            .header(header::ACCEPT, "application/json")
            .json(&body)
            .send()
            .await?; // Propagates reqwest::Error as GenerationError::Network

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!("HTTP error status: {} from {}", status, url);
            return Err(GenerationError::Http { status, body });
        }

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| GenerationError::Parse(e.to_string()))?;
        tracing::debug!("Received {} byte reply (done: {})", parsed.response.len(), parsed.done);

        Ok(parsed.response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_is_not_repeated_when_embedded() {
        let prompt = "Grade this:\n\"\"\"\nTimeline text\n\"\"\"";
        assert_eq!(compose_prompt(prompt, "Timeline text"), prompt);
        assert_eq!(compose_prompt("Fix this", ""), "Fix this");
        assert_eq!(
            compose_prompt("Fix this", " {broken "),
            "Fix this\n\nContext:\n{broken"
        );
    }

    #[test]
    fn base_url_is_normalized() {
        let client = OllamaClient::new("http://localhost:11434/", DEFAULT_MODEL, Duration::from_secs(5)).unwrap();
        assert_eq!(client.base_url, "http://localhost:11434");
        assert_eq!(client.model(), "llama3");
    }

    #[tokio::test]
    async fn unreachable_service_is_a_network_error() {
        // Port 9 (discard) is not an Ollama endpoint on test machines
        let client = OllamaClient::new("http://127.0.0.1:9", DEFAULT_MODEL, Duration::from_secs(2)).unwrap();
        let err = client.generate("prompt", "").await.unwrap_err();
        assert!(matches!(err, GenerationError::Network(_)), "{:?}", err);
    }
}
