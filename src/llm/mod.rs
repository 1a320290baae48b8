// src/llm/mod.rs
pub mod client;
pub mod models;

use std::future::Future;

use crate::utils::error::GenerationError;

pub use client::OllamaClient;

/// The external text-generation service. Replies are free-form text with no
/// guarantee of following the requested format.
pub trait TextGenerator {
    /// Generates a reply for `prompt`; `context` is the source excerpt the prompt is about.
    fn generate(
        &self,
        prompt: &str,
        context: &str,
    ) -> impl Future<Output = Result<String, GenerationError>> + Send;
}

/// Runs one generation call bounded by `timeout`; expiry is reported as a service failure.
pub async fn generate_within<G: TextGenerator>(
    generator: &G,
    prompt: &str,
    context: &str,
    timeout: std::time::Duration,
) -> Result<String, GenerationError> {
    match tokio::time::timeout(timeout, generator.generate(prompt, context)).await {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!("Text generation did not answer within {:?}", timeout);
            Err(GenerationError::Timeout(timeout))
        }
    }
}
