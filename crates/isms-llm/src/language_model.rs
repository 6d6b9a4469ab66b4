//! Language Model Trait
//!
//! Unified interface for the hosted model used by the intent router and
//! the reasoning loop.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ModelError;

/// Requested shape of the model's answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ResponseFormat {
    #[default]
    Text,
    /// Provider-side JSON mode where supported.
    Json,
}

/// A single generation call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateRequest {
    pub prompt: String,
    pub system_prompt: String,
    pub max_tokens: u32,
    #[serde(default)]
    pub response_format: ResponseFormat,
}

impl GenerateRequest {
    pub fn new(system_prompt: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            system_prompt: system_prompt.into(),
            max_tokens: 1024,
            response_format: ResponseFormat::Text,
        }
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn json(mut self) -> Self {
        self.response_format = ResponseFormat::Json;
        self
    }
}

/// Hosted language model.
///
/// Implementations own their own timeouts; the engine never retries a call.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Generate a completion for the request.
    async fn generate(&self, request: &GenerateRequest) -> Result<String, ModelError>;

    /// Get the model name for logging
    fn model_name(&self) -> &str;

    /// Get the provider name for logging
    fn provider_name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_builder() {
        let req = GenerateRequest::new("sys", "user").max_tokens(256).json();
        assert_eq!(req.max_tokens, 256);
        assert_eq!(req.response_format, ResponseFormat::Json);
        assert_eq!(req.system_prompt, "sys");
    }

    #[test]
    fn test_response_format_defaults_to_text() {
        let req: GenerateRequest =
            serde_json::from_str(r#"{"prompt":"p","system_prompt":"s","max_tokens":5}"#).unwrap();
        assert_eq!(req.response_format, ResponseFormat::Text);
    }
}
