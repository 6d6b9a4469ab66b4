//! OpenAI Client
//!
//! Language model implementation for the OpenAI chat completions API.

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::{classify_failure, ModelError};
use crate::language_model::{GenerateRequest, LanguageModel, ResponseFormat};

/// Default OpenAI model
const DEFAULT_MODEL: &str = "gpt-4o";

const COMPLETIONS_URL: &str = "https://api.openai.com/v1/chat/completions";

/// OpenAI API client
#[derive(Clone)]
pub struct OpenAiClient {
    api_key: String,
    client: reqwest::Client,
    model: String,
}

impl OpenAiClient {
    /// Create a new OpenAI client with the given API key
    pub fn new(api_key: String) -> Self {
        let model = std::env::var("OPENAI_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string());
        Self {
            api_key,
            client: reqwest::Client::new(),
            model,
        }
    }

    /// Create with a specific model
    pub fn with_model(api_key: String, model: &str) -> Self {
        Self {
            api_key,
            client: reqwest::Client::new(),
            model: model.to_string(),
        }
    }

    /// Create from environment variables
    pub fn from_env() -> Result<Self, ModelError> {
        let api_key = std::env::var("OPENAI_API_KEY").map_err(|_| {
            ModelError::new(
                crate::ModelErrorKind::Auth,
                "OPENAI_API_KEY environment variable not set",
            )
        })?;
        Ok(Self::new(api_key))
    }

    fn request_body(&self, request: &GenerateRequest) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": &self.model,
            "messages": [
                {"role": "system", "content": &request.system_prompt},
                {"role": "user", "content": &request.prompt}
            ],
            "max_tokens": request.max_tokens,
            "temperature": 0.1
        });

        if request.response_format == ResponseFormat::Json {
            body["response_format"] = serde_json::json!({"type": "json_object"});
        }
        body
    }
}

#[async_trait]
impl LanguageModel for OpenAiClient {
    async fn generate(&self, request: &GenerateRequest) -> Result<String, ModelError> {
        let response = self
            .client
            .post(COMPLETIONS_URL)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&self.request_body(request))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let kind = classify_failure(Some(status.as_u16()), &body);
            tracing::warn!(%status, kind = %kind, "OpenAI API error");
            return Err(ModelError::new(
                kind,
                format!("OpenAI API error {}: {}", status, body),
            ));
        }

        #[derive(Deserialize)]
        struct Message {
            content: Option<String>,
        }
        #[derive(Deserialize)]
        struct Choice {
            message: Message,
        }
        #[derive(Deserialize)]
        struct ApiResponse {
            choices: Vec<Choice>,
        }

        let response_text = response.text().await?;
        tracing::debug!(
            "OpenAI raw response: {}",
            response_text.chars().take(1000).collect::<String>()
        );

        let api_response: ApiResponse = serde_json::from_str(&response_text)
            .map_err(|e| ModelError::other(format!("Failed to parse OpenAI response: {}", e)))?;

        api_response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| ModelError::other("OpenAI returned no choices"))
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn provider_name(&self) -> &str {
        "OpenAI"
    }
}
