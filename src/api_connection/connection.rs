use dotenv::dotenv;
use reqwest::Client;
use serde_json::json;
use std::env;
use thiserror::Error;

use super::endpoints::{ChatCompletionRequest, ChatCompletionResponse, Provider, OPENROUTER_BASE_URL};
use crate::config::AgentConfig;

#[derive(Debug, Error)]
pub enum ApiConnectionError {
    #[error("API key not found in environment: {0}")]
    MissingApiKey(String),
    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
    #[error("API error {status}: {error_body}")]
    ApiError {
        status: reqwest::StatusCode,
        error_body: String,
    },
    #[error("API returned no choices")]
    EmptyResponse,
}

impl Provider {
    pub fn openrouter(api_key_env_var_name: &str) -> Self {
        dotenv().ok();
        Self::OpenRouter {
            client: Client::new(),
            api_key: api_key_env_var_name.to_string(),
            base_url: OPENROUTER_BASE_URL.to_string(),
            provider_only: vec!["Cerebras".to_string()],
        }
    }

    pub fn from_agent_config(config: &AgentConfig) -> Self {
        dotenv().ok();
        Self::OpenRouter {
            client: Client::new(),
            api_key: config.api_key_env_var.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            provider_only: config.provider_only.clone(),
        }
    }

    pub async fn call_chat_completion(
        &self,
        request: ChatCompletionRequest,
    ) -> Result<ChatCompletionResponse, ApiConnectionError> {
        match self {
            Provider::OpenRouter {
                client,
                api_key: api_key_env_var_name,
                base_url,
                provider_only,
                ..
            } => {
                let actual_api_key = env::var(api_key_env_var_name)
                    .map_err(|_| ApiConnectionError::MissingApiKey(api_key_env_var_name.clone()))?;

                let url = format!("{}/chat/completions", base_url);

                let mut request_payload = serde_json::to_value(&request)?;
                if !provider_only.is_empty() {
                    if let Some(obj) = request_payload.as_object_mut() {
                        obj.insert("provider".to_string(), json!({ "only": provider_only }));
                    }
                }

                let site_url = env::var("SITE_URL").unwrap_or_else(|_| "http://localhost:3000".to_string());
                let app_name = env::var("APP_NAME").unwrap_or_else(|_| "RecipeRebalance".to_string());

                tracing::debug!(model = %request.model, %url, "Sending chat completion request");
                let response = client
                    .post(&url)
                    .bearer_auth(actual_api_key)
                    .header("Content-Type", "application/json")
                    .header("HTTP-Referer", site_url)
                    .header("X-Title", app_name)
                    .json(&request_payload)
                    .send()
                    .await?;

                if response.status().is_success() {
                    let chat_response = response.json::<ChatCompletionResponse>().await?;
                    if chat_response.choices.is_empty() {
                        return Err(ApiConnectionError::EmptyResponse);
                    }
                    Ok(chat_response)
                } else {
                    let status = response.status();
                    let error_body = response
                        .text()
                        .await
                        .unwrap_or_else(|_| "Failed to read error body".to_string());
                    Err(ApiConnectionError::ApiError { status, error_body })
                }
            }
        }
    }
}
