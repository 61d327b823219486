// src/gemini.rs
// Generative API client - pluggable provider behind a trait.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::config::CredentialSource;
use crate::error::ServiceError;

/// One free-text generation: a system instruction plus a user part.
/// `json_array_output` constrains the response to a JSON array of strings
/// (the suggested-questions call shape).
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub system: String,
    pub user: String,
    pub json_array_output: bool,
}

/// Generative provider trait - implement this to swap the remote model.
#[async_trait]
pub trait GenerativeProvider: Send + Sync {
    async fn generate(&self, request: GenerationRequest) -> Result<String, ServiceError>;
    fn model_name(&self) -> &str;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<Content>,
    system_instruction: Content,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<Value>,
}

#[derive(Serialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Serialize)]
struct Part {
    text: String,
}

#[derive(Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

impl GeminiResponse {
    /// The one text field everything hangs off:
    /// `candidates[0].content.parts[0].text`.
    fn first_text(self) -> Option<String> {
        self.candidates
            .into_iter()
            .next()?
            .content?
            .parts
            .into_iter()
            .next()?
            .text
    }
}

pub struct GeminiClient {
    credentials: Arc<dyn CredentialSource>,
    model: String,
    client: reqwest::Client,
}

impl GeminiClient {
    pub fn new(credentials: Arc<dyn CredentialSource>, model: impl Into<String>) -> Self {
        Self {
            credentials,
            model: model.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl GenerativeProvider for GeminiClient {
    async fn generate(&self, request: GenerationRequest) -> Result<String, ServiceError> {
        debug!(
            model = %self.model,
            user_len = request.user.len(),
            constrained = request.json_array_output,
            "Generating"
        );

        let generation_config = request.json_array_output.then(|| {
            json!({
                "responseMimeType": "application/json",
                "responseSchema": { "type": "ARRAY", "items": { "type": "STRING" } }
            })
        });
        let payload = GeminiRequest {
            contents: vec![Content {
                parts: vec![Part { text: request.user }],
            }],
            system_instruction: Content {
                parts: vec![Part {
                    text: request.system,
                }],
            },
            generation_config,
        };

        let url = self.credentials.endpoint(&self.model);
        let response = self.client.post(&url).json(&payload).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ServiceError::from_status(status.as_u16()));
        }

        let parsed: GeminiResponse = response
            .json()
            .await
            .map_err(|e| ServiceError::Malformed(e.to_string()))?;
        let text = parsed
            .first_text()
            .ok_or_else(|| ServiceError::Malformed("no content in API response".to_string()))?;

        info!(model = %self.model, response_len = text.len(), "Generation complete");
        Ok(text)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StaticCredentialSource;

    #[test]
    fn test_client_creation() {
        let creds = Arc::new(StaticCredentialSource {
            key: "k".to_string(),
            base_url: "https://example.test".to_string(),
        });
        let client = GeminiClient::new(creds, "gemini-2.5-flash-preview-05-20");
        assert_eq!(client.model_name(), "gemini-2.5-flash-preview-05-20");
    }

    #[test]
    fn test_response_text_extraction() {
        let raw = serde_json::json!({
            "candidates": [
                { "content": { "parts": [ { "text": "Three questions" } ] } }
            ]
        });
        let parsed: GeminiResponse = serde_json::from_value(raw).unwrap();
        assert_eq!(parsed.first_text().as_deref(), Some("Three questions"));
    }

    #[test]
    fn test_response_missing_text_is_none() {
        let empty: GeminiResponse = serde_json::from_value(serde_json::json!({})).unwrap();
        assert!(empty.first_text().is_none());

        let no_parts: GeminiResponse = serde_json::from_value(serde_json::json!({
            "candidates": [ { "content": { "parts": [] } } ]
        }))
        .unwrap();
        assert!(no_parts.first_text().is_none());
    }

    #[test]
    fn test_request_serialization_shape() {
        let payload = GeminiRequest {
            contents: vec![Content {
                parts: vec![Part {
                    text: "question".to_string(),
                }],
            }],
            system_instruction: Content {
                parts: vec![Part {
                    text: "system".to_string(),
                }],
            },
            generation_config: None,
        };
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value["contents"][0]["parts"][0]["text"], "question");
        assert_eq!(value["systemInstruction"]["parts"][0]["text"], "system");
        assert!(value.get("generationConfig").is_none());
    }
}
