//! Gemini API client
//!
//! Serves as the reasoning oracle (generateContent) and the embedder for
//! similarity retrieval (embedContent). Uses a long-lived reqwest::Client
//! for connection pooling and keeps cumulative token usage.

use crate::error::PipelineError;
use crate::oracle::{Prompt, ReasoningOracle};
use crate::retrieval::Embedder;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{error, info};

const API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";
pub const DEFAULT_MODEL: &str = "gemini-2.0-flash";
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-004";

/// Cumulative token counts across all calls made by one client.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TokenUsage {
    pub calls: u64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

impl TokenUsage {
    pub fn total_tokens(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }
}

/// Reusable Gemini client (connection-pooled)
pub struct GeminiClient {
    client: Client,
    api_key: String,
    model: String,
    embedding_model: String,
    calls: AtomicU64,
    prompt_tokens: AtomicU64,
    completion_tokens: AtomicU64,
}

impl GeminiClient {
    pub fn new(api_key: String) -> crate::Result<Self> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(8)
            .build()?;

        Ok(Self {
            client,
            api_key,
            model: DEFAULT_MODEL.to_string(),
            embedding_model: DEFAULT_EMBEDDING_MODEL.to_string(),
            calls: AtomicU64::new(0),
            prompt_tokens: AtomicU64::new(0),
            completion_tokens: AtomicU64::new(0),
        })
    }

    pub fn with_model(mut self, model: &str) -> Self {
        self.model = model.to_string();
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn usage(&self) -> TokenUsage {
        TokenUsage {
            calls: self.calls.load(Ordering::Relaxed),
            prompt_tokens: self.prompt_tokens.load(Ordering::Relaxed),
            completion_tokens: self.completion_tokens.load(Ordering::Relaxed),
        }
    }

    fn ensure_key(&self) -> crate::Result<()> {
        if self.api_key.is_empty() {
            return Err(PipelineError::Config(
                "GEMINI_API_KEY not configured".to_string(),
            ));
        }
        Ok(())
    }

    fn record_usage(&self, stage: &str, usage: Option<&UsageMetadata>) {
        self.calls.fetch_add(1, Ordering::Relaxed);
        let Some(usage) = usage else {
            return;
        };
        self.prompt_tokens
            .fetch_add(usage.prompt_token_count, Ordering::Relaxed);
        self.completion_tokens
            .fetch_add(usage.candidates_token_count, Ordering::Relaxed);

        info!(
            stage,
            model = %self.model,
            prompt_tokens = usage.prompt_token_count,
            completion_tokens = usage.candidates_token_count,
            "Gemini token usage"
        );
    }

    /// Generate a completion for one prompt
    pub async fn generate(&self, prompt: &Prompt) -> crate::Result<String> {
        self.ensure_key()?;

        let url = format!(
            "{}/{}:generateContent?key={}",
            API_BASE, self.model, self.api_key
        );

        let request = GeminiRequest {
            contents: vec![Content {
                parts: vec![Part {
                    text: prompt.user.clone(),
                }],
            }],
            generation_config: GenerationConfig {
                temperature: 0.2,
                top_p: 0.9,
                top_k: 40,
                max_output_tokens: 4096,
            },
            system_instruction: SystemInstruction {
                parts: vec![Part {
                    text: prompt.system.clone(),
                }],
            },
        };

        info!(stage = %prompt.stage, "Calling Gemini API");

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                error!("Gemini API request failed: {}", e);
                PipelineError::Reasoning(format!("Gemini API error: {}", e))
            })?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            error!("Gemini API error response: {}", error_text);
            return Err(PipelineError::Reasoning(format!(
                "Gemini API error: {}",
                error_text
            )));
        }

        let gemini_response: GeminiResponse = response.json().await.map_err(|e| {
            error!("Failed to parse Gemini response: {}", e);
            PipelineError::Reasoning(format!("Gemini parse error: {}", e))
        })?;

        self.record_usage(prompt.stage.as_str(), gemini_response.usage_metadata.as_ref());

        let text = gemini_response
            .candidates
            .first()
            .map(|candidate| {
                candidate
                    .content
                    .parts
                    .iter()
                    .map(|p| p.text.as_str())
                    .collect::<Vec<_>>()
                    .join("")
            })
            .filter(|text| !text.trim().is_empty())
            .ok_or_else(|| PipelineError::Reasoning("Empty response from Gemini".to_string()))?;

        Ok(text)
    }

    /// Embed text with the embedding model
    pub async fn embed_text(&self, text: &str) -> crate::Result<Vec<f32>> {
        self.ensure_key()?;

        let url = format!(
            "{}/{}:embedContent?key={}",
            API_BASE, self.embedding_model, self.api_key
        );
        let request = EmbedRequest {
            model: format!("models/{}", self.embedding_model),
            content: Content {
                parts: vec![Part {
                    text: text.to_string(),
                }],
            },
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| PipelineError::Retrieval(format!("Gemini embedding error: {}", e)))?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(PipelineError::Retrieval(format!(
                "Gemini embedding error: {}",
                error_text
            )));
        }

        let parsed: EmbedResponse = response
            .json()
            .await
            .map_err(|e| PipelineError::Retrieval(format!("Gemini embedding parse error: {}", e)))?;

        Ok(parsed.embedding.values)
    }
}

#[async_trait]
impl ReasoningOracle for GeminiClient {
    async fn complete(&self, prompt: &Prompt) -> crate::Result<String> {
        self.generate(prompt).await
    }
}

#[async_trait]
impl Embedder for GeminiClient {
    async fn embed(&self, text: &str) -> crate::Result<Vec<f32>> {
        self.embed_text(text).await
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
    system_instruction: SystemInstruction,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    top_p: f32,
    top_k: i32,
    max_output_tokens: i32,
}

#[derive(Debug, Serialize)]
struct SystemInstruction {
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Content,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u64,
    #[serde(default)]
    candidates_token_count: u64,
}

#[derive(Debug, Serialize)]
struct EmbedRequest {
    model: String,
    content: Content,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embedding: EmbeddingValues,
}

#[derive(Debug, Deserialize)]
struct EmbeddingValues {
    values: Vec<f32>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::Stage;

    #[test]
    fn test_request_serialization() {
        let request = GeminiRequest {
            contents: vec![Content {
                parts: vec![Part {
                    text: "Assess this applicant".to_string(),
                }],
            }],
            generation_config: GenerationConfig {
                temperature: 0.2,
                top_p: 0.9,
                top_k: 40,
                max_output_tokens: 4096,
            },
            system_instruction: SystemInstruction {
                parts: vec![Part {
                    text: "You are a loan evaluator".to_string(),
                }],
            },
        };

        let json = serde_json::to_string(&request).unwrap();
        assert!(json.contains("Assess this applicant"));
        assert!(json.contains("generationConfig"));
        assert!(json.contains("maxOutputTokens"));
    }

    #[test]
    fn test_response_usage_parsing() {
        let response: GeminiResponse = serde_json::from_value(serde_json::json!({
            "candidates": [{"content": {"parts": [{"text": "{\"action\": \"approve\"}"}]}}],
            "usageMetadata": {"promptTokenCount": 120, "candidatesTokenCount": 30}
        }))
        .unwrap();

        let client = GeminiClient::new("key".to_string()).unwrap();
        client.record_usage("evaluator", response.usage_metadata.as_ref());
        client.record_usage("report", None);

        let usage = client.usage();
        assert_eq!(usage.calls, 2);
        assert_eq!(usage.prompt_tokens, 120);
        assert_eq!(usage.total_tokens(), 150);
    }

    #[test]
    fn test_model_override() {
        let client = GeminiClient::new("key".to_string()).unwrap();
        assert_eq!(client.model(), DEFAULT_MODEL);

        let client = client.with_model("gemini-1.5-pro");
        assert_eq!(client.model(), "gemini-1.5-pro");
    }

    #[tokio::test]
    async fn test_missing_key_is_config_error() {
        let client = GeminiClient::new(String::new()).unwrap();
        let prompt = Prompt {
            stage: Stage::Report,
            system: String::new(),
            user: "hi".to_string(),
        };
        let err = client.complete(&prompt).await.unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));
    }
}
