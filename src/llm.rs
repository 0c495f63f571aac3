//! Generative Text Capability
//!
//! Provider-agnostic seam for the text-generation collaborator. Pipeline
//! logic only ever sees the `TextGenerator` trait; the concrete provider
//! (served by the llm-sidecar) is an implementation detail queryable for
//! telemetry but never used for routing decisions.

use crate::error::{InsightsError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratorIdentity {
    pub provider: String,
    pub model: String,
}

#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Free-form completion. Returns the raw content string.
    async fn generate(&self, prompt: &str, max_tokens: u32) -> Result<String>;

    /// SQL-specialized completion. Providers that expose a dedicated SQL
    /// endpoint may override; the default is the plain completion call.
    async fn generate_sql(&self, prompt: &str, max_tokens: u32) -> Result<String> {
        self.generate(prompt, max_tokens).await
    }

    fn identity(&self) -> GeneratorIdentity;
}

/// HTTP client for the llm-sidecar `/v1/chat` endpoint.
pub struct SidecarClient {
    http: reqwest::Client,
    base_url: String,
    api_secret: Option<String>,
    model: String,
    provider: String,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    system: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f64,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    content: String,
}

const SYSTEM_PROMPT: &str =
    "You are a precise assistant for a medical laboratory analytics system. \
     Follow the instructions in the prompt exactly and return only the requested output.";

impl SidecarClient {
    pub fn new(base_url: String, api_secret: Option<String>, model: String, provider: String) -> Self {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .unwrap_or_default();
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_secret,
            model,
            provider,
        }
    }

    async fn chat(&self, prompt: &str, max_tokens: u32) -> Result<String> {
        let body = ChatRequest {
            model: &self.model,
            system: SYSTEM_PROMPT,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            temperature: 0.0,
            max_tokens,
        };

        let mut request = self
            .http
            .post(format!("{}/v1/chat", self.base_url))
            .json(&body);
        if let Some(secret) = &self.api_secret {
            request = request.bearer_auth(secret);
        }

        let response = request
            .send()
            .await
            .map_err(|e| InsightsError::UpstreamFailure(format!("LLM call failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            warn!("llm-sidecar returned {}", status);
            return Err(InsightsError::UpstreamFailure(format!(
                "LLM call returned status {}",
                status
            )));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| InsightsError::UpstreamFailure(format!("Failed to parse LLM response: {}", e)))?;

        let content = parsed.content.trim().to_string();
        if content.is_empty() {
            return Err(InsightsError::UpstreamFailure("Empty LLM response".to_string()));
        }
        Ok(content)
    }
}

#[async_trait]
impl TextGenerator for SidecarClient {
    async fn generate(&self, prompt: &str, max_tokens: u32) -> Result<String> {
        self.chat(prompt, max_tokens).await
    }

    fn identity(&self) -> GeneratorIdentity {
        GeneratorIdentity {
            provider: self.provider.clone(),
            model: self.model.clone(),
        }
    }
}

/// Scripted generator: returns canned responses in order, then repeats the
/// last one. Used by tests and offline runs.
pub struct ScriptedGenerator {
    responses: std::sync::Mutex<Vec<String>>,
}

impl ScriptedGenerator {
    pub fn new(responses: Vec<&str>) -> Self {
        Self {
            responses: std::sync::Mutex::new(responses.into_iter().map(String::from).collect()),
        }
    }
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    async fn generate(&self, _prompt: &str, _max_tokens: u32) -> Result<String> {
        let mut responses = self.responses.lock().unwrap();
        if responses.is_empty() {
            return Err(InsightsError::UpstreamFailure("no scripted response".to_string()));
        }
        if responses.len() == 1 {
            Ok(responses[0].clone())
        } else {
            Ok(responses.remove(0))
        }
    }

    fn identity(&self) -> GeneratorIdentity {
        GeneratorIdentity {
            provider: "scripted".to_string(),
            model: "scripted".to_string(),
        }
    }
}
