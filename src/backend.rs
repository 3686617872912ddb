//! Generation backend
//!
//! The external image model, seen only through [`GenerationBackend`]. Remote
//! failures are classified so the loop can decide between credential
//! rotation, immediate failure, and plain per-item failure.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::error::GenError;
use crate::limiter::Lease;
use crate::types::Tier;

/// Inline reference image sent alongside the prompt.
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceImage {
    pub mime_type: String,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub prompt: String,
    pub references: Vec<ReferenceImage>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedImage {
    pub mime_type: String,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum BackendError {
    /// Rate limit or quota signal; rotate credentials and retry.
    #[error("Quota exceeded: {0}")]
    QuotaExceeded(String),

    /// Explicit overload; retrying only wastes calls.
    #[error("Backend overloaded: {0}")]
    Overload(String),

    #[error("Backend error: {0}")]
    Other(String),
}

impl BackendError {
    /// Classify a remote failure from its HTTP status and body text.
    pub fn classify(status: Option<u16>, message: &str) -> Self {
        let lowered = message.to_lowercase();
        if status == Some(503) || message.contains("UNAVAILABLE") {
            BackendError::Overload(message.to_string())
        } else if status == Some(429)
            || message.contains("RESOURCE_EXHAUSTED")
            || lowered.contains("quota")
        {
            BackendError::QuotaExceeded(message.to_string())
        } else {
            BackendError::Other(message.to_string())
        }
    }
}

#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Issue one call with the leased credential on the leased tier.
    async fn generate(
        &self,
        lease: &Lease,
        request: &GenerationRequest,
    ) -> Result<GeneratedImage, BackendError>;

    fn name(&self) -> &str;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_primary_model")]
    pub primary_model: String,
    #[serde(default = "default_fallback_model")]
    pub fallback_model: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_base_url() -> String {
    "https://generativelanguage.googleapis.com/v1beta".to_string()
}

fn default_primary_model() -> String {
    "gemini-3-pro-image-preview".to_string()
}

fn default_fallback_model() -> String {
    "gemini-2.5-flash-image".to_string()
}

fn default_timeout_secs() -> u64 {
    180
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            primary_model: default_primary_model(),
            fallback_model: default_fallback_model(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl BackendConfig {
    pub fn model_for(&self, tier: Tier) -> &str {
        match tier {
            Tier::Primary => &self.primary_model,
            Tier::Fallback => &self.fallback_model,
        }
    }
}

/// `generateContent` style JSON API over HTTP.
pub struct HttpImageBackend {
    client: Client,
    config: BackendConfig,
}

impl HttpImageBackend {
    pub fn new(config: BackendConfig) -> Result<Self, GenError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| GenError::ConfigError(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { client, config })
    }

    fn endpoint(&self, tier: Tier) -> String {
        format!(
            "{}/models/{}:generateContent",
            self.config.base_url.trim_end_matches('/'),
            self.config.model_for(tier)
        )
    }

    fn request_body(request: &GenerationRequest) -> serde_json::Value {
        let mut parts = vec![json!({ "text": request.prompt })];
        for reference in &request.references {
            parts.push(json!({
                "inlineData": {
                    "mimeType": reference.mime_type,
                    "data": BASE64.encode(&reference.data),
                }
            }));
        }
        json!({
            "contents": [{ "parts": parts }],
            "generationConfig": { "responseModalities": ["TEXT", "IMAGE"] },
        })
    }
}

#[derive(Deserialize)]
struct GenerateResponse {
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
    parts: Vec<Part>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    inline_data: Option<InlineData>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

/// First image part of a response.
fn extract_image(body: &str) -> Result<GeneratedImage, BackendError> {
    let response: GenerateResponse = serde_json::from_str(body)
        .map_err(|e| BackendError::Other(format!("Failed to parse response: {}", e)))?;
    let inline = response
        .candidates
        .into_iter()
        .filter_map(|c| c.content)
        .flat_map(|c| c.parts)
        .filter_map(|p| p.inline_data)
        .find(|d| d.mime_type.starts_with("image"))
        .ok_or_else(|| BackendError::Other("No image in response".to_string()))?;
    let data = BASE64
        .decode(inline.data.as_bytes())
        .map_err(|e| BackendError::Other(format!("Invalid image encoding: {}", e)))?;
    Ok(GeneratedImage {
        mime_type: inline.mime_type,
        data,
    })
}

#[async_trait]
impl GenerationBackend for HttpImageBackend {
    async fn generate(
        &self,
        lease: &Lease,
        request: &GenerationRequest,
    ) -> Result<GeneratedImage, BackendError> {
        let url = self.endpoint(lease.tier);
        debug!(credential = %lease.credential_id, tier = %lease.tier, url = %url, "generation request");

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &lease.secret)
            .header("Content-Type", "application/json")
            .json(&Self::request_body(request))
            .send()
            .await
            .map_err(|e| BackendError::classify(e.status().map(|s| s.as_u16()), &e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        if !status.is_success() {
            return Err(BackendError::classify(
                Some(status.as_u16()),
                &format!("{}: {}", status, text),
            ));
        }
        extract_image(&text)
    }

    fn name(&self) -> &str {
        "http"
    }
}
