//! Gemini `generateContent` REST transport.

use std::time::Duration;

use annotater_core::Config;
use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::ExtractorError;
use crate::extract::{ImageInput, VisionModel};

/// HTTP client for one Gemini model.
pub struct GeminiClient {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: String,
    timeout: Duration,
}

// ── Wire types ──

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig<'a>,
}

#[derive(Serialize)]
struct Content<'a> {
    role: &'static str,
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum Part<'a> {
    InlineData { inline_data: InlineData<'a> },
    Text { text: &'a str },
}

#[derive(Serialize)]
struct InlineData<'a> {
    mime_type: &'a str,
    data: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig<'a> {
    response_mime_type: &'static str,
    response_schema: &'a Value,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<ResponseCandidate>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResponseCandidate {
    content: Option<ResponseContent>,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

impl GeminiClient {
    pub fn new(config: &Config) -> Result<Self, ExtractorError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key: config.api_key.clone(),
            timeout: config.request_timeout,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, self.model
        )
    }

    fn transport_error(&self, e: reqwest::Error) -> ExtractorError {
        if e.is_timeout() {
            ExtractorError::Timeout(self.timeout.as_secs())
        } else {
            ExtractorError::Http(e)
        }
    }
}

fn request_body<'a>(image: &'a ImageInput, prompt: &'a str, schema: &'a Value) -> GenerateRequest<'a> {
    GenerateRequest {
        contents: vec![Content {
            role: "user",
            parts: vec![
                Part::InlineData {
                    inline_data: InlineData {
                        mime_type: &image.mime_type,
                        data: STANDARD.encode(&image.bytes),
                    },
                },
                Part::Text { text: prompt },
            ],
        }],
        generation_config: GenerationConfig {
            response_mime_type: "application/json",
            response_schema: schema,
        },
    }
}

/// Concatenated text of the first candidate.
fn response_text(body: &str) -> Result<String, ExtractorError> {
    let resp: GenerateResponse =
        serde_json::from_str(body).map_err(|e| ExtractorError::Decode(e.to_string()))?;

    if let Some(reason) = resp.prompt_feedback.and_then(|f| f.block_reason) {
        return Err(ExtractorError::Blocked(reason));
    }
    let Some(first) = resp.candidates.into_iter().next() else {
        return Err(ExtractorError::Decode("response has no candidates".into()));
    };

    let text: String = first
        .content
        .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();
    if text.is_empty()
        && let Some(reason) = first.finish_reason.filter(|r| r != "STOP")
    {
        return Err(ExtractorError::Blocked(reason));
    }
    Ok(text)
}

#[async_trait]
impl VisionModel for GeminiClient {
    async fn generate(
        &self,
        image: &ImageInput,
        prompt: &str,
        response_schema: &Value,
    ) -> Result<String, ExtractorError> {
        let url = self.endpoint();
        info!(model = %self.model, image_bytes = image.bytes.len(), mime = %image.mime_type, "calling gemini");
        debug!(prompt = %prompt, "gemini prompt");

        let resp = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&request_body(image, prompt, response_schema))
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = resp.status();
        let body = resp.text().await.map_err(|e| self.transport_error(e))?;
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(ExtractorError::Auth {
                status: status.as_u16(),
            });
        }
        if !status.is_success() {
            return Err(ExtractorError::Server {
                status: status.as_u16(),
                body,
            });
        }

        let text = response_text(&body)?;
        info!(status = status.as_u16(), chars = text.len(), "gemini responded");
        Ok(text)
    }
}
