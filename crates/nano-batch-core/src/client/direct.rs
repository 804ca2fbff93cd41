//! Direct transport to the generative API `generateContent` method

use super::{build_http_client, classify_service_error, ContentPart, ModelBackend, ModelCall};
use crate::credential::Credential;
use crate::error::{PipelineError, Result};
use crate::utils::encoding;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

const API_KEY_HEADER: &str = "x-goog-api-key";

pub struct DirectBackend {
    client: Client,
    base_url: String,
    validation_model: String,
}

impl DirectBackend {
    pub fn new(base_url: &str, validation_model: &str, timeout: Option<Duration>) -> Self {
        Self {
            client: build_http_client(timeout),
            base_url: base_url.trim_end_matches('/').to_string(),
            validation_model: validation_model.to_string(),
        }
    }

    fn url(&self, model: &str) -> String {
        format!("{}/v1beta/models/{}:generateContent", self.base_url, model)
    }

    async fn post(
        &self,
        model: &str,
        body: &GenerateContentRequest<'_>,
        credential: &Credential,
    ) -> Result<reqwest::Response> {
        let response = self
            .client
            .post(self.url(model))
            .header(API_KEY_HEADER, credential.expose())
            .json(body)
            .send()
            .await?;
        Ok(response)
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    contents: Vec<RequestContent<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig<'a>>,
}

#[derive(Serialize)]
struct RequestContent<'a> {
    parts: Vec<RequestPart<'a>>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum RequestPart<'a> {
    #[serde(rename_all = "camelCase")]
    Inline { inline_data: InlineDataRef<'a> },
    Text { text: &'a str },
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct InlineDataRef<'a> {
    mime_type: &'a str,
    data: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig<'a> {
    response_modalities: [&'static str; 2],
    image_config: ImageConfig<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ImageConfig<'a> {
    aspect_ratio: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    image_size: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<ResponseContent>,
}

#[derive(Debug, Deserialize)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResponsePart {
    text: Option<String>,
    inline_data: Option<InlineData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: Option<String>,
    data: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

async fn error_from_response(response: reqwest::Response) -> PipelineError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    match serde_json::from_str::<ErrorEnvelope>(&body) {
        Ok(envelope) => classify_service_error(envelope.error.message),
        Err(_) => PipelineError::transform(format!("Server error: {}", status.as_u16())),
    }
}

fn into_parts(response: GenerateContentResponse) -> Result<Vec<ContentPart>> {
    let mut parts = Vec::new();

    if let Some(candidate) = response.candidates.into_iter().next() {
        for part in candidate.content.map(|c| c.parts).unwrap_or_default() {
            if let Some(inline) = part.inline_data {
                let data = encoding::from_base64(&inline.data).map_err(|e| {
                    PipelineError::transform(format!("Invalid image payload: {}", e))
                })?;
                parts.push(ContentPart::Image {
                    data,
                    mime_type: inline.mime_type.unwrap_or_else(|| "image/png".to_string()),
                });
            } else if let Some(text) = part.text {
                parts.push(ContentPart::Text(text));
            }
        }
    } else if let Some(reason) = response.prompt_feedback.and_then(|f| f.block_reason) {
        parts.push(ContentPart::Text(format!("Request blocked: {}", reason)));
    }

    Ok(parts)
}

#[async_trait::async_trait]
impl ModelBackend for DirectBackend {
    async fn generate(
        &self,
        call: &ModelCall<'_>,
        credential: &Credential,
    ) -> Result<Vec<ContentPart>> {
        let body = GenerateContentRequest {
            contents: vec![RequestContent {
                parts: vec![
                    RequestPart::Inline {
                        inline_data: InlineDataRef {
                            mime_type: call.mime_type,
                            data: call.image_base64,
                        },
                    },
                    RequestPart::Text { text: call.prompt },
                ],
            }],
            generation_config: Some(GenerationConfig {
                response_modalities: ["TEXT", "IMAGE"],
                image_config: ImageConfig {
                    aspect_ratio: call.aspect_ratio.as_str(),
                    image_size: call.image_size,
                },
            }),
        };

        debug!("POST generateContent model={}", call.model);
        let response = self.post(call.model, &body, credential).await?;
        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }

        let parsed: GenerateContentResponse = response.json().await?;
        into_parts(parsed)
    }

    async fn validate(&self, credential: &Credential) -> Result<bool> {
        let body = GenerateContentRequest {
            contents: vec![RequestContent {
                parts: vec![RequestPart::Text { text: "Test" }],
            }],
            generation_config: None,
        };

        match self.post(&self.validation_model, &body, credential).await {
            Ok(response) if response.status() == StatusCode::OK => Ok(true),
            Ok(response) => {
                warn!("API key validation failed: {}", response.status());
                Ok(false)
            }
            Err(e) => {
                warn!("API key validation request failed: {}", e);
                Ok(false)
            }
        }
    }

    fn name(&self) -> &'static str {
        "direct"
    }
}
