//! Transport through an intermediary that holds the key server-side

use super::{build_http_client, classify_service_error, ContentPart, ModelBackend, ModelCall};
use crate::credential::Credential;
use crate::error::{PipelineError, Result};
use crate::utils::encoding;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

const TRANSFORM_PATH: &str = "/nano-banana";
const VALIDATE_PATH: &str = "/validate-key";

pub struct ProxyBackend {
    client: Client,
    base_url: String,
}

impl ProxyBackend {
    pub fn new(base_url: &str, timeout: Option<Duration>) -> Self {
        Self {
            client: build_http_client(timeout),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ProxyTransformRequest<'a> {
    api_key: &'a str,
    image_base64: &'a str,
    mime_type: &'a str,
    prompt: &'a str,
    aspect_ratio: &'a str,
    model: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    image_size: Option<&'a str>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProxyTransformResponse {
    image: Option<String>,
    mime_type: Option<String>,
    text: Option<String>,
    error: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ProxyValidateRequest<'a> {
    api_key: &'a str,
}

#[derive(Debug, Deserialize)]
struct ProxyValidateResponse {
    #[serde(default)]
    valid: bool,
}

#[async_trait::async_trait]
impl ModelBackend for ProxyBackend {
    async fn generate(
        &self,
        call: &ModelCall<'_>,
        credential: &Credential,
    ) -> Result<Vec<ContentPart>> {
        let body = ProxyTransformRequest {
            api_key: credential.expose(),
            image_base64: encoding::strip_data_uri(call.image_base64),
            mime_type: call.mime_type,
            prompt: call.prompt,
            aspect_ratio: call.aspect_ratio.as_str(),
            model: call.model,
            image_size: call.image_size,
        };

        debug!("POST {} model={}", TRANSFORM_PATH, call.model);
        let response = self
            .client
            .post(self.url(TRANSFORM_PATH))
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        let parsed: ProxyTransformResponse = serde_json::from_str(&text).unwrap_or_default();

        if let Some(error) = parsed.error {
            return Err(classify_service_error(error));
        }
        if !status.is_success() {
            return Err(PipelineError::transform(format!(
                "Server error: {}",
                status.as_u16()
            )));
        }

        let mut parts = Vec::new();
        if let Some(image) = parsed.image {
            let data = encoding::from_base64(&image)
                .map_err(|e| PipelineError::transform(format!("Invalid image payload: {}", e)))?;
            parts.push(ContentPart::Image {
                data,
                mime_type: parsed.mime_type.unwrap_or_else(|| "image/jpeg".to_string()),
            });
        }
        if let Some(text) = parsed.text {
            parts.push(ContentPart::Text(text));
        }
        Ok(parts)
    }

    async fn validate(&self, credential: &Credential) -> Result<bool> {
        let body = ProxyValidateRequest {
            api_key: credential.expose(),
        };

        let response = match self.client.post(self.url(VALIDATE_PATH)).json(&body).send().await {
            Ok(response) => response,
            Err(e) => {
                warn!("API key validation request failed: {}", e);
                return Ok(false);
            }
        };

        if !response.status().is_success() {
            return Ok(false);
        }

        match response.json::<ProxyValidateResponse>().await {
            Ok(parsed) => Ok(parsed.valid),
            Err(e) => {
                warn!("Unreadable validation response: {}", e);
                Ok(false)
            }
        }
    }

    fn name(&self) -> &'static str {
        "proxy"
    }
}
