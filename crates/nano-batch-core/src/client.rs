//! Remote transform client: model selection, fallback and response parsing
//!
//! The transport is pluggable through [`ModelBackend`]: [`DirectBackend`]
//! talks to the generative API with a locally held key, [`ProxyBackend`]
//! goes through an intermediary. Everything above the transport (instruction
//! building, primary/fallback policy, picking the image out of the response)
//! is shared.

mod direct;
mod proxy;

pub use direct::DirectBackend;
pub use proxy::ProxyBackend;

use crate::config::{RemoteConfig, TransportMode};
use crate::credential::{Credential, CredentialValidator};
use crate::error::{PipelineError, Result};
use crate::models::{AspectRatio, ModelTier};
use crate::utils::encoding;
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Messages the service uses when the key/model pairing is not usable.
const CREDENTIAL_REJECTION_MARKERS: [&str; 3] = [
    "Requested entity was not found",
    "API key not valid",
    "API_KEY_INVALID",
];

/// One image to transform
#[derive(Debug, Clone)]
pub struct TransformRequest {
    pub image_bytes: Vec<u8>,
    pub mime_type: String,
    pub instruction: String,
    pub aspect_ratio: AspectRatio,
    pub tier: ModelTier,
}

/// Image returned by the service
#[derive(Debug, Clone)]
pub struct TransformedImage {
    pub bytes: Vec<u8>,
    pub mime_type: String,
    /// Model that produced the image
    pub model: String,
}

/// A piece of model output
#[derive(Debug, Clone, PartialEq)]
pub enum ContentPart {
    Image { data: Vec<u8>, mime_type: String },
    Text(String),
}

/// Arguments for a single model invocation
#[derive(Debug, Clone)]
pub struct ModelCall<'a> {
    pub model: &'a str,
    /// Output size class; `None` lets the model pick
    pub image_size: Option<&'a str>,
    pub aspect_ratio: AspectRatio,
    pub prompt: &'a str,
    pub image_base64: &'a str,
    pub mime_type: &'a str,
}

/// Transport to the generative-image service
#[async_trait::async_trait]
pub trait ModelBackend: Send + Sync {
    /// Run one model call and return the content parts of the first candidate
    async fn generate(&self, call: &ModelCall<'_>, credential: &Credential)
        -> Result<Vec<ContentPart>>;

    /// Ask the service whether the credential is usable
    async fn validate(&self, credential: &Credential) -> Result<bool>;

    fn name(&self) -> &'static str;
}

/// The contract the queue scheduler drives
#[async_trait::async_trait]
pub trait TransformService: Send + Sync {
    async fn transform(
        &self,
        request: &TransformRequest,
        credential: &Credential,
    ) -> Result<TransformedImage>;
}

/// Model names per tier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSelection {
    pub pro_model: String,
    pub standard_model: String,
    pub fallback_model: String,
    pub pro_image_size: String,
}

impl ModelSelection {
    pub fn from_config(config: &RemoteConfig) -> Self {
        Self {
            pro_model: config.pro_model.clone(),
            standard_model: config.standard_model.clone(),
            fallback_model: config.fallback_model.clone(),
            pro_image_size: config.pro_image_size.clone(),
        }
    }

    /// Model and size class for the primary attempt
    pub fn primary(&self, tier: ModelTier) -> (&str, Option<&str>) {
        match tier {
            ModelTier::Pro => (self.pro_model.as_str(), Some(self.pro_image_size.as_str())),
            ModelTier::Standard => (self.standard_model.as_str(), None),
        }
    }
}

/// Default instruction when the user leaves it blank
pub fn default_instruction(aspect_ratio: AspectRatio) -> String {
    let frame = aspect_ratio.framing();
    format!(
        "Generate a new professional-quality image in {frame} based on this image. \
         Maintain the subject and composition but adapt it perfectly to the new {frame} format. \
         Enhance lighting, colors, and overall quality while ensuring the image fills the entire {frame} frame."
    )
}

/// Instruction actually sent to the model
pub fn build_instruction(instruction: &str, aspect_ratio: AspectRatio) -> String {
    let instruction = instruction.trim();
    if instruction.is_empty() {
        default_instruction(aspect_ratio)
    } else {
        format!(
            "Generate a new professional-quality image in {} based on this image. {}",
            aspect_ratio.framing(),
            instruction
        )
    }
}

/// Map a failure message from the service onto the error taxonomy
pub fn classify_service_error(message: impl Into<String>) -> PipelineError {
    let message = message.into();
    if CREDENTIAL_REJECTION_MARKERS
        .iter()
        .any(|marker| message.contains(marker))
    {
        PipelineError::Credential { message }
    } else {
        PipelineError::Transform { message }
    }
}

/// First image in the parts; otherwise the model's text as a refusal
pub fn extract_image(parts: Vec<ContentPart>) -> Result<(Vec<u8>, String)> {
    let mut texts = Vec::new();
    for part in parts {
        match part {
            ContentPart::Image { data, mime_type } => return Ok((data, mime_type)),
            ContentPart::Text(text) => {
                let text = text.trim();
                if !text.is_empty() {
                    texts.push(text.to_string());
                }
            }
        }
    }

    if texts.is_empty() {
        Err(PipelineError::NoImageProduced)
    } else {
        Err(PipelineError::Refusal {
            text: texts.join("\n"),
        })
    }
}

pub(crate) fn build_http_client(timeout: Option<Duration>) -> Client {
    let builder = match timeout {
        Some(timeout) => Client::builder().timeout(timeout),
        None => Client::builder(),
    };
    builder.build().unwrap_or_else(|e| {
        warn!("Failed to build HTTP client: {}", e);
        Client::new()
    })
}

/// Create the backend for the configured deployment shape
pub fn create_backend(config: &RemoteConfig) -> Box<dyn ModelBackend> {
    let timeout = config.request_timeout_secs.map(Duration::from_secs);
    match config.mode {
        TransportMode::Direct => Box::new(DirectBackend::new(
            &config.endpoint,
            &config.validation_model,
            timeout,
        )),
        TransportMode::Proxy => Box::new(ProxyBackend::new(&config.endpoint, timeout)),
    }
}

/// Transform client with a single fallback attempt
pub struct RemoteTransformClient {
    backend: Box<dyn ModelBackend>,
    models: ModelSelection,
}

impl RemoteTransformClient {
    pub fn new(backend: Box<dyn ModelBackend>, models: ModelSelection) -> Self {
        Self { backend, models }
    }

    pub fn from_config(config: &RemoteConfig) -> Self {
        Self::new(create_backend(config), ModelSelection::from_config(config))
    }

    pub fn models(&self) -> &ModelSelection {
        &self.models
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    async fn attempt(
        &self,
        model: &str,
        image_size: Option<&str>,
        prompt: &str,
        image_base64: &str,
        request: &TransformRequest,
        credential: &Credential,
    ) -> Result<TransformedImage> {
        let call = ModelCall {
            model,
            image_size,
            aspect_ratio: request.aspect_ratio,
            prompt,
            image_base64,
            mime_type: &request.mime_type,
        };

        let parts = self.backend.generate(&call, credential).await?;
        let (bytes, mime_type) = extract_image(parts)?;
        debug!("Model {} returned {} bytes of {}", model, bytes.len(), mime_type);

        Ok(TransformedImage {
            bytes,
            mime_type,
            model: model.to_string(),
        })
    }
}

#[async_trait::async_trait]
impl TransformService for RemoteTransformClient {
    #[instrument(skip(self, request, credential), fields(tier = ?request.tier, aspect_ratio = %request.aspect_ratio))]
    async fn transform(
        &self,
        request: &TransformRequest,
        credential: &Credential,
    ) -> Result<TransformedImage> {
        let prompt = build_instruction(&request.instruction, request.aspect_ratio);
        let image_base64 = encoding::to_base64(&request.image_bytes);
        let (model, image_size) = self.models.primary(request.tier);

        match self
            .attempt(model, image_size, &prompt, &image_base64, request, credential)
            .await
        {
            Ok(image) => Ok(image),
            Err(primary_error) => {
                let fallback = self.models.fallback_model.as_str();
                warn!(
                    "Primary model {} failed ({}): {}; falling back to {}",
                    model,
                    primary_error.error_type(),
                    primary_error,
                    fallback
                );
                let image = self
                    .attempt(fallback, None, &prompt, &image_base64, request, credential)
                    .await?;
                info!("Fallback model {} produced the image", fallback);
                Ok(image)
            }
        }
    }
}

#[async_trait::async_trait]
impl CredentialValidator for RemoteTransformClient {
    async fn validate(&self, credential: &Credential) -> Result<bool> {
        self.backend.validate(credential).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Backend that answers each call from a script and records the calls
    struct ScriptedBackend {
        responses: Mutex<Vec<Result<Vec<ContentPart>>>>,
        calls: Mutex<Vec<(String, Option<String>, String)>>,
    }

    impl ScriptedBackend {
        fn new(mut responses: Vec<Result<Vec<ContentPart>>>) -> Self {
            responses.reverse();
            Self {
                responses: Mutex::new(responses),
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait::async_trait]
    impl ModelBackend for std::sync::Arc<ScriptedBackend> {
        async fn generate(
            &self,
            call: &ModelCall<'_>,
            _credential: &Credential,
        ) -> Result<Vec<ContentPart>> {
            self.calls.lock().unwrap().push((
                call.model.to_string(),
                call.image_size.map(str::to_string),
                call.prompt.to_string(),
            ));
            self.responses
                .lock()
                .unwrap()
                .pop()
                .unwrap_or(Err(PipelineError::transform("script exhausted")))
        }

        async fn validate(&self, _credential: &Credential) -> Result<bool> {
            Ok(true)
        }

        fn name(&self) -> &'static str {
            "scripted"
        }
    }

    fn client(backend: std::sync::Arc<ScriptedBackend>) -> RemoteTransformClient {
        RemoteTransformClient::new(
            Box::new(backend),
            ModelSelection {
                pro_model: "pro-model".to_string(),
                standard_model: "standard-model".to_string(),
                fallback_model: "fallback-model".to_string(),
                pro_image_size: "2K".to_string(),
            },
        )
    }

    fn request(tier: ModelTier, instruction: &str) -> TransformRequest {
        TransformRequest {
            image_bytes: vec![1, 2, 3],
            mime_type: "image/png".to_string(),
            instruction: instruction.to_string(),
            aspect_ratio: AspectRatio::Square,
            tier,
        }
    }

    fn image_part(data: &[u8]) -> ContentPart {
        ContentPart::Image {
            data: data.to_vec(),
            mime_type: "image/png".to_string(),
        }
    }

    #[test]
    fn test_blank_instruction_uses_default() {
        let built = build_instruction("   ", AspectRatio::Widescreen);
        assert_eq!(built, default_instruction(AspectRatio::Widescreen));
        assert!(built.contains("16:9"));
    }

    #[test]
    fn test_instruction_is_prefixed_with_framing() {
        let built = build_instruction("make it a watercolor", AspectRatio::Portrait);
        assert!(built.starts_with("Generate a new professional-quality image in portrait format"));
        assert!(built.ends_with("make it a watercolor"));
    }

    #[test]
    fn test_classify_service_error() {
        assert!(classify_service_error("Requested entity was not found.").invalidates_credential());
        assert!(classify_service_error("API key not valid. Please pass a valid API key.")
            .invalidates_credential());
        assert!(!classify_service_error("models/foo is not found for API version v1beta")
            .invalidates_credential());
        assert!(!classify_service_error("Resource has been exhausted (e.g. check quota).")
            .invalidates_credential());
    }

    #[test]
    fn test_extract_image_prefers_image() {
        let parts = vec![ContentPart::Text("here you go".to_string()), image_part(&[9])];
        let (data, mime) = extract_image(parts).unwrap();
        assert_eq!(data, vec![9]);
        assert_eq!(mime, "image/png");
    }

    #[test]
    fn test_extract_image_refusal_and_empty() {
        let err = extract_image(vec![ContentPart::Text("I can't do that.".to_string())])
            .unwrap_err();
        assert_eq!(err.to_string(), "I can't do that.");
        assert_eq!(err.error_type(), "model_refusal");

        let err = extract_image(vec![]).unwrap_err();
        assert!(matches!(err, PipelineError::NoImageProduced));
    }

    #[tokio::test]
    async fn test_pro_tier_requests_size_class() {
        let backend = std::sync::Arc::new(ScriptedBackend::new(vec![Ok(vec![image_part(&[1])])]));
        let client = client(backend.clone());

        let image = client
            .transform(&request(ModelTier::Pro, ""), &Credential::new("k"))
            .await
            .unwrap();
        assert_eq!(image.model, "pro-model");

        let calls = backend.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].1.as_deref(), Some("2K"));
    }

    #[tokio::test]
    async fn test_standard_tier_omits_size_class() {
        let backend = std::sync::Arc::new(ScriptedBackend::new(vec![Ok(vec![image_part(&[1])])]));
        let client = client(backend.clone());

        client
            .transform(&request(ModelTier::Standard, "x"), &Credential::new("k"))
            .await
            .unwrap();

        let calls = backend.calls.lock().unwrap();
        assert_eq!(calls[0].0, "standard-model");
        assert_eq!(calls[0].1, None);
    }

    #[tokio::test]
    async fn test_fallback_after_primary_failure() {
        let backend = std::sync::Arc::new(ScriptedBackend::new(vec![
            Err(classify_service_error("model not found")),
            Ok(vec![image_part(&[7, 7])]),
        ]));
        let client = client(backend.clone());

        let image = client
            .transform(&request(ModelTier::Pro, ""), &Credential::new("k"))
            .await
            .unwrap();
        assert_eq!(image.bytes, vec![7, 7]);
        assert_eq!(image.model, "fallback-model");

        let calls = backend.calls.lock().unwrap();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1].0, "fallback-model");
        assert_eq!(calls[1].1, None);
        assert_eq!(calls[0].2, calls[1].2);
    }

    #[tokio::test]
    async fn test_second_failure_surfaces_verbatim() {
        let backend = std::sync::Arc::new(ScriptedBackend::new(vec![
            Err(classify_service_error("primary broke")),
            Err(classify_service_error("quota exceeded")),
            Ok(vec![image_part(&[1])]),
        ]));
        let client = client(backend.clone());

        let err = client
            .transform(&request(ModelTier::Pro, ""), &Credential::new("k"))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "quota exceeded");
        assert_eq!(backend.calls.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_refusal_after_fallback_is_error_text() {
        let backend = std::sync::Arc::new(ScriptedBackend::new(vec![
            Ok(vec![ContentPart::Text("No.".to_string())]),
            Ok(vec![ContentPart::Text("I cannot edit this photo.".to_string())]),
        ]));
        let client = client(backend);

        let err = client
            .transform(&request(ModelTier::Pro, ""), &Credential::new("k"))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "I cannot edit this photo.");
    }
}
