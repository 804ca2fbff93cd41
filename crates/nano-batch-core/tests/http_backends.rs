//! Direct and proxy transports against mock HTTP servers

mod common;

use common::png_bytes;
use nano_batch_core::client::{DirectBackend, ModelBackend, ModelSelection, ProxyBackend};
use nano_batch_core::credential::CredentialValidator;
use nano_batch_core::utils::encoding;
use nano_batch_core::{
    AspectRatio, Credential, ModelTier, PipelineError, RemoteTransformClient, TransformRequest,
    TransformService,
};
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const KEY: &str = "AIzaSyMockKey0000000000000000000000000";

fn selection() -> ModelSelection {
    ModelSelection {
        pro_model: "pro-model".to_string(),
        standard_model: "standard-model".to_string(),
        fallback_model: "fallback-model".to_string(),
        pro_image_size: "2K".to_string(),
    }
}

fn request(tier: ModelTier) -> TransformRequest {
    TransformRequest {
        image_bytes: png_bytes(4, 4),
        mime_type: "image/png".to_string(),
        instruction: "Add a sunset".to_string(),
        aspect_ratio: AspectRatio::Square,
        tier,
    }
}

fn image_response(bytes: &[u8]) -> serde_json::Value {
    json!({
        "candidates": [{
            "content": {"parts": [
                {"text": "Here you go"},
                {"inlineData": {"mimeType": "image/png", "data": encoding::to_base64(bytes)}}
            ]}
        }]
    })
}

fn direct_client(server: &MockServer) -> RemoteTransformClient {
    RemoteTransformClient::new(
        Box::new(DirectBackend::new(&server.uri(), "check-model", None)),
        selection(),
    )
}

#[tokio::test]
async fn test_direct_pro_request_carries_key_and_size_class() {
    let server = MockServer::start().await;
    let produced = png_bytes(6, 6);

    Mock::given(method("POST"))
        .and(path("/v1beta/models/pro-model:generateContent"))
        .and(header("x-goog-api-key", KEY))
        .and(body_partial_json(json!({
            "generationConfig": {"imageConfig": {"aspectRatio": "1:1", "imageSize": "2K"}}
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(image_response(&produced)))
        .expect(1)
        .mount(&server)
        .await;

    let image = direct_client(&server)
        .transform(&request(ModelTier::Pro), &Credential::new(KEY))
        .await
        .unwrap();

    assert_eq!(image.bytes, produced);
    assert_eq!(image.model, "pro-model");
}

#[tokio::test]
async fn test_direct_falls_back_once_then_surfaces_error() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1beta/models/standard-model:generateContent"))
        .respond_with(ResponseTemplate::new(429).set_body_json(json!({
            "error": {"code": 429, "message": "Resource has been exhausted"}
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1beta/models/fallback-model:generateContent"))
        .respond_with(ResponseTemplate::new(503).set_body_string("unavailable"))
        .expect(1)
        .mount(&server)
        .await;

    let err = direct_client(&server)
        .transform(&request(ModelTier::Standard), &Credential::new(KEY))
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::Transform { .. }));
    assert_eq!(err.to_string(), "Server error: 503");
}

#[tokio::test]
async fn test_direct_entity_not_found_is_credential_error() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "error": {"code": 404, "message": "Requested entity was not found.", "status": "NOT_FOUND"}
        })))
        .mount(&server)
        .await;

    let err = direct_client(&server)
        .transform(&request(ModelTier::Pro), &Credential::new(KEY))
        .await
        .unwrap_err();

    assert!(err.invalidates_credential());
    assert_eq!(err.to_string(), "Requested entity was not found.");
}

#[tokio::test]
async fn test_direct_text_only_response_is_refusal() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "candidates": [{"content": {"parts": [{"text": "I can't create that image."}]}}]
        })))
        .mount(&server)
        .await;

    let err = direct_client(&server)
        .transform(&request(ModelTier::Pro), &Credential::new(KEY))
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::Refusal { .. }));
    assert_eq!(err.to_string(), "I can't create that image.");
}

#[tokio::test]
async fn test_direct_validation() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1beta/models/check-model:generateContent"))
        .and(header("x-goog-api-key", KEY))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"candidates": []})))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1beta/models/check-model:generateContent"))
        .and(header("x-goog-api-key", "bad-key"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": {"code": 400, "message": "API key not valid."}
        })))
        .mount(&server)
        .await;

    let client = direct_client(&server);
    assert!(client.validate(&Credential::new(KEY)).await.unwrap());
    assert!(!client.validate(&Credential::new("bad-key")).await.unwrap());
}

#[tokio::test]
async fn test_proxy_transform_and_validation() {
    let server = MockServer::start().await;
    let produced = png_bytes(3, 3);

    Mock::given(method("POST"))
        .and(path("/nano-banana"))
        .and(body_partial_json(json!({
            "apiKey": KEY,
            "aspectRatio": "1:1",
            "model": "pro-model",
            "imageSize": "2K"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "image": format!("data:image/png;base64,{}", encoding::to_base64(&produced)),
            "mimeType": "image/png"
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/validate-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"valid": true})))
        .mount(&server)
        .await;

    let backend = ProxyBackend::new(&server.uri(), None);
    assert_eq!(backend.name(), "proxy");
    let client = RemoteTransformClient::new(Box::new(backend), selection());

    let image = client
        .transform(&request(ModelTier::Pro), &Credential::new(KEY))
        .await
        .unwrap();
    assert_eq!(image.bytes, produced);
    assert!(client.validate(&Credential::new(KEY)).await.unwrap());
}

#[tokio::test]
async fn test_proxy_error_field_is_classified() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/nano-banana"))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!({
            "error": "Requested entity was not found."
        })))
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/validate-key"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({"valid": false})))
        .mount(&server)
        .await;

    let client = RemoteTransformClient::new(Box::new(ProxyBackend::new(&server.uri(), None)), selection());
    let err = client
        .transform(&request(ModelTier::Standard), &Credential::new(KEY))
        .await
        .unwrap_err();

    assert!(err.invalidates_credential());
    assert!(!client.validate(&Credential::new(KEY)).await.unwrap());
}
