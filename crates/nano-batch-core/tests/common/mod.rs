//! Shared fixtures for the integration tests

#![allow(dead_code)]

use image::{ImageFormat, RgbImage};
use nano_batch_core::client::{ContentPart, ModelBackend, ModelCall};
use nano_batch_core::credential::CredentialValidator;
use nano_batch_core::{
    Credential, CredentialManager, CredentialOrigin, CredentialSource, PipelineError, Result,
    SuppliedCredential, TransformRequest, TransformService, TransformedImage,
};
use std::collections::VecDeque;
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const HOST_KEY: &str = "host-provided-key";

pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let mut out = Vec::new();
    RgbImage::from_fn(width, height, |x, y| image::Rgb([(x * 10) as u8, (y * 10) as u8, 128]))
        .write_to(&mut Cursor::new(&mut out), ImageFormat::Png)
        .unwrap();
    out
}

/// Transform service answering from a script, tracking overlap between calls
pub struct ScriptedTransform {
    script: Mutex<VecDeque<Result<Vec<u8>>>>,
    pub calls: AtomicUsize,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    pub instructions: Mutex<Vec<String>>,
    delay: Duration,
}

impl ScriptedTransform {
    pub fn new(script: Vec<Result<Vec<u8>>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            instructions: Mutex::new(Vec::new()),
            delay: Duration::from_millis(5),
        }
    }

    /// Every call succeeds with a small PNG
    pub fn always_ok(count: usize) -> Self {
        Self::new((0..count).map(|_| Ok(png_bytes(3, 2))).collect())
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl TransformService for ScriptedTransform {
    async fn transform(
        &self,
        request: &TransformRequest,
        _credential: &Credential,
    ) -> Result<TransformedImage> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.instructions
            .lock()
            .unwrap()
            .push(request.instruction.clone());

        tokio::time::sleep(self.delay).await;
        let next = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Err(PipelineError::NoImageProduced));
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        next.map(|bytes| TransformedImage {
            bytes,
            mime_type: "image/png".to_string(),
            model: "scripted".to_string(),
        })
    }
}

/// Model backend answering from a script and recording prompts and models
pub struct ScriptedBackend {
    script: Mutex<VecDeque<Result<Vec<ContentPart>>>>,
    pub calls: Mutex<Vec<(String, Option<String>, String)>>,
}

impl ScriptedBackend {
    pub fn new(script: Vec<Result<Vec<ContentPart>>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn prompts(&self) -> Vec<String> {
        self.calls.lock().unwrap().iter().map(|c| c.2.clone()).collect()
    }

    pub fn models(&self) -> Vec<String> {
        self.calls.lock().unwrap().iter().map(|c| c.0.clone()).collect()
    }
}

/// Lets tests keep an `Arc` to inspect calls after handing the backend over
pub struct SharedBackend(pub Arc<ScriptedBackend>);

#[async_trait::async_trait]
impl ModelBackend for SharedBackend {
    async fn generate(&self, call: &ModelCall<'_>, _credential: &Credential) -> Result<Vec<ContentPart>> {
        self.0.calls.lock().unwrap().push((
            call.model.to_string(),
            call.image_size.map(str::to_string),
            call.prompt.to_string(),
        ));
        self.0
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Err(PipelineError::NoImageProduced))
    }

    async fn validate(&self, _credential: &Credential) -> Result<bool> {
        Ok(true)
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

pub fn image_part(bytes: Vec<u8>) -> ContentPart {
    ContentPart::Image {
        data: bytes,
        mime_type: "image/png".to_string(),
    }
}

pub struct AcceptAll;

#[async_trait::async_trait]
impl CredentialValidator for AcceptAll {
    async fn validate(&self, _credential: &Credential) -> Result<bool> {
        Ok(true)
    }
}

/// Acquisition flow that always hands out the same host key, or declines
pub struct CountingSource {
    pub requests: AtomicUsize,
    pub grant: bool,
}

impl CountingSource {
    pub fn declining() -> Arc<Self> {
        Arc::new(Self {
            requests: AtomicUsize::new(0),
            grant: false,
        })
    }

    pub fn granting() -> Arc<Self> {
        Arc::new(Self {
            requests: AtomicUsize::new(0),
            grant: true,
        })
    }
}

#[async_trait::async_trait]
impl CredentialSource for CountingSource {
    async fn acquire(&self) -> Option<SuppliedCredential> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        self.grant.then(|| SuppliedCredential {
            credential: Credential::new(HOST_KEY),
            origin: CredentialOrigin::HostPicker,
        })
    }
}

pub async fn credentials(active: bool, source: Arc<CountingSource>) -> Arc<CredentialManager> {
    let manager = CredentialManager::new(Arc::new(AcceptAll)).with_source(source);
    if active {
        manager
            .supply(SuppliedCredential {
                credential: Credential::new(HOST_KEY),
                origin: CredentialOrigin::HostPicker,
            })
            .await
            .unwrap();
    }
    Arc::new(manager)
}
