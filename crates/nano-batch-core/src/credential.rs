//! Credential lifecycle: absent, supplied, validated, active

use crate::error::{PipelineError, Result};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

const MIN_MANUAL_KEY_LEN: usize = 30;
const MANUAL_KEY_PREFIX: &str = "AI";

/// Secret token authorizing remote transform calls
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into().trim().to_string())
    }

    /// Check the shape of a hand-typed key before it is sent anywhere
    pub fn parse_manual(input: &str) -> Result<Self> {
        let key = input.trim();
        if key.len() < MIN_MANUAL_KEY_LEN || !key.starts_with(MANUAL_KEY_PREFIX) {
            return Err(PipelineError::InvalidInput {
                message: "Invalid API Key format. It should start with \"AI\".".to_string(),
            });
        }
        Ok(Self(key.to_string()))
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

/// Where a supplied credential came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialOrigin {
    /// Host-provided secure picker; trusted without a validation call
    HostPicker,
    /// Typed in by the user; validated before activation
    Manual,
}

#[derive(Debug, Clone)]
pub struct SuppliedCredential {
    pub credential: Credential,
    pub origin: CredentialOrigin,
}

/// Acquisition flow run whenever a credential is needed
#[async_trait::async_trait]
pub trait CredentialSource: Send + Sync {
    /// Ask the host for a fresh credential; `None` when the user declines
    async fn acquire(&self) -> Option<SuppliedCredential>;
}

/// Checks a credential against the remote service
#[async_trait::async_trait]
pub trait CredentialValidator: Send + Sync {
    async fn validate(&self, credential: &Credential) -> Result<bool>;
}

/// Process-wide holder of the active credential
pub struct CredentialManager {
    active: RwLock<Option<Credential>>,
    validator: Arc<dyn CredentialValidator>,
    source: Option<Arc<dyn CredentialSource>>,
    acquisitions: AtomicUsize,
}

impl CredentialManager {
    pub fn new(validator: Arc<dyn CredentialValidator>) -> Self {
        Self {
            active: RwLock::new(None),
            validator,
            source: None,
            acquisitions: AtomicUsize::new(0),
        }
    }

    pub fn with_source(mut self, source: Arc<dyn CredentialSource>) -> Self {
        self.source = Some(source);
        self
    }

    /// The active credential, copied out; callers keep using this value
    /// even if the shared one changes mid-request.
    pub async fn current(&self) -> Option<Credential> {
        self.active.read().await.clone()
    }

    pub async fn is_active(&self) -> bool {
        self.active.read().await.is_some()
    }

    /// Number of times the acquisition flow has been triggered
    pub fn acquisition_count(&self) -> usize {
        self.acquisitions.load(Ordering::SeqCst)
    }

    /// Validate (when required) and activate a supplied credential.
    /// Returns whether the credential is now active.
    pub async fn supply(&self, supplied: SuppliedCredential) -> Result<bool> {
        if supplied.origin == CredentialOrigin::Manual {
            let credential = Credential::parse_manual(supplied.credential.expose())?;
            if !self.validator.validate(&credential).await? {
                warn!("Manually entered API key was rejected by the validation endpoint");
                return Ok(false);
            }
        }

        *self.active.write().await = Some(supplied.credential);
        info!("API key activated ({:?})", supplied.origin);
        Ok(true)
    }

    /// Run the acquisition flow. Returns whether a credential became active.
    pub async fn acquire(&self) -> Result<bool> {
        self.acquisitions.fetch_add(1, Ordering::SeqCst);

        let Some(source) = &self.source else {
            warn!("API key required but no credential source is configured");
            return Ok(false);
        };

        match source.acquire().await {
            Some(supplied) => self.supply(supplied).await,
            None => {
                info!("Credential acquisition declined");
                Ok(false)
            }
        }
    }

    /// Drop the active credential after the service rejected it
    pub async fn invalidate(&self) {
        let previous = self.active.write().await.take();
        if previous.is_some() {
            warn!("API key invalidated by the remote service");
        }
    }
}
