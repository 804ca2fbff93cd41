//! Queue scheduler: drives items through transform, conversion and
//! completion, one at a time.

use crate::accountant::UsageAccountant;
use crate::client::{TransformRequest, TransformService};
use crate::credential::{Credential, CredentialManager};
use crate::error::{PipelineError, Result};
use crate::format_converter::FormatConverter;
use crate::models::{GenerationSettings, ItemId, ItemResult};
use crate::queue::{ClaimedItem, ImageQueue};
use crate::utils::performance::Timer;
use chrono::Utc;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{error, info, instrument, warn};

/// What happened to one item during a run
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ItemOutcome {
    Succeeded,
    Failed {
        message: String,
        error_type: String,
        credential_rejected: bool,
    },
    /// No active credential; the item was left untouched
    CredentialRequired,
    /// Not processed: claimed elsewhere, removed, or no longer eligible
    Skipped { reason: String },
}

/// Summary of a `process_all` run
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchReport {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    /// The run stopped because no credential was active
    pub credential_required: bool,
    pub outcomes: Vec<(ItemId, ItemOutcome)>,
}

impl BatchReport {
    fn record(&mut self, id: ItemId, outcome: ItemOutcome) {
        match &outcome {
            ItemOutcome::Succeeded => {
                self.attempted += 1;
                self.succeeded += 1;
            }
            ItemOutcome::Failed { .. } => {
                self.attempted += 1;
                self.failed += 1;
            }
            ItemOutcome::Skipped { .. } => self.skipped += 1,
            ItemOutcome::CredentialRequired => self.credential_required = true,
        }
        self.outcomes.push((id, outcome));
    }
}

/// Clears the busy flag when the batch ends, however it ends
struct BusyGuard<'a>(&'a AtomicBool);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct QueueScheduler {
    queue: Arc<ImageQueue>,
    transform: Arc<dyn TransformService>,
    converter: FormatConverter,
    settings: Arc<RwLock<GenerationSettings>>,
    credentials: Arc<CredentialManager>,
    accountant: Arc<UsageAccountant>,
    busy: AtomicBool,
}

impl QueueScheduler {
    pub fn new(
        queue: Arc<ImageQueue>,
        transform: Arc<dyn TransformService>,
        credentials: Arc<CredentialManager>,
        accountant: Arc<UsageAccountant>,
    ) -> Self {
        Self {
            queue,
            transform,
            converter: FormatConverter::new(),
            settings: Arc::new(RwLock::new(GenerationSettings::default())),
            credentials,
            accountant,
            busy: AtomicBool::new(false),
        }
    }

    pub fn with_settings(mut self, settings: GenerationSettings) -> Self {
        self.settings = Arc::new(RwLock::new(settings));
        self
    }

    pub fn with_converter(mut self, converter: FormatConverter) -> Self {
        self.converter = converter;
        self
    }

    pub fn queue(&self) -> &Arc<ImageQueue> {
        &self.queue
    }

    pub fn accountant(&self) -> &Arc<UsageAccountant> {
        &self.accountant
    }

    pub fn credentials(&self) -> &Arc<CredentialManager> {
        &self.credentials
    }

    /// Shared settings handle; changes apply to items processed afterwards
    pub fn settings_handle(&self) -> Arc<RwLock<GenerationSettings>> {
        Arc::clone(&self.settings)
    }

    pub async fn settings(&self) -> GenerationSettings {
        self.settings.read().await.clone()
    }

    pub async fn update_settings(&self, settings: GenerationSettings) {
        *self.settings.write().await = settings;
    }

    /// Whether a batch run is in progress
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    /// Process one item on demand. A `success` item is reset and re-run.
    #[instrument(skip(self), fields(item_id = %id))]
    pub async fn process_one(&self, id: ItemId) -> Result<ItemOutcome> {
        let Some(credential) = self.credentials.current().await else {
            warn!("No active API key; starting credential acquisition");
            self.credentials.acquire().await?;
            return Ok(ItemOutcome::CredentialRequired);
        };

        let claimed = self.queue.claim_manual(id).await?;
        Ok(self.drive(claimed, &credential).await)
    }

    /// Process every item that is `idle` or `error` when the call starts,
    /// strictly one after another.
    pub async fn process_all(&self) -> Result<BatchReport> {
        if self
            .busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(PipelineError::BatchInProgress);
        }
        let _busy = BusyGuard(&self.busy);

        let mut report = BatchReport::default();
        if !self.credentials.is_active().await {
            warn!("No active API key; starting credential acquisition");
            self.credentials.acquire().await?;
            report.credential_required = true;
            return Ok(report);
        }

        let snapshot = self.queue.eligible_ids().await;
        let timer = Timer::new("batch");
        info!("Starting batch of {} items", snapshot.len());

        let mut acquisition_started = false;
        for id in snapshot {
            let Some(credential) = self.credentials.current().await else {
                if !acquisition_started {
                    warn!("API key lost mid-batch; starting credential acquisition");
                    self.credentials.acquire().await?;
                }
                report.credential_required = true;
                break;
            };

            let claimed = match self.queue.claim(id).await {
                Ok(claimed) => claimed,
                Err(e) => {
                    info!("Skipping item {}: {}", id, e);
                    report.record(id, ItemOutcome::Skipped { reason: e.to_string() });
                    continue;
                }
            };

            let outcome = self.drive(claimed, &credential).await;
            if matches!(
                outcome,
                ItemOutcome::Failed {
                    credential_rejected: true,
                    ..
                }
            ) {
                acquisition_started = true;
            }
            report.record(id, outcome);
        }

        info!(
            "Batch finished in {}ms: {} succeeded, {} failed, {} skipped",
            timer.elapsed_ms(),
            report.succeeded,
            report.failed,
            report.skipped
        );
        Ok(report)
    }

    /// Run a claimed item to `success` or `error`
    #[instrument(skip(self, claimed, credential), fields(item_id = %claimed.id))]
    async fn drive(&self, claimed: ClaimedItem, credential: &Credential) -> ItemOutcome {
        let id = claimed.id;

        match self.produce(claimed, credential).await {
            Ok(result) => match self.queue.complete(id, result).await {
                Ok(()) => {
                    self.accountant.record_success();
                    info!("Item {} succeeded", id);
                    ItemOutcome::Succeeded
                }
                Err(e) => {
                    warn!("Discarding result for item {}: {}", id, e);
                    ItemOutcome::Skipped { reason: e.to_string() }
                }
            },
            Err(e) => {
                let credential_rejected = e.invalidates_credential();
                if credential_rejected {
                    self.credentials.invalidate().await;
                    if let Err(acquire_error) = self.credentials.acquire().await {
                        error!("Credential acquisition failed: {}", acquire_error);
                    }
                }

                let message = e.to_string();
                warn!("Item {} failed ({}): {}", id, e.error_type(), message);
                if let Err(fail_error) = self.queue.fail(id, message.clone()).await {
                    warn!("Could not record failure for item {}: {}", id, fail_error);
                    return ItemOutcome::Skipped {
                        reason: fail_error.to_string(),
                    };
                }

                ItemOutcome::Failed {
                    message,
                    error_type: e.error_type().to_string(),
                    credential_rejected,
                }
            }
        }
    }

    async fn produce(&self, claimed: ClaimedItem, credential: &Credential) -> Result<ItemResult> {
        let settings = self.settings().await;
        let request = TransformRequest {
            image_bytes: claimed.bytes,
            mime_type: claimed.mime_type,
            instruction: settings.instruction,
            aspect_ratio: settings.aspect_ratio,
            tier: settings.tier,
        };

        let transformed = self.transform.transform(&request, credential).await?;
        let converted = self
            .converter
            .convert(transformed.bytes, &transformed.mime_type, settings.export_format)
            .await?;

        Ok(ItemResult {
            metadata: converted.metadata(),
            bytes: converted.data,
            format: converted.format,
            completed_at: Utc::now(),
        })
    }
}
