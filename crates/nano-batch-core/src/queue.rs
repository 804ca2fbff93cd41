//! In-memory image queue with claim/release ownership of items

use crate::error::{PipelineError, Result};
use crate::item::QueueItem;
use crate::models::{ItemId, ItemResult, ItemStatus, ItemStatusUpdate, ResultRetention, SourceBlob};
use crate::probe;
use crate::utils::format;
use chrono::Utc;
use std::path::Path;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info, warn};

const STATUS_CHANNEL_CAPACITY: usize = 256;

/// A blob offered to the queue
#[derive(Debug, Clone)]
pub struct IntakeFile {
    pub bytes: Vec<u8>,
    /// Declared type; detected from the bytes and file name when absent
    pub mime_type: Option<String>,
    pub file_name: Option<String>,
}

impl IntakeFile {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            mime_type: None,
            file_name: None,
        }
    }

    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }

    pub fn with_file_name(mut self, file_name: impl Into<String>) -> Self {
        self.file_name = Some(file_name.into());
        self
    }

    fn resolve_mime(&self) -> Option<String> {
        if let Some(declared) = &self.mime_type {
            return Some(declared.trim().to_ascii_lowercase());
        }
        format::detect_mime_from_header(&self.bytes)
            .or_else(|| {
                self.file_name
                    .as_deref()
                    .and_then(|name| format::detect_mime_from_extension(Path::new(name)))
            })
            .map(str::to_string)
    }
}

/// Ownership token for one item in `processing`
#[derive(Debug, Clone)]
pub struct ClaimedItem {
    pub id: ItemId,
    pub bytes: Vec<u8>,
    pub mime_type: String,
    /// Status the item was claimed from
    pub claimed_from: ItemStatus,
}

/// Ordered collection of queue items.
///
/// Every state change goes through the write lock, so checking an item's
/// status and moving it to `processing` is one atomic step; two workers can
/// never both own the same item.
pub struct ImageQueue {
    items: RwLock<Vec<QueueItem>>,
    retention: ResultRetention,
    status_sender: broadcast::Sender<ItemStatusUpdate>,
}

impl Default for ImageQueue {
    fn default() -> Self {
        Self::new(ResultRetention::default())
    }
}

impl ImageQueue {
    pub fn new(retention: ResultRetention) -> Self {
        let (status_sender, _) = broadcast::channel(STATUS_CHANNEL_CAPACITY);
        Self {
            items: RwLock::new(Vec::new()),
            retention,
            status_sender,
        }
    }

    pub fn retention(&self) -> ResultRetention {
        self.retention
    }

    /// Receive every status transition from now on
    pub fn subscribe(&self) -> broadcast::Receiver<ItemStatusUpdate> {
        self.status_sender.subscribe()
    }

    /// Accept one image. Non-image blobs are rejected with
    /// [`PipelineError::Intake`].
    pub async fn add(&self, file: IntakeFile) -> Result<ItemId> {
        let mime_type = match file.resolve_mime() {
            Some(mime) if format::is_image_mime(&mime) => mime,
            other => {
                return Err(PipelineError::Intake {
                    mime_type: other.unwrap_or_else(|| "unknown".to_string()),
                })
            }
        };

        let metadata = probe::probe_async(&file.bytes, &mime_type).await;
        let item = QueueItem::new(
            SourceBlob {
                bytes: file.bytes,
                file_name: file.file_name,
            },
            metadata,
        );
        let id = item.id();

        self.items.write().await.push(item);
        self.publish(id, ItemStatus::Idle, ItemStatus::Idle, Some("Added to queue".to_string()));
        info!("Item {} added ({})", id, mime_type);
        Ok(id)
    }

    /// Accept a batch, silently skipping anything that is not an image
    pub async fn add_many(&self, files: Vec<IntakeFile>) -> Vec<ItemId> {
        let mut ids = Vec::with_capacity(files.len());
        for file in files {
            let name = file.file_name.clone().unwrap_or_default();
            match self.add(file).await {
                Ok(id) => ids.push(id),
                Err(PipelineError::Intake { mime_type }) => {
                    debug!("Skipping non-image input {} ({})", name, mime_type);
                }
                Err(e) => warn!("Failed to add {}: {}", name, e),
            }
        }
        ids
    }

    /// Read a file from disk and add it
    pub async fn add_path(&self, path: &Path) -> Result<ItemId> {
        let bytes = tokio::fs::read(path).await?;
        let mut file = IntakeFile::new(bytes);
        if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
            file = file.with_file_name(name);
        }
        self.add(file).await
    }

    /// Drop an item together with its source and result. A worker still
    /// holding the claim finds the item gone when it reports back.
    pub async fn remove(&self, id: ItemId) -> Result<QueueItem> {
        let mut items = self.items.write().await;
        let index = items
            .iter()
            .position(|item| item.id() == id)
            .ok_or(PipelineError::ItemNotFound { id })?;
        let item = items.remove(index);
        info!("Item {} removed ({})", id, item.status());
        Ok(item)
    }

    pub async fn get(&self, id: ItemId) -> Option<QueueItem> {
        self.items.read().await.iter().find(|item| item.id() == id).cloned()
    }

    pub async fn status(&self, id: ItemId) -> Option<ItemStatus> {
        self.items
            .read()
            .await
            .iter()
            .find(|item| item.id() == id)
            .map(QueueItem::status)
    }

    /// Snapshot of all items in insertion order
    pub async fn items(&self) -> Vec<QueueItem> {
        self.items.read().await.clone()
    }

    /// Ids currently in `idle` or `error`, in insertion order
    pub async fn eligible_ids(&self) -> Vec<ItemId> {
        self.items
            .read()
            .await
            .iter()
            .filter(|item| item.status().is_eligible())
            .map(QueueItem::id)
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.items.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.items.read().await.is_empty()
    }

    /// Results of the current run for every `success` item
    pub async fn successful_results(&self) -> Vec<(ItemId, ItemResult)> {
        self.items
            .read()
            .await
            .iter()
            .filter_map(|item| item.result().map(|result| (item.id(), result.clone())))
            .collect()
    }

    /// Take ownership of an `idle` or `error` item
    pub async fn claim(&self, id: ItemId) -> Result<ClaimedItem> {
        self.claim_inner(id, false).await
    }

    /// Claim for a manual re-run; a `success` item is reset first
    pub async fn claim_manual(&self, id: ItemId) -> Result<ClaimedItem> {
        self.claim_inner(id, true).await
    }

    async fn claim_inner(&self, id: ItemId, reset_success: bool) -> Result<ClaimedItem> {
        let mut items = self.items.write().await;
        let item = find_mut(&mut items, id)?;

        if reset_success && item.status() == ItemStatus::Success {
            item.reset()?;
            self.publish(id, ItemStatus::Success, ItemStatus::Idle, Some("Reset for re-run".to_string()));
        }

        let claimed_from = item.claim(self.retention)?;
        self.publish(id, claimed_from, ItemStatus::Processing, None);
        debug!("Item {} claimed from {}", id, claimed_from);

        Ok(ClaimedItem {
            id,
            bytes: item.source().bytes.clone(),
            mime_type: item.source_metadata().mime_type.clone(),
            claimed_from,
        })
    }

    /// `processing -> success`
    pub async fn complete(&self, id: ItemId, result: ItemResult) -> Result<()> {
        let mut items = self.items.write().await;
        let item = find_mut(&mut items, id)?;
        item.complete(result)?;
        self.publish(id, ItemStatus::Processing, ItemStatus::Success, None);
        Ok(())
    }

    /// `processing -> error`
    pub async fn fail(&self, id: ItemId, message: impl Into<String>) -> Result<()> {
        let message = message.into();
        let mut items = self.items.write().await;
        let item = find_mut(&mut items, id)?;
        item.fail(message.clone())?;
        self.publish(id, ItemStatus::Processing, ItemStatus::Error, Some(message));
        Ok(())
    }

    /// Explicit reset back to `idle`
    pub async fn reset(&self, id: ItemId) -> Result<()> {
        let mut items = self.items.write().await;
        let item = find_mut(&mut items, id)?;
        let from = item.reset()?;
        if from != ItemStatus::Idle {
            self.publish(id, from, ItemStatus::Idle, Some("Reset".to_string()));
        }
        Ok(())
    }

    fn publish(&self, item_id: ItemId, old_status: ItemStatus, new_status: ItemStatus, message: Option<String>) {
        let update = ItemStatusUpdate {
            item_id,
            old_status,
            new_status,
            timestamp: Utc::now(),
            message,
        };
        // No subscribers is the normal headless case
        if self.status_sender.send(update).is_err() {
            debug!("No status subscribers for item {}", item_id);
        }
    }
}

fn find_mut(items: &mut [QueueItem], id: ItemId) -> Result<&mut QueueItem> {
    items
        .iter_mut()
        .find(|item| item.id() == id)
        .ok_or(PipelineError::ItemNotFound { id })
}
