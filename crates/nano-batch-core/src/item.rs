//! Queue item lifecycle
//!
//! ```text
//!   idle ──claim──▶ processing ──complete──▶ success
//!    ▲                │   ▲                     │
//!    │               fail └──claim── error      │
//!    └──────────────reset────────────┴──────────┘
//! ```
//!
//! The result of the current run lives inside the `Success` state, so an
//! item can never be observed processing with a result attached. The last
//! good result of an earlier run is kept separately, governed by
//! [`ResultRetention`].

use crate::error::{PipelineError, Result};
use crate::models::{ImageMetadata, ItemId, ItemResult, ItemStatus, ResultRetention, SourceBlob};
use chrono::{DateTime, Utc};
use uuid::Uuid;

#[derive(Debug, Clone)]
enum ItemState {
    Idle,
    Processing { claimed_at: DateTime<Utc> },
    Success(ItemResult),
    Error { message: String },
}

/// One unit of work in the queue
#[derive(Debug, Clone)]
pub struct QueueItem {
    id: ItemId,
    source: SourceBlob,
    source_metadata: ImageMetadata,
    state: ItemState,
    previous_result: Option<ItemResult>,
    added_at: DateTime<Utc>,
}

impl QueueItem {
    pub fn new(source: SourceBlob, source_metadata: ImageMetadata) -> Self {
        Self {
            id: Uuid::new_v4(),
            source,
            source_metadata,
            state: ItemState::Idle,
            previous_result: None,
            added_at: Utc::now(),
        }
    }

    pub fn id(&self) -> ItemId {
        self.id
    }

    pub fn source(&self) -> &SourceBlob {
        &self.source
    }

    pub fn source_metadata(&self) -> &ImageMetadata {
        &self.source_metadata
    }

    pub fn added_at(&self) -> DateTime<Utc> {
        self.added_at
    }

    pub fn status(&self) -> ItemStatus {
        match self.state {
            ItemState::Idle => ItemStatus::Idle,
            ItemState::Processing { .. } => ItemStatus::Processing,
            ItemState::Success(_) => ItemStatus::Success,
            ItemState::Error { .. } => ItemStatus::Error,
        }
    }

    /// Present only in `error`
    pub fn error_message(&self) -> Option<&str> {
        match &self.state {
            ItemState::Error { message } => Some(message),
            _ => None,
        }
    }

    /// Present only in `success`
    pub fn result(&self) -> Option<&ItemResult> {
        match &self.state {
            ItemState::Success(result) => Some(result),
            _ => None,
        }
    }

    pub fn claimed_at(&self) -> Option<DateTime<Utc>> {
        match self.state {
            ItemState::Processing { claimed_at } => Some(claimed_at),
            _ => None,
        }
    }

    /// Result to show on the item card: the current one, else a retained
    /// result from an earlier run.
    pub fn displayed_result(&self) -> Option<&ItemResult> {
        self.result().or(self.previous_result.as_ref())
    }

    /// `idle | error -> processing`. Clears the error message.
    pub fn claim(&mut self, retention: ResultRetention) -> Result<ItemStatus> {
        let from = self.status();
        match self.state {
            ItemState::Idle | ItemState::Error { .. } => {
                if retention == ResultRetention::Discard {
                    self.previous_result = None;
                }
                self.state = ItemState::Processing {
                    claimed_at: Utc::now(),
                };
                Ok(from)
            }
            ItemState::Processing { .. } => Err(PipelineError::AlreadyClaimed { id: self.id }),
            ItemState::Success(_) => Err(PipelineError::InvalidTransition {
                from,
                to: ItemStatus::Processing,
            }),
        }
    }

    /// `processing -> success`
    pub fn complete(&mut self, result: ItemResult) -> Result<()> {
        self.expect_processing(ItemStatus::Success)?;
        self.previous_result = None;
        self.state = ItemState::Success(result);
        Ok(())
    }

    /// `processing -> error`
    pub fn fail(&mut self, message: impl Into<String>) -> Result<()> {
        self.expect_processing(ItemStatus::Error)?;
        self.state = ItemState::Error {
            message: message.into(),
        };
        Ok(())
    }

    /// Explicit reset to `idle` for a manual re-run. A success result is
    /// kept as the previous result.
    pub fn reset(&mut self) -> Result<ItemStatus> {
        let from = self.status();
        match std::mem::replace(&mut self.state, ItemState::Idle) {
            ItemState::Success(result) => {
                self.previous_result = Some(result);
                Ok(from)
            }
            ItemState::Idle | ItemState::Error { .. } => Ok(from),
            processing @ ItemState::Processing { .. } => {
                self.state = processing;
                Err(PipelineError::AlreadyClaimed { id: self.id })
            }
        }
    }

    fn expect_processing(&self, to: ItemStatus) -> Result<()> {
        match self.state {
            ItemState::Processing { .. } => Ok(()),
            _ => Err(PipelineError::InvalidTransition {
                from: self.status(),
                to,
            }),
        }
    }
}
