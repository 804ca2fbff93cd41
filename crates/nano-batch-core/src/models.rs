//! Core data models for the batch pipeline

use crate::config::{ExportFormat, GenerationConfig};
use crate::error::{PipelineError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for queue items
pub type ItemId = Uuid;

/// Pixel dimensions, byte size and declared type of an image
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageMetadata {
    pub width: u32,
    pub height: u32,
    pub size_bytes: u64,
    pub mime_type: String,
}

/// Lifecycle state of a queue item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    Idle,
    Processing,
    Success,
    Error,
}

impl ItemStatus {
    /// Statuses the batch run picks up
    pub fn is_eligible(&self) -> bool {
        matches!(self, ItemStatus::Idle | ItemStatus::Error)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ItemStatus::Success | ItemStatus::Error)
    }
}

impl std::fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ItemStatus::Idle => "idle",
            ItemStatus::Processing => "processing",
            ItemStatus::Success => "success",
            ItemStatus::Error => "error",
        };
        f.write_str(s)
    }
}

/// Target aspect ratio requested from the remote model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AspectRatio {
    #[serde(rename = "1:1")]
    Square,
    #[serde(rename = "3:4")]
    Portrait,
    #[serde(rename = "4:3")]
    Landscape,
    #[serde(rename = "9:16")]
    Mobile,
    #[serde(rename = "16:9")]
    Widescreen,
}

impl AspectRatio {
    pub const ALL: [AspectRatio; 5] = [
        AspectRatio::Square,
        AspectRatio::Portrait,
        AspectRatio::Landscape,
        AspectRatio::Mobile,
        AspectRatio::Widescreen,
    ];

    /// Wire value, e.g. `16:9`
    pub fn as_str(&self) -> &'static str {
        match self {
            AspectRatio::Square => "1:1",
            AspectRatio::Portrait => "3:4",
            AspectRatio::Landscape => "4:3",
            AspectRatio::Mobile => "9:16",
            AspectRatio::Widescreen => "16:9",
        }
    }

    /// Natural-language framing used in the instruction sent to the model
    pub fn framing(&self) -> &'static str {
        match self {
            AspectRatio::Square => "square format (1:1 aspect ratio)",
            AspectRatio::Portrait => "portrait format (3:4 aspect ratio)",
            AspectRatio::Landscape => "landscape format (4:3 aspect ratio)",
            AspectRatio::Mobile => "vertical mobile format (9:16 aspect ratio)",
            AspectRatio::Widescreen => "widescreen landscape format (16:9 aspect ratio)",
        }
    }
}

impl std::str::FromStr for AspectRatio {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        AspectRatio::ALL
            .into_iter()
            .find(|ratio| ratio.as_str() == s.trim())
            .ok_or_else(|| PipelineError::InvalidInput {
                message: format!("unsupported aspect ratio '{}'", s),
            })
    }
}

impl std::fmt::Display for AspectRatio {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Quality/cost class of the remote transform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelTier {
    #[default]
    Pro,
    Standard,
}

impl std::str::FromStr for ModelTier {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pro" => Ok(ModelTier::Pro),
            "standard" | "flash" => Ok(ModelTier::Standard),
            other => Err(PipelineError::InvalidInput {
                message: format!("unsupported model tier '{}'", other),
            }),
        }
    }
}

/// What happens to an earlier result when the item is run again.
///
/// `RetainPrevious` keeps the last good result visible while a retry is in
/// flight and after it fails; `Discard` drops it as soon as the item is
/// claimed again. Either way the previous result never counts as the
/// current run's result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultRetention {
    #[default]
    RetainPrevious,
    Discard,
}

/// Process-wide generation settings, read when each item is processed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationSettings {
    pub instruction: String,
    pub aspect_ratio: AspectRatio,
    pub export_format: ExportFormat,
    pub tier: ModelTier,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self::from_config(&GenerationConfig::default(), ExportFormat::default())
    }
}

impl GenerationSettings {
    pub fn from_config(config: &GenerationConfig, export_format: ExportFormat) -> Self {
        Self {
            instruction: config.instruction.clone(),
            aspect_ratio: config.aspect_ratio,
            export_format,
            tier: config.tier,
        }
    }
}

/// Session usage ledger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreditInfo {
    pub session_generations: u64,
    pub estimated_session_cost: f64,
    pub cost_per_image: f64,
}

/// Raw input bytes owned by a queue item
#[derive(Debug, Clone)]
pub struct SourceBlob {
    pub bytes: Vec<u8>,
    pub file_name: Option<String>,
}

impl SourceBlob {
    /// Display handle for the blob, as a `data:` URI
    pub fn display_uri(&self, mime_type: &str) -> String {
        use base64::Engine;
        format!(
            "data:{};base64,{}",
            mime_type,
            base64::engine::general_purpose::STANDARD.encode(&self.bytes)
        )
    }
}

/// Output of a successful run
#[derive(Debug, Clone)]
pub struct ItemResult {
    pub bytes: Vec<u8>,
    pub metadata: ImageMetadata,
    pub format: ExportFormat,
    pub completed_at: DateTime<Utc>,
}

/// Item status change broadcast to observers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemStatusUpdate {
    pub item_id: ItemId,
    pub old_status: ItemStatus,
    pub new_status: ItemStatus,
    pub timestamp: DateTime<Utc>,
    pub message: Option<String>,
}
