//! Error types for the batch transformation pipeline

use crate::models::{ItemId, ItemStatus};

/// Main error type for pipeline operations
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Not an image: {mime_type}")]
    Intake { mime_type: String },

    #[error("{message}")]
    Transform { message: String },

    /// The model answered with text instead of an image.
    #[error("{text}")]
    Refusal { text: String },

    #[error("No image produced by the model")]
    NoImageProduced,

    #[error("{message}")]
    Credential { message: String },

    #[error("API key required")]
    CredentialMissing,

    #[error("Image conversion failed: {message}")]
    Conversion { message: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Archive error: {message}")]
    Archive { message: String },

    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("Logging initialization failed: {message}")]
    LoggingError { message: String },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Item {id} not found")]
    ItemNotFound { id: ItemId },

    #[error("Item {id} is already being processed")]
    AlreadyClaimed { id: ItemId },

    #[error("Cannot move item from {from} to {to}")]
    InvalidTransition { from: ItemStatus, to: ItemStatus },

    #[error("A batch run is already in progress")]
    BatchInProgress,
}

impl PipelineError {
    /// Get the error type as a string for categorization
    pub fn error_type(&self) -> &'static str {
        match self {
            PipelineError::Io(_) => "io_error",
            PipelineError::Intake { .. } => "intake_error",
            PipelineError::Transform { .. } => "transform_error",
            PipelineError::Refusal { .. } => "model_refusal",
            PipelineError::NoImageProduced => "no_image_produced",
            PipelineError::Credential { .. } => "credential_error",
            PipelineError::CredentialMissing => "credential_missing",
            PipelineError::Conversion { .. } => "conversion_error",
            PipelineError::Http(_) => "http_error",
            PipelineError::Serialization(_) => "serialization_error",
            PipelineError::Archive { .. } => "archive_error",
            PipelineError::ConfigError { .. } => "config_error",
            PipelineError::LoggingError { .. } => "logging_error",
            PipelineError::InvalidInput { .. } => "invalid_input",
            PipelineError::ItemNotFound { .. } => "item_not_found",
            PipelineError::AlreadyClaimed { .. } => "already_claimed",
            PipelineError::InvalidTransition { .. } => "invalid_transition",
            PipelineError::BatchInProgress => "batch_in_progress",
        }
    }

    /// Whether the remote service rejected the credential itself, which
    /// forces re-acquisition instead of a plain retry.
    pub fn invalidates_credential(&self) -> bool {
        matches!(self, PipelineError::Credential { .. })
    }

    /// Whether this error belongs on a queue item's card rather than
    /// aborting the caller.
    pub fn is_item_error(&self) -> bool {
        matches!(
            self,
            PipelineError::Transform { .. }
                | PipelineError::Refusal { .. }
                | PipelineError::NoImageProduced
                | PipelineError::Credential { .. }
                | PipelineError::Conversion { .. }
                | PipelineError::Http(_)
                | PipelineError::Serialization(_)
                | PipelineError::Io(_)
        )
    }

    pub(crate) fn transform(message: impl Into<String>) -> Self {
        PipelineError::Transform {
            message: message.into(),
        }
    }

    pub(crate) fn conversion(message: impl std::fmt::Display) -> Self {
        PipelineError::Conversion {
            message: message.to_string(),
        }
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, PipelineError>;
