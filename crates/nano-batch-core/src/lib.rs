//! # Nano Batch Core
//!
//! Batch image transformation pipeline: images are queued, sent one at a time
//! to a remote generative-image service with a user instruction and target
//! aspect ratio, converted to the chosen export format, and exported as an
//! archive. Usage and estimated cost are tracked per session.

pub mod accountant;
pub mod client;
pub mod config;
pub mod credential;
pub mod error;
pub mod export;
pub mod format_converter;
pub mod item;
pub mod logging;
pub mod models;
pub mod probe;
pub mod queue;
pub mod scheduler;
pub mod utils;

// Re-export commonly used types
pub use accountant::UsageAccountant;
pub use client::{RemoteTransformClient, TransformRequest, TransformService, TransformedImage};
pub use config::*;
pub use credential::{Credential, CredentialManager, CredentialOrigin, CredentialSource, SuppliedCredential};
pub use error::*;
pub use export::ExportAggregator;
pub use format_converter::FormatConverter;
pub use item::QueueItem;
pub use logging::*;
pub use models::*;
pub use queue::{ImageQueue, IntakeFile};
pub use scheduler::{BatchReport, ItemOutcome, QueueScheduler};

/// Initialize the library's logging from configuration
pub fn init(config: &LoggingConfig) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    let guard = logging::init_logging(config)?;
    tracing::info!("Nano Batch Core {} initialized", version());
    Ok(guard)
}

/// Get the version of the core library
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
