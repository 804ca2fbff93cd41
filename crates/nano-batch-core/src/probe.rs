//! Metadata prober: dimensions, size and type of an intake image

use crate::error::{PipelineError, Result};
use crate::models::ImageMetadata;
use std::io::Cursor;
use tracing::{debug, warn};

/// Read the pixel dimensions of an encoded image without decoding pixels.
/// Unreadable headers report `0x0`; intake never fails on a corrupt image.
pub fn probe(bytes: &[u8], mime_type: &str) -> ImageMetadata {
    let (width, height) = match read_dimensions(bytes) {
        Ok(dimensions) => dimensions,
        Err(e) => {
            warn!("Could not read image dimensions ({}): {}", mime_type, e);
            (0, 0)
        }
    };

    ImageMetadata {
        width,
        height,
        size_bytes: bytes.len() as u64,
        mime_type: mime_type.to_string(),
    }
}

/// Async variant that parses the header on the blocking pool
pub async fn probe_async(bytes: &[u8], mime_type: &str) -> ImageMetadata {
    let owned = bytes.to_vec();
    let mime = mime_type.to_string();
    match tokio::task::spawn_blocking(move || probe(&owned, &mime)).await {
        Ok(metadata) => metadata,
        Err(e) => {
            warn!("Probe task failed: {}", e);
            ImageMetadata {
                width: 0,
                height: 0,
                size_bytes: bytes.len() as u64,
                mime_type: mime_type.to_string(),
            }
        }
    }
}

fn read_dimensions(bytes: &[u8]) -> Result<(u32, u32)> {
    let reader = image::ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(PipelineError::Io)?;

    let dimensions = reader
        .into_dimensions()
        .map_err(PipelineError::conversion)?;
    debug!("Probed dimensions {}x{}", dimensions.0, dimensions.1);
    Ok(dimensions)
}
