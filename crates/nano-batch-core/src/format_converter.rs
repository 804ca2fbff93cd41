//! Format conversion of generated images into the chosen export format

use crate::config::ExportFormat;
use crate::error::{PipelineError, Result};
use crate::models::ImageMetadata;
use crate::utils::encoding;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use image::codecs::webp::WebPEncoder;
use image::{DynamicImage, ImageReader};
use std::io::Cursor;
use tracing::{debug, info, instrument};

/// Re-encoded image plus the facts recorded on the queue item
#[derive(Debug, Clone)]
pub struct ConvertedImage {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Estimated from the encoded payload, see [`encoding::estimate_size_bytes`]
    pub size_bytes: u64,
    pub format: ExportFormat,
}

impl ConvertedImage {
    pub fn metadata(&self) -> ImageMetadata {
        ImageMetadata {
            width: self.width,
            height: self.height,
            size_bytes: self.size_bytes,
            mime_type: self.format.mime_type().to_string(),
        }
    }
}

/// Encoder settings applied to every export
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompressionOptions {
    /// Quality setting (1-100) for JPEG
    pub jpeg_quality: u8,
    /// Favour smaller PNG output over encode speed
    pub png_best_compression: bool,
}

impl Default for CompressionOptions {
    fn default() -> Self {
        Self::high_quality()
    }
}

impl CompressionOptions {
    /// Fixed high-quality settings used for exports
    pub fn high_quality() -> Self {
        Self {
            jpeg_quality: 92,
            png_best_compression: true,
        }
    }
}

/// Converts produced images into export formats with the `image` crate
#[derive(Debug, Clone, Default)]
pub struct FormatConverter {
    options: CompressionOptions,
}

impl FormatConverter {
    /// Create a new format converter with the fixed high-quality settings
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: CompressionOptions) -> Self {
        Self { options }
    }

    pub fn supported_output_formats(&self) -> &'static [ExportFormat] {
        &ExportFormat::ALL
    }

    /// Decode `bytes` (declared as `source_mime`) and re-encode as `target`.
    /// Codec work runs on the blocking pool.
    #[instrument(skip(self, bytes), fields(len = bytes.len()))]
    pub async fn convert(
        &self,
        bytes: Vec<u8>,
        source_mime: &str,
        target: ExportFormat,
    ) -> Result<ConvertedImage> {
        let options = self.options;
        let source_mime = source_mime.to_string();

        let converted = tokio::task::spawn_blocking(move || {
            Self::convert_blocking(&bytes, &source_mime, target, options)
        })
        .await
        .map_err(|e| PipelineError::Conversion {
            message: format!("Failed to spawn conversion task: {}", e),
        })??;

        info!(
            "Converted image to {} ({}x{}, ~{} bytes)",
            target, converted.width, converted.height, converted.size_bytes
        );
        Ok(converted)
    }

    /// Synchronous conversion, for callers already off the async runtime
    pub fn convert_blocking(
        bytes: &[u8],
        source_mime: &str,
        target: ExportFormat,
        options: CompressionOptions,
    ) -> Result<ConvertedImage> {
        let image = Self::decode(bytes, source_mime)?;
        let (width, height) = (image.width(), image.height());
        debug!("Decoded {}x{} {:?}", width, height, image.color());

        let data = Self::encode(&image, target, options)?;
        let size_bytes = encoding::estimate_size_bytes(target.mime_type(), &data);

        Ok(ConvertedImage {
            data,
            width,
            height,
            size_bytes,
            format: target,
        })
    }

    fn decode(bytes: &[u8], source_mime: &str) -> Result<DynamicImage> {
        let mut reader = ImageReader::new(Cursor::new(bytes))
            .with_guessed_format()
            .map_err(PipelineError::conversion)?;

        if reader.format().is_none() {
            if let Some(hint) = image::ImageFormat::from_mime_type(source_mime) {
                reader.set_format(hint);
            }
        }

        reader.decode().map_err(PipelineError::conversion)
    }

    fn encode(
        image: &DynamicImage,
        target: ExportFormat,
        options: CompressionOptions,
    ) -> Result<Vec<u8>> {
        let mut buffer = Cursor::new(Vec::new());

        match target {
            ExportFormat::Jpeg => {
                // JPEG has no alpha channel
                let rgb = DynamicImage::ImageRgb8(image.to_rgb8());
                let encoder = JpegEncoder::new_with_quality(&mut buffer, options.jpeg_quality);
                rgb.write_with_encoder(encoder)
                    .map_err(PipelineError::conversion)?;
            }
            ExportFormat::Png => {
                let compression = if options.png_best_compression {
                    CompressionType::Best
                } else {
                    CompressionType::Default
                };
                let encoder =
                    PngEncoder::new_with_quality(&mut buffer, compression, FilterType::Adaptive);
                image
                    .write_with_encoder(encoder)
                    .map_err(PipelineError::conversion)?;
            }
            ExportFormat::WebP => {
                // The pure-Rust WebP encoder is lossless and 8-bit only
                let eight_bit = if image.color().has_alpha() {
                    DynamicImage::ImageRgba8(image.to_rgba8())
                } else {
                    DynamicImage::ImageRgb8(image.to_rgb8())
                };
                let encoder = WebPEncoder::new_lossless(&mut buffer);
                eight_bit
                    .write_with_encoder(encoder)
                    .map_err(PipelineError::conversion)?;
            }
        }

        Ok(buffer.into_inner())
    }
}
