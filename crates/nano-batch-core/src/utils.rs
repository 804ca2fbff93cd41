//! Utility functions and helpers

use crate::error::{PipelineError, Result};
use std::path::{Path, PathBuf};

/// File intake utilities
pub mod file {
    use super::*;

    /// Expand the given paths into a sorted list of files; directories are
    /// read one level deep.
    pub fn collect_input_files(paths: &[PathBuf]) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        for path in paths {
            if path.is_dir() {
                let mut entries: Vec<PathBuf> = std::fs::read_dir(path)?
                    .filter_map(|entry| entry.ok().map(|e| e.path()))
                    .filter(|p| p.is_file())
                    .collect();
                entries.sort();
                files.extend(entries);
            } else if path.is_file() {
                files.push(path.clone());
            } else {
                return Err(PipelineError::InvalidInput {
                    message: format!("Input path not found: {}", path.display()),
                });
            }
        }
        Ok(files)
    }

    /// Ensure a directory exists, creating it if necessary
    pub fn ensure_directory_exists(path: &Path) -> Result<()> {
        if !path.exists() {
            std::fs::create_dir_all(path)?;
        }
        Ok(())
    }
}

/// MIME type detection
pub mod format {
    use super::*;

    /// Detect image MIME type from file extension
    pub fn detect_mime_from_extension(path: &Path) -> Option<&'static str> {
        let extension = path.extension()?.to_str()?.to_lowercase();

        match extension.as_str() {
            "jpg" | "jpeg" => Some("image/jpeg"),
            "png" => Some("image/png"),
            "webp" => Some("image/webp"),
            "gif" => Some("image/gif"),
            "bmp" => Some("image/bmp"),
            "tiff" | "tif" => Some("image/tiff"),
            "avif" => Some("image/avif"),
            "heic" | "heif" => Some("image/heic"),
            _ => None,
        }
    }

    /// Detect image MIME type from magic bytes
    pub fn detect_mime_from_header(bytes: &[u8]) -> Option<&'static str> {
        if bytes.len() < 4 {
            return None;
        }

        match &bytes[..4] {
            [0xFF, 0xD8, 0xFF, _] => Some("image/jpeg"),
            [0x89, 0x50, 0x4E, 0x47] => Some("image/png"),
            [0x47, 0x49, 0x46, 0x38] => Some("image/gif"),
            [0x42, 0x4D, _, _] => Some("image/bmp"),
            _ => {
                if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
                    Some("image/webp")
                } else if &bytes[0..4] == b"II*\0" || &bytes[0..4] == b"MM\0*" {
                    Some("image/tiff")
                } else {
                    None
                }
            }
        }
    }

    /// Best-effort MIME type for a file on disk: header first, then extension
    pub fn detect_mime(path: &Path, bytes: &[u8]) -> Option<&'static str> {
        detect_mime_from_header(bytes).or_else(|| detect_mime_from_extension(path))
    }

    /// Whether a declared MIME type is an image type
    pub fn is_image_mime(mime_type: &str) -> bool {
        mime_type.trim().to_ascii_lowercase().starts_with("image/")
    }
}

/// Base64 payload helpers
pub mod encoding {
    use base64::Engine;
    use regex::Regex;
    use std::sync::OnceLock;

    fn data_uri_prefix() -> &'static Regex {
        static PREFIX: OnceLock<Regex> = OnceLock::new();
        PREFIX.get_or_init(|| {
            Regex::new(r"^data:image/[a-zA-Z0-9.+-]+;base64,").expect("static regex is valid")
        })
    }

    /// Strip a leading `data:image/...;base64,` header, if any
    pub fn strip_data_uri(payload: &str) -> &str {
        match data_uri_prefix().find(payload) {
            Some(m) => &payload[m.end()..],
            None => payload,
        }
    }

    pub fn to_base64(bytes: &[u8]) -> String {
        base64::engine::general_purpose::STANDARD.encode(bytes)
    }

    pub fn from_base64(payload: &str) -> Result<Vec<u8>, base64::DecodeError> {
        base64::engine::general_purpose::STANDARD.decode(strip_data_uri(payload).trim())
    }

    /// Approximate byte size of an encoded image, reversing the 4/3 base64
    /// expansion of its `data:` URL the way a browser preview measures it.
    /// Not an exact count; only ordering between payloads is meaningful.
    pub fn estimate_size_bytes(mime_type: &str, payload: &[u8]) -> u64 {
        let header = "data:".len() + mime_type.len() + ";base64,".len();
        let encoded = base64::encoded_len(payload.len(), true).unwrap_or(usize::MAX);
        let data_url_len = header.saturating_add(encoded) as f64;
        (data_url_len * 3.0 / 4.0).round() as u64
    }
}

/// Display helpers
pub mod display {
    /// Human-readable byte count, base 1024
    pub fn format_bytes(bytes: u64, decimals: usize) -> String {
        if bytes == 0 {
            return "0 Bytes".to_string();
        }
        const SIZES: [&str; 4] = ["Bytes", "KB", "MB", "GB"];
        let k = 1024f64;
        let i = ((bytes as f64).ln() / k.ln()).floor() as usize;
        let i = i.min(SIZES.len() - 1);
        let value = bytes as f64 / k.powi(i as i32);
        let rounded = format!("{:.*}", decimals, value);
        // 1.50 -> 1.5, 2.00 -> 2
        let trimmed = if rounded.contains('.') {
            rounded.trim_end_matches('0').trim_end_matches('.').to_string()
        } else {
            rounded
        };
        format!("{} {}", trimmed, SIZES[i])
    }
}

/// Performance monitoring utilities
pub mod performance {
    use std::time::{Duration, Instant};

    /// Simple performance timer
    pub struct Timer {
        start: Instant,
        name: String,
    }

    impl Timer {
        pub fn new(name: impl Into<String>) -> Self {
            Self {
                start: Instant::now(),
                name: name.into(),
            }
        }

        pub fn elapsed(&self) -> Duration {
            self.start.elapsed()
        }

        pub fn elapsed_ms(&self) -> u128 {
            self.elapsed().as_millis()
        }
    }

    impl Drop for Timer {
        fn drop(&mut self) {
            tracing::debug!("Timer '{}' elapsed: {}ms", self.name, self.elapsed_ms());
        }
    }
}
