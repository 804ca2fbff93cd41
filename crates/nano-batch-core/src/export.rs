//! Export of successful results as files or a single archive

use crate::config::{ExportConfig, ExportFormat};
use crate::error::{PipelineError, Result};
use crate::item::QueueItem;
use crate::models::ItemId;
use crate::utils::file;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// One file inside an export
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportEntry {
    pub name: String,
    pub bytes: Vec<u8>,
    /// Seconds since the epoch, stamped on the archive entry
    pub modified: u64,
}

/// Packages `success` items under names derived from id and format
#[derive(Debug, Clone)]
pub struct ExportAggregator {
    entry_prefix: String,
    single_prefix: String,
    archive_name: String,
}

impl Default for ExportAggregator {
    fn default() -> Self {
        Self::new(&ExportConfig::default())
    }
}

impl ExportAggregator {
    pub fn new(config: &ExportConfig) -> Self {
        Self {
            entry_prefix: config.archive_entry_prefix.clone(),
            single_prefix: config.single_file_prefix.clone(),
            archive_name: config.archive_name.clone(),
        }
    }

    pub fn archive_name(&self) -> &str {
        &self.archive_name
    }

    /// `<prefix>_<item-id>.<ext>` as used inside the archive
    pub fn entry_name(&self, id: ItemId, format: ExportFormat) -> String {
        format!("{}_{}.{}", self.entry_prefix, id, format.extension())
    }

    /// Archive entries for every item with a result from its current run
    pub fn entries(&self, items: &[QueueItem]) -> Vec<ExportEntry> {
        items
            .iter()
            .filter_map(|item| {
                let result = item.result()?;
                Some(ExportEntry {
                    name: self.entry_name(item.id(), result.format),
                    bytes: result.bytes.clone(),
                    modified: result.completed_at.timestamp().max(0) as u64,
                })
            })
            .collect()
    }

    /// Single-file download for one item
    pub fn export_item(&self, item: &QueueItem) -> Option<(String, Vec<u8>)> {
        let result = item.result()?;
        let name = format!(
            "{}_{}.{}",
            self.single_prefix,
            item.id(),
            result.format.extension()
        );
        Some((name, result.bytes.clone()))
    }

    /// Build a gzip-compressed tar of all successful results. `None` when
    /// nothing has succeeded.
    pub async fn export_all(&self, items: &[QueueItem]) -> Result<Option<Vec<u8>>> {
        let entries = self.entries(items);
        if entries.is_empty() {
            info!("Nothing to export");
            return Ok(None);
        }

        let count = entries.len();
        let archive = tokio::task::spawn_blocking(move || build_archive(&entries))
            .await
            .map_err(|e| PipelineError::Archive {
                message: format!("Archive task failed: {}", e),
            })??;

        info!("Exported {} images ({} bytes)", count, archive.len());
        Ok(Some(archive))
    }

    /// Write the archive into `dir` under the configured archive name
    pub async fn write_archive(&self, items: &[QueueItem], dir: &Path) -> Result<Option<PathBuf>> {
        let Some(archive) = self.export_all(items).await? else {
            return Ok(None);
        };

        file::ensure_directory_exists(dir)?;
        let path = dir.join(&self.archive_name);
        tokio::fs::write(&path, archive).await?;
        info!("Archive written to {}", path.display());
        Ok(Some(path))
    }
}

fn build_archive(entries: &[ExportEntry]) -> Result<Vec<u8>> {
    let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));

    for entry in entries {
        let mut header = tar::Header::new_gnu();
        header.set_size(entry.bytes.len() as u64);
        header.set_mode(0o644);
        header.set_mtime(entry.modified);
        header.set_cksum();
        builder.append_data(&mut header, &entry.name, entry.bytes.as_slice())
            .map_err(archive_error)?;
        debug!("Added {} ({} bytes)", entry.name, entry.bytes.len());
    }

    builder.into_inner()
        .and_then(GzEncoder::finish)
        .map_err(archive_error)
}

fn archive_error(e: std::io::Error) -> PipelineError {
    PipelineError::Archive {
        message: e.to_string(),
    }
}
