use async_trait::async_trait;
use std::path::PathBuf;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use super::{RasterizeError, RasterizedDocument, Rasterizer};

const PAGE_PREFIX: &str = "page";

/// PDF rasterizer backed by poppler's `pdftoppm`.
pub struct PdftoppmRasterizer {
    command: String,
    dpi: u32,
}

impl PdftoppmRasterizer {
    pub fn new(command: impl Into<String>, dpi: u32) -> Self {
        Self {
            command: command.into(),
            dpi,
        }
    }
}

#[async_trait]
impl Rasterizer for PdftoppmRasterizer {
    async fn rasterize(
        &self,
        document: &[u8],
        cancel: &CancellationToken,
    ) -> Result<RasterizedDocument, RasterizeError> {
        let dir = tempfile::Builder::new().prefix("ocr-extraction-").tempdir()?;
        let pdf_path = dir.path().join("input.pdf");
        tokio::fs::write(&pdf_path, document).await?;

        let mut command = Command::new(&self.command);
        command
            .args(["-png", "-r", &self.dpi.to_string(), "-cropbox", "-aa", "no"])
            .arg(&pdf_path)
            .arg(dir.path().join(PAGE_PREFIX))
            .kill_on_drop(true);

        let output = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(RasterizeError::Cancelled),
            output = command.output() => output?,
        };

        if !output.status.success() {
            return Err(RasterizeError::Tool {
                tool: self.command.clone(),
                output: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let pages = collect_pages(dir.path()).await?;
        if pages.is_empty() {
            return Err(RasterizeError::NoPages);
        }

        tracing::debug!(pages = pages.len(), dir = %dir.path().display(), "Document rasterized");
        Ok(RasterizedDocument::new(dir, pages))
    }
}

/// Page images in page order. pdftoppm zero-pads the page number only up to
/// the width of the largest one, so sort numerically rather than lexically.
async fn collect_pages(dir: &std::path::Path) -> Result<Vec<PathBuf>, RasterizeError> {
    let mut numbered = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await?;

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if let Some(number) = page_number(&path) {
            numbered.push((number, path));
        }
    }

    numbered.sort_by_key(|(number, _)| *number);
    Ok(numbered.into_iter().map(|(_, path)| path).collect())
}

fn page_number(path: &std::path::Path) -> Option<u32> {
    if path.extension()? != "png" {
        return None;
    }
    let stem = path.file_stem()?.to_str()?;
    stem.strip_prefix(PAGE_PREFIX)?
        .strip_prefix('-')?
        .parse()
        .ok()
}
