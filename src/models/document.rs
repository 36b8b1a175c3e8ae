use image::ImageFormat;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use strum::{Display, EnumString};

use crate::error::PipelineError;

/// Separator placed between pages in the combined OCR text.
pub const PAGE_BREAK: &str = "\n\n--- Page Break ---\n\n";

/// Document formats accepted for OCR.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum DocumentKind {
    Pdf,
    Png,
    #[strum(to_string = "jpeg", serialize = "jpg")]
    Jpeg,
    #[strum(to_string = "tiff", serialize = "tif")]
    Tiff,
    Bmp,
}

impl DocumentKind {
    /// Kind implied by a file name's extension.
    pub fn from_filename(name: &str) -> Option<Self> {
        let extension = Path::new(name).extension()?.to_str()?;
        Self::from_str(extension).ok()
    }

    /// Kind implied by the leading bytes of the content.
    pub fn sniff(bytes: &[u8]) -> Option<Self> {
        if bytes.starts_with(b"%PDF") {
            return Some(Self::Pdf);
        }
        match image::guess_format(bytes).ok()? {
            ImageFormat::Png => Some(Self::Png),
            ImageFormat::Jpeg => Some(Self::Jpeg),
            ImageFormat::Tiff => Some(Self::Tiff),
            ImageFormat::Bmp => Some(Self::Bmp),
            _ => None,
        }
    }

    /// Prefer the declared extension, fall back to sniffing the content.
    pub fn detect(filename: Option<&str>, bytes: &[u8]) -> Result<Self, PipelineError> {
        filename
            .and_then(Self::from_filename)
            .or_else(|| Self::sniff(bytes))
            .ok_or_else(|| {
                PipelineError::UnsupportedDocument(
                    filename
                        .and_then(|name| Path::new(name).extension())
                        .and_then(|ext| ext.to_str())
                        .unwrap_or("unknown")
                        .to_string(),
                )
            })
    }

    pub fn is_image(self) -> bool {
        !matches!(self, Self::Pdf)
    }
}

/// Text recognized from a document, one entry per page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrOutput {
    pub file_type: DocumentKind,
    pub language: String,
    pub num_pages: usize,
    pub pages: Vec<String>,
    pub text: String,
    /// Zero-based indices of pages whose OCR failed
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub failed_pages: Vec<usize>,
}

impl OcrOutput {
    pub fn new(
        file_type: DocumentKind,
        language: &str,
        pages: Vec<String>,
        failed_pages: Vec<usize>,
    ) -> Self {
        Self {
            file_type,
            language: language.to_string(),
            num_pages: pages.len(),
            text: pages.join(PAGE_BREAK),
            pages,
            failed_pages,
        }
    }
}
