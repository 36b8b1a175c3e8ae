use async_trait::async_trait;
use std::path::Path;
use std::process::Output;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use super::{OcrEngine, OcrError};

/// Engine settings for the first, most accurate attempt.
const TUNING: [&str; 5] = [
    "tessedit_do_invert=0",
    "load_system_dawg=0",
    "load_freq_dawg=0",
    "load_unambig_dawg=0",
    "textord_heavy_nr=1",
];

const ATTEMPTS: usize = 3;

/// Flags for each attempt. Later attempts trade accuracy for robustness.
fn attempt_flags(attempt: usize) -> Vec<&'static str> {
    match attempt {
        0 => {
            let mut flags = vec!["--psm", "3", "--oem", "1"];
            for setting in TUNING {
                flags.extend(["-c", setting]);
            }
            flags
        }
        1 => vec!["--psm", "6", "--oem", "1"],
        _ => Vec::new(),
    }
}

/// A missing traineddata file fails every flag set the same way.
fn language_missing(output: &str) -> bool {
    output.to_lowercase().contains("language")
}

/// OCR engine backed by the Tesseract command-line tool.
pub struct TesseractEngine {
    command: String,
}

impl TesseractEngine {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }

    /// Verify Tesseract is installed. Returns the first line of `--version`.
    pub async fn check_installation(&self) -> Result<String, OcrError> {
        let output = Command::new(&self.command).arg("--version").output().await?;
        let banner = combined_output(&output);
        if !output.status.success() || !banner.to_lowercase().contains("tesseract") {
            return Err(OcrError::Engine(format!(
                "{} is available but the version check failed",
                self.command
            )));
        }
        Ok(banner.lines().next().unwrap_or_default().trim().to_string())
    }

    async fn run(
        &self,
        image: &Path,
        language: &str,
        flags: &[&str],
        cancel: &CancellationToken,
    ) -> Result<Output, OcrError> {
        let mut command = Command::new(&self.command);
        command
            .arg(image)
            .arg("stdout")
            .args(["-l", language])
            .args(flags)
            .kill_on_drop(true);

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(OcrError::Cancelled),
            output = command.output() => Ok(output?),
        }
    }
}

#[async_trait]
impl OcrEngine for TesseractEngine {
    async fn recognize(
        &self,
        image: &Path,
        language: &str,
        cancel: &CancellationToken,
    ) -> Result<String, OcrError> {
        let mut last_failure = String::new();

        for attempt in 0..ATTEMPTS {
            let output = self
                .run(image, language, &attempt_flags(attempt), cancel)
                .await?;
            if output.status.success() {
                return Ok(String::from_utf8_lossy(&output.stdout).trim().to_string());
            }

            last_failure = combined_output(&output);
            if language_missing(&last_failure) {
                return Err(OcrError::UnsupportedLanguage {
                    language: language.to_string(),
                });
            }
            tracing::debug!(
                image = %image.display(),
                attempt,
                status = ?output.status.code(),
                "Tesseract attempt failed, falling back"
            );
        }

        Err(OcrError::Engine(last_failure.trim().to_string()))
    }
}

fn combined_output(output: &Output) -> String {
    let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
    text.push_str(&String::from_utf8_lossy(&output.stderr));
    text
}
