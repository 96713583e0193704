/*!
 * Speech-to-text hand-off.
 *
 * Media files without subtitles are turned into a sibling `.srt` before
 * translation. Only the command boundary lives here; the speech model is
 * whatever the external tool runs.
 */

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use log::{debug, error, info};
use tokio::process::Command;

use crate::app_config::TranscriptionSettings;
use crate::file_utils::FileManager;

/// Produces an SRT file for a media file
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe `media` and return the path of the written `.srt`
    async fn transcribe(&self, media: &Path, language: Option<&str>) -> Result<PathBuf>;
}

/// Runs the `whisper` CLI
#[derive(Debug, Clone)]
pub struct WhisperCommand {
    binary: String,
    model: String,
    timeout: Duration,
}

impl WhisperCommand {
    pub fn new(binary: impl Into<String>, model: impl Into<String>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            model: model.into(),
            timeout,
        }
    }

    pub fn from_settings(settings: &TranscriptionSettings) -> Self {
        Self::new(
            &settings.whisper_bin,
            &settings.whisper_model,
            Duration::from_secs(settings.timeout_secs.max(1)),
        )
    }

    /// Command line arguments for one run
    pub fn arguments(&self, media: &Path, output_dir: &Path, language: Option<&str>) -> Vec<String> {
        let mut args = vec![
            media.to_string_lossy().to_string(),
            "--model".to_string(),
            self.model.clone(),
            "--output_format".to_string(),
            "srt".to_string(),
            "--output_dir".to_string(),
            output_dir.to_string_lossy().to_string(),
        ];
        if let Some(language) = language {
            args.push("--language".to_string());
            args.push(language.to_string());
        }
        args
    }
}

#[async_trait]
impl Transcriber for WhisperCommand {
    async fn transcribe(&self, media: &Path, language: Option<&str>) -> Result<PathBuf> {
        if !FileManager::file_exists(media) {
            return Err(anyhow!("Media file does not exist: {}", media.display()));
        }
        let output_dir = media
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let expected = media.with_extension("srt");

        info!("Transcribing {}", media.display());
        let args = self.arguments(media, &output_dir, language);
        debug!("{} {}", self.binary, args.join(" "));

        let run = Command::new(&self.binary).args(&args).kill_on_drop(true).output();
        let output = match tokio::time::timeout(self.timeout, run).await {
            Ok(result) => result.map_err(|e| anyhow!("Failed to run {}: {}", self.binary, e))?,
            Err(_) => {
                return Err(anyhow!(
                    "{} timed out after {}s on {}",
                    self.binary,
                    self.timeout.as_secs(),
                    media.display()
                ));
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let tail: Vec<&str> = stderr.lines().rev().take(5).collect();
            error!("Transcription of {} failed", media.display());
            return Err(anyhow!(
                "{} exited with {}: {}",
                self.binary,
                output.status,
                tail.into_iter().rev().collect::<Vec<_>>().join(" | ")
            ));
        }

        if !expected.exists() {
            return Err(anyhow!("{} produced no subtitle at {}", self.binary, expected.display()));
        }
        Ok(expected)
    }
}
