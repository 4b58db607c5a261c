use super::{extractor::Extractor, types::RawInfo};
use crate::config::ExtractorConfig;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

pub struct YtDlpExtractor {
    binary: String,
    timeout: Duration,
}

impl YtDlpExtractor {
    pub fn new(config: &ExtractorConfig) -> Self {
        Self {
            binary: config.binary.clone(),
            timeout: config.timeout(),
        }
    }
}

pub(crate) fn parse_info(json: &[u8]) -> Result<RawInfo> {
    serde_json::from_slice(json).context("Failed to parse media metadata")
}

#[async_trait]
impl Extractor for YtDlpExtractor {
    fn name(&self) -> &'static str {
        "yt-dlp"
    }

    async fn extract(&self, url: &str) -> Result<RawInfo> {
        debug!("Extracting metadata with yt-dlp for: {}", url);

        let output = tokio::time::timeout(
            self.timeout,
            Command::new(&self.binary)
                .arg("--dump-json")
                .arg("--no-download")
                .arg("--no-warnings")
                .arg("--no-playlist")
                .arg(url)
                .kill_on_drop(true)
                .output(),
        )
        .await
        .context("Media metadata extraction timed out")?
        .context("Failed to run yt-dlp")?;

        if !output.status.success() {
            let error = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow::anyhow!(
                "Media metadata extraction failed: {}",
                error.trim()
            ));
        }

        let info = parse_info(&output.stdout)?;
        debug!(
            "yt-dlp returned {} formats for {}",
            info.formats.len(),
            url
        );

        Ok(info)
    }

    async fn test_availability(&self) -> bool {
        match Command::new(&self.binary).arg("--version").output().await {
            Ok(output) => {
                if output.status.success() {
                    let version = String::from_utf8_lossy(&output.stdout);
                    info!("✅ yt-dlp is available, version: {}", version.trim());
                    true
                } else {
                    warn!("❌ yt-dlp command failed");
                    false
                }
            }
            Err(e) => {
                warn!("❌ yt-dlp not found: {}", e);
                false
            }
        }
    }
}
