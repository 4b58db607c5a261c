mod error;
mod extractor;
mod pipeline;
mod resolver;
mod transcoder;
mod types;
mod ytdlp;

pub use error::MediaError;
pub use extractor::Extractor;
pub use pipeline::MediaStream;
pub use transcoder::{CommandTranscoder, Transcoder};
pub use types::{FetchJob, ResolvedMedia};
#[cfg(test)]
pub use transcoder::TranscodeSession;
#[cfg(test)]
pub use types::{RawFormat, RawInfo};

use crate::config::Config;
use anyhow::{Context, Result};
use pipeline::StreamPipeline;
use resolver::FormatResolver;
use std::sync::Arc;
use tracing::info;
use ytdlp::YtDlpExtractor;

pub struct MediaService {
    resolver: FormatResolver,
    pipeline: StreamPipeline,
}

impl MediaService {
    pub fn new(config: &Config) -> Result<Self> {
        info!(
            "Media service initialized - metadata via {}, mp3 transcoding via {}",
            config.extractor.binary, config.transcoder.binary
        );

        Self::with_parts(
            Arc::new(YtDlpExtractor::new(&config.extractor)),
            Arc::new(CommandTranscoder::ffmpeg_mp3(&config.transcoder)),
            config,
        )
    }

    pub fn with_parts(
        extractor: Arc<dyn Extractor>,
        transcoder: Arc<dyn Transcoder>,
        config: &Config,
    ) -> Result<Self> {
        let pipeline = StreamPipeline::new(&config.upstream, transcoder)
            .context("Failed to build streaming pipeline")?;

        Ok(Self {
            resolver: FormatResolver::new(extractor),
            pipeline,
        })
    }

    pub async fn resolve(&self, url: &str) -> Result<ResolvedMedia, MediaError> {
        self.resolver.resolve(url).await
    }

    pub async fn stream(&self, job: FetchJob) -> Result<MediaStream, MediaError> {
        self.pipeline.open(job).await
    }

    pub async fn test_setup(&self) -> Result<()> {
        info!("Testing media tooling setup...");

        let extractor_available = self.resolver.extractor().test_availability().await;
        let transcoder_available = self.pipeline.transcoder().test_availability().await;

        match (extractor_available, transcoder_available) {
            (true, true) => {
                info!("✅ All media tools are available");
                Ok(())
            }
            (false, _) => Err(anyhow::anyhow!(
                "{} is not available, /fetch will fail. Please install it.",
                self.resolver.extractor().name()
            )),
            (true, false) => Err(anyhow::anyhow!(
                "{} is not available, mp3 downloads will fail. Please install it.",
                self.pipeline.transcoder().name()
            )),
        }
    }
}
