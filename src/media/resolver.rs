use super::{
    error::MediaError,
    extractor::Extractor,
    types::{FormatKind, MediaFormat, RawFormat, ResolvedMedia},
};
use crate::utils::{format_bitrate, is_http_url};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub struct FormatResolver {
    extractor: Arc<dyn Extractor>,
}

impl FormatResolver {
    pub fn new(extractor: Arc<dyn Extractor>) -> Self {
        Self { extractor }
    }

    pub fn extractor(&self) -> &dyn Extractor {
        self.extractor.as_ref()
    }

    pub async fn resolve(&self, url: &str) -> Result<ResolvedMedia, MediaError> {
        let url = url.trim();
        if url.is_empty() {
            return Err(MediaError::InvalidInput("No URL".to_string()));
        }
        if !is_http_url(url) {
            return Err(MediaError::InvalidInput(format!("malformed url: {}", url)));
        }

        info!("Resolving formats with {} for: {}", self.extractor.name(), url);

        let raw = self.extractor.extract(url).await.map_err(|e| {
            warn!("{} failed: {:#}", self.extractor.name(), e);
            MediaError::ExtractionFailed(format!("{e:#}"))
        })?;

        if raw.formats.is_empty() {
            return Err(MediaError::ExtractionFailed(
                "no formats returned".to_string(),
            ));
        }

        let mut videos = Vec::new();
        let mut audios = Vec::new();

        for format in &raw.formats {
            match classify(format) {
                Some(media) if media.kind == FormatKind::Audio => audios.push(media),
                Some(media) => videos.push(media),
                None => debug!(
                    "Skipping format {}",
                    format.format_id.as_deref().unwrap_or("?")
                ),
            }
        }

        info!(
            "Resolved {} video and {} audio formats for: {}",
            videos.len(),
            audios.len(),
            url
        );

        Ok(ResolvedMedia {
            title: raw.title,
            thumbnail: raw.thumbnail,
            duration: raw.duration,
            videos,
            audios,
        })
    }
}

fn codec_present(codec: Option<&str>) -> bool {
    matches!(codec, Some(c) if !c.is_empty() && c != "none")
}

/// Maps one raw entry to a format, or `None` when it is not downloadable
/// on its own (no URL, or video without audio). Only an explicit `"none"`
/// vcodec marks an audio entry; a missing vcodec takes the video path.
pub(crate) fn classify(format: &RawFormat) -> Option<MediaFormat> {
    let source_url = format.url.as_deref().filter(|u| !u.is_empty())?;

    if format.vcodec.as_deref() == Some("none") {
        return Some(MediaFormat {
            id: Uuid::new_v4(),
            kind: FormatKind::Audio,
            container: "mp3".to_string(),
            quality: format.abr.map(format_bitrate),
            source_url: source_url.to_string(),
        });
    }

    if !codec_present(format.acodec.as_deref()) {
        return None;
    }

    Some(MediaFormat {
        id: Uuid::new_v4(),
        kind: FormatKind::Video,
        container: format.ext.clone().unwrap_or_else(|| "mp4".to_string()),
        quality: format
            .format_note
            .clone()
            .filter(|note| !note.is_empty())
            .or_else(|| format.resolution.clone()),
        source_url: source_url.to_string(),
    })
}
