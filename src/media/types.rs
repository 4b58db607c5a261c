use super::error::MediaError;
use crate::utils::{is_http_url, output_filename};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Raw metadata as reported by the extraction tool.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawInfo {
    pub title: Option<String>,
    pub thumbnail: Option<String>,
    pub duration: Option<f64>,
    #[serde(default)]
    pub formats: Vec<RawFormat>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawFormat {
    pub format_id: Option<String>,
    pub url: Option<String>,
    pub ext: Option<String>,
    pub vcodec: Option<String>,
    pub acodec: Option<String>,
    pub abr: Option<f64>,
    pub format_note: Option<String>,
    pub resolution: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FormatKind {
    Audio,
    Video,
}

#[derive(Debug, Clone, Serialize)]
pub struct MediaFormat {
    pub id: Uuid,
    pub kind: FormatKind,
    #[serde(rename = "ext")]
    pub container: String,
    pub quality: Option<String>,
    #[serde(rename = "url")]
    pub source_url: String,
}

/// Normalized result of a resolve call.
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedMedia {
    pub title: Option<String>,
    pub thumbnail: Option<String>,
    pub duration: Option<f64>,
    pub videos: Vec<MediaFormat>,
    pub audios: Vec<MediaFormat>,
}

/// One download request. Lives as long as the response body.
#[derive(Debug, Clone)]
pub struct FetchJob {
    pub source_url: String,
    pub want_audio_only: bool,
    pub output_name: String,
}

impl FetchJob {
    pub fn new(source_url: &str, name: Option<&str>, want_audio_only: bool) -> Result<Self, MediaError> {
        let source_url = source_url.trim();
        if source_url.is_empty() {
            return Err(MediaError::InvalidInput("missing url".to_string()));
        }
        if !is_http_url(source_url) {
            return Err(MediaError::InvalidInput(format!(
                "not an http(s) url: {}",
                source_url
            )));
        }

        Ok(Self {
            source_url: source_url.to_string(),
            want_audio_only,
            output_name: output_filename(name, want_audio_only),
        })
    }
}
