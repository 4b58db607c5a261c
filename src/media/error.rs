use thiserror::Error;

/// Failures surfaced by the resolver and the streaming pipeline.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("extraction failed: {0}")]
    ExtractionFailed(String),

    #[error("upstream unreachable: {0}")]
    UpstreamUnreachable(String),

    #[error("transcode failed: {0}")]
    TranscodeFailed(String),

    /// Client or upstream went away after bytes were already flowing.
    /// Only observable by the client as a truncated body.
    #[error("stream interrupted: {0}")]
    StreamInterrupted(String),
}

impl MediaError {
    pub fn is_client_error(&self) -> bool {
        matches!(self, MediaError::InvalidInput(_))
    }

    /// Short label used as the `error` field of JSON error bodies.
    pub fn summary(&self) -> &'static str {
        match self {
            MediaError::InvalidInput(_) => "Invalid input",
            MediaError::ExtractionFailed(_) => "Extraction failed",
            MediaError::UpstreamUnreachable(_) => "Upstream unreachable",
            MediaError::TranscodeFailed(_) => "Transcode failed",
            MediaError::StreamInterrupted(_) => "Stream interrupted",
        }
    }

    pub(crate) fn transcode_io(err: std::io::Error) -> Self {
        MediaError::TranscodeFailed(err.to_string())
    }

    pub(crate) fn upstream_io(err: std::io::Error) -> Self {
        MediaError::StreamInterrupted(format!("upstream read failed: {err}"))
    }
}
