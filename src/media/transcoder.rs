use super::error::MediaError;
use crate::config::TranscoderConfig;
use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::process::Stdio;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::process::Command;
use tracing::{debug, info, warn};

/// A running byte-in/byte-out transcoding stage.
///
/// `input` is written to and shut down to signal end of input, `output`
/// is read until EOF, and `completion` resolves once the stage has exited.
/// Dropping any unfinished part tears the stage down.
pub struct TranscodeSession {
    pub input: Box<dyn AsyncWrite + Send + Unpin>,
    pub output: Box<dyn AsyncRead + Send + Unpin>,
    pub completion: BoxFuture<'static, Result<(), MediaError>>,
    pub pid: Option<u32>,
}

#[async_trait]
pub trait Transcoder: Send + Sync {
    /// Human-readable name of the transcoder
    fn name(&self) -> &str;

    /// Start a fresh stage for one request
    fn start(&self) -> Result<TranscodeSession>;

    /// Test if this transcoder is available on the system
    async fn test_availability(&self) -> bool;
}

/// Runs an external program as a stdin → stdout stage.
pub struct CommandTranscoder {
    program: String,
    args: Vec<String>,
}

impl CommandTranscoder {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// ffmpeg stage that drops video and emits an MP3 stream.
    pub fn ffmpeg_mp3(config: &TranscoderConfig) -> Self {
        let bitrate = format!("{}k", config.bitrate_kbps);
        let args = [
            "-hide_banner",
            "-loglevel",
            "error",
            "-i",
            "pipe:0",
            "-vn",
            "-codec:a",
            "libmp3lame",
            "-b:a",
            bitrate.as_str(),
            "-f",
            "mp3",
            "pipe:1",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        Self::new(config.binary.clone(), args)
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }
}

#[async_trait]
impl Transcoder for CommandTranscoder {
    fn name(&self) -> &str {
        &self.program
    }

    fn start(&self) -> Result<TranscodeSession> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to spawn {}", self.program))?;

        let pid = child.id();
        debug!("{} spawned with pid {:?}", self.program, pid);

        let stdin = child
            .stdin
            .take()
            .with_context(|| format!("Failed to get {} stdin", self.program))?;
        let stdout = child
            .stdout
            .take()
            .with_context(|| format!("Failed to get {} stdout", self.program))?;
        let mut stderr = child
            .stderr
            .take()
            .with_context(|| format!("Failed to get {} stderr", self.program))?;

        let program = self.program.clone();
        let completion = async move {
            let mut error_buffer = Vec::new();
            let (status, _) = tokio::join!(child.wait(), stderr.read_to_end(&mut error_buffer));
            let status = status.map_err(MediaError::transcode_io)?;

            if status.success() {
                debug!("{} exited cleanly", program);
                Ok(())
            } else {
                let error = String::from_utf8_lossy(&error_buffer);
                Err(MediaError::TranscodeFailed(format!(
                    "{} exited with {}: {}",
                    program,
                    status,
                    error.trim()
                )))
            }
        }
        .boxed();

        Ok(TranscodeSession {
            input: Box::new(stdin),
            output: Box::new(stdout),
            completion,
            pid,
        })
    }

    async fn test_availability(&self) -> bool {
        match Command::new(&self.program).arg("-version").output().await {
            Ok(output) => {
                if output.status.success() {
                    let version_line = String::from_utf8_lossy(&output.stdout)
                        .lines()
                        .next()
                        .unwrap_or("unknown")
                        .to_string();
                    info!("✅ {} is available: {}", self.program, version_line);
                    true
                } else {
                    warn!("❌ {} command failed", self.program);
                    false
                }
            }
            Err(e) => {
                warn!(
                    "❌ {} not found: {} (required for mp3 downloads)",
                    self.program, e
                );
                false
            }
        }
    }
}
