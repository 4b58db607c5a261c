//! Streaming fetch-and-transcode pipeline.
//!
//! Each request gets one worker task that pulls the upstream body and pushes
//! fixed-size chunks into a bounded channel. The response body is the
//! receiving end of that channel, so memory use is capped at
//! `CHANNEL_DEPTH` chunks plus the read buffers, whatever the file size.
//!
//! The response is committed only after the first chunk is available.
//! Failures before that are returned as `MediaError`; failures after that
//! can only end the body early, because status and headers are already on
//! the wire. Clients see a truncated download in that case.

use super::{
    error::MediaError,
    transcoder::{TranscodeSession, Transcoder},
    types::FetchJob,
};
use crate::config::UpstreamConfig;
use anyhow::{Context, Result};
use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use reqwest::header::CONTENT_TYPE;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::io::StreamReader;
use tracing::{debug, info, warn};

const CHANNEL_DEPTH: usize = 4;

pub const OCTET_STREAM: &str = "application/octet-stream";
pub const MP3_CONTENT_TYPE: &str = "audio/mpeg";

pub type ChunkStream = BoxStream<'static, Result<Bytes, MediaError>>;

type ChunkSender = mpsc::Sender<Result<Bytes, MediaError>>;
type ChunkReceiver = mpsc::Receiver<Result<Bytes, MediaError>>;
type UpstreamReader = StreamReader<BoxStream<'static, std::io::Result<Bytes>>, Bytes>;

/// A committed download: framing metadata plus the lazy body.
pub struct MediaStream {
    pub filename: String,
    pub content_type: String,
    pub content_length: Option<u64>,
    pub body: ChunkStream,
}

pub struct StreamPipeline {
    client: reqwest::Client,
    transcoder: Arc<dyn Transcoder>,
    chunk_size: usize,
}

impl StreamPipeline {
    pub fn new(config: &UpstreamConfig, transcoder: Arc<dyn Transcoder>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout())
            .read_timeout(config.read_timeout())
            .user_agent(config.user_agent.clone())
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            transcoder,
            chunk_size: config.chunk_size(),
        })
    }

    pub fn transcoder(&self) -> &dyn Transcoder {
        self.transcoder.as_ref()
    }

    pub async fn open(&self, job: FetchJob) -> Result<MediaStream, MediaError> {
        info!(
            url = %job.source_url,
            audio_only = job.want_audio_only,
            "FETCHING"
        );

        let response = self.fetch(&job.source_url).await?;
        let upstream_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .map(str::to_string);
        let upstream_length = response.content_length();
        let reader = upstream_reader(response);

        let (tx, rx) = mpsc::channel(CHANNEL_DEPTH);

        let (content_type, content_length) = if job.want_audio_only {
            let session = self.transcoder.start().map_err(|e| {
                let reason = format!("{e:#}");
                warn!(error = %reason, "FAILED");
                MediaError::TranscodeFailed(reason)
            })?;
            info!(
                transcoder = self.transcoder.name(),
                pid = ?session.pid,
                "TRANSCODING"
            );
            tokio::spawn(run_transcode(reader, session, self.chunk_size, tx));
            (MP3_CONTENT_TYPE.to_string(), None)
        } else {
            info!(content_type = ?upstream_type, length = ?upstream_length, "FORWARDING");
            tokio::spawn(run_forward(reader, self.chunk_size, tx));
            (
                upstream_type.unwrap_or_else(|| OCTET_STREAM.to_string()),
                upstream_length,
            )
        };

        let body = prime(rx).await?;

        Ok(MediaStream {
            filename: job.output_name,
            content_type,
            content_length,
            body,
        })
    }

    async fn fetch(&self, url: &str) -> Result<reqwest::Response, MediaError> {
        let response = self.client.get(url).send().await.map_err(|e| {
            warn!(error = %e, "FAILED");
            MediaError::UpstreamUnreachable(e.to_string())
        })?;

        let status = response.status();
        if !status.is_success() {
            warn!(%status, "FAILED");
            return Err(MediaError::UpstreamUnreachable(format!(
                "upstream returned HTTP {}",
                status
            )));
        }

        Ok(response)
    }
}

fn upstream_reader(response: reqwest::Response) -> UpstreamReader {
    StreamReader::new(
        response
            .bytes_stream()
            .map_err(std::io::Error::other)
            .boxed(),
    )
}

fn client_gone() -> MediaError {
    MediaError::StreamInterrupted("client disconnected".to_string())
}

/// Waits for the first chunk so that early failures can still be reported
/// with a proper status code.
async fn prime(mut rx: ChunkReceiver) -> Result<ChunkStream, MediaError> {
    let first = match rx.recv().await {
        Some(Ok(chunk)) => Some(chunk),
        // Nothing reached the client yet, so this is a failed fetch.
        Some(Err(MediaError::StreamInterrupted(reason))) => {
            return Err(MediaError::UpstreamUnreachable(reason))
        }
        Some(Err(err)) => return Err(err),
        None => None,
    };

    let rest = stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|item| (item, rx))
    });

    Ok(stream::iter(first.map(Ok)).chain(rest).boxed())
}

async fn run_forward(upstream: UpstreamReader, chunk_size: usize, tx: ChunkSender) {
    let outcome = tokio::select! {
        result = pump(upstream, chunk_size, &tx, MediaError::upstream_io) => {
            result.map(|n| (n, n))
        }
        _ = tx.closed() => Err(client_gone()),
    };

    finish("forward", outcome, &tx).await;
}

async fn run_transcode(
    upstream: UpstreamReader,
    session: TranscodeSession,
    chunk_size: usize,
    tx: ChunkSender,
) {
    let TranscodeSession {
        input,
        output,
        completion,
        pid,
    } = session;

    // Feeder and drainer must make progress independently: the transcoder
    // stops reading its input once its output pipe is full.
    let work = async {
        let (fed, drained, ()) = tokio::try_join!(
            feed(upstream, input, chunk_size),
            pump(output, chunk_size, &tx, MediaError::transcode_io),
            completion,
        )?;
        Ok::<_, MediaError>((fed, drained))
    };

    let outcome = tokio::select! {
        result = work => result,
        _ = tx.closed() => Err(client_gone()),
    };

    // `work` is gone by now, and with it the transcoder process.
    debug!(?pid, "transcoder released");
    finish("transcode", outcome, &tx).await;
}

/// Copies upstream bytes into the transcoder input, closing it at EOF.
async fn feed<R, W>(mut upstream: R, mut input: W, chunk_size: usize) -> Result<u64, MediaError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buffer = vec![0u8; chunk_size];
    let mut total = 0u64;

    loop {
        let n = upstream
            .read(&mut buffer)
            .await
            .map_err(MediaError::upstream_io)?;
        if n == 0 {
            break;
        }
        input
            .write_all(&buffer[..n])
            .await
            .map_err(MediaError::transcode_io)?;
        total += n as u64;
    }

    input.shutdown().await.map_err(MediaError::transcode_io)?;
    debug!(bytes = total, "transcoder input closed");
    Ok(total)
}

/// Reads `source` in chunks of at most `chunk_size` bytes and hands each
/// one to the response body in order.
async fn pump<R>(
    mut source: R,
    chunk_size: usize,
    tx: &ChunkSender,
    read_error: fn(std::io::Error) -> MediaError,
) -> Result<u64, MediaError>
where
    R: AsyncRead + Unpin,
{
    let mut buffer = vec![0u8; chunk_size];
    let mut total = 0u64;

    loop {
        let n = source.read(&mut buffer).await.map_err(read_error)?;
        if n == 0 {
            break;
        }
        tx.send(Ok(Bytes::copy_from_slice(&buffer[..n])))
            .await
            .map_err(|_| client_gone())?;
        total += n as u64;
    }

    Ok(total)
}

async fn finish(stage: &'static str, outcome: Result<(u64, u64), MediaError>, tx: &ChunkSender) {
    match outcome {
        Ok((bytes_in, bytes_out)) => info!(stage, bytes_in, bytes_out, "DONE"),
        Err(err) if tx.is_closed() => info!(stage, reason = %err, "stream abandoned"),
        Err(err) => {
            warn!(stage, error = %err, "FAILED");
            // Terminates the body early; the client sees a truncated download.
            let _ = tx.send(Err(err)).await;
        }
    }
}
