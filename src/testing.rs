//! Test doubles and a local upstream server shared by the unit tests.

use crate::media::{CommandTranscoder, Extractor, MediaError, RawInfo, TranscodeSession, Transcoder};
use anyhow::Result;
use async_trait::async_trait;
use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use bytes::Bytes;
use futures::{stream, FutureExt};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::task::JoinHandle;

const FIXTURE_CHUNK: usize = 7919;

pub fn pattern_byte(offset: u64) -> u8 {
    (offset % 251) as u8
}

pub async fn serve(app: Router) -> (SocketAddr, JoinHandle<()>) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, handle)
}

pub struct FakeExtractor {
    result: std::result::Result<RawInfo, String>,
    available: bool,
    calls: AtomicUsize,
}

impl FakeExtractor {
    pub fn with_info(info: RawInfo) -> Self {
        Self {
            result: Ok(info),
            available: true,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            result: Err(message.to_string()),
            available: true,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn unavailable() -> Self {
        Self {
            available: false,
            ..Self::failing("not installed")
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Extractor for FakeExtractor {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn extract(&self, _url: &str) -> Result<RawInfo> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.result.clone().map_err(|e| anyhow::anyhow!(e))
    }

    async fn test_availability(&self) -> bool {
        self.available
    }
}

/// In-process transcoder that inverts every byte. Its pipes are tiny, so it
/// only completes if input and output are serviced concurrently.
pub struct InvertTranscoder;

#[async_trait]
impl Transcoder for InvertTranscoder {
    fn name(&self) -> &str {
        "invert"
    }

    fn start(&self) -> Result<TranscodeSession> {
        let (input, mut stage_in) = tokio::io::duplex(256);
        let (mut stage_out, output) = tokio::io::duplex(256);

        let worker = tokio::spawn(async move {
            let mut buffer = [0u8; 100];
            loop {
                let n = stage_in.read(&mut buffer).await?;
                if n == 0 {
                    break;
                }
                for b in &mut buffer[..n] {
                    *b = !*b;
                }
                stage_out.write_all(&buffer[..n]).await?;
            }
            stage_out.shutdown().await
        });

        let completion = async move {
            match worker.await {
                Ok(result) => result.map_err(MediaError::transcode_io),
                Err(e) => Err(MediaError::TranscodeFailed(e.to_string())),
            }
        }
        .boxed();

        Ok(TranscodeSession {
            input: Box::new(input),
            output: Box::new(output),
            completion,
            pid: None,
        })
    }

    async fn test_availability(&self) -> bool {
        true
    }
}

/// Wraps a command transcoder and remembers the pid of every process it starts.
pub struct RecordingTranscoder {
    inner: CommandTranscoder,
    pids: Mutex<Vec<u32>>,
}

impl RecordingTranscoder {
    pub fn new(inner: CommandTranscoder) -> Self {
        Self {
            inner,
            pids: Mutex::new(Vec::new()),
        }
    }

    pub fn pids(&self) -> Vec<u32> {
        self.pids.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transcoder for RecordingTranscoder {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn start(&self) -> Result<TranscodeSession> {
        let session = self.inner.start()?;
        if let Some(pid) = session.pid {
            self.pids.lock().unwrap().push(pid);
        }
        Ok(session)
    }

    async fn test_availability(&self) -> bool {
        self.inner.test_availability().await
    }
}

/// True while the process exists and is not a zombie.
#[cfg(target_os = "linux")]
pub fn process_alive(pid: u32) -> bool {
    match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
        Ok(stat) => stat
            .rsplit_once(')')
            .and_then(|(_, rest)| rest.split_whitespace().next())
            .map(|state| state != "Z" && state != "X")
            .unwrap_or(false),
        Err(_) => false,
    }
}

#[derive(Clone, Default)]
struct FixtureState {
    produced: Arc<AtomicU64>,
    endless_dropped: Arc<AtomicBool>,
}

struct DropFlag(Arc<AtomicBool>);

impl Drop for DropFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// Local stand-in for a media host.
///
/// Routes:
/// - `/bytes/{len}`: pattern body with content type and length
/// - `/plain/{len}`: pattern body without a content type
/// - `/missing`: 404
/// - `/broken`: one chunk, then the connection is aborted
/// - `/reset`: headers, then the connection is aborted before any bytes
/// - `/endless`: never finishes; flags when the server drops it
/// - `/wav/{secs}`: mono 16-bit sine wave
pub struct UpstreamFixture {
    addr: SocketAddr,
    pub produced: Arc<AtomicU64>,
    endless_dropped: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl UpstreamFixture {
    pub async fn start() -> Self {
        let state = FixtureState::default();
        let app = Router::new()
            .route("/bytes/{len}", get(bytes_route))
            .route("/plain/{len}", get(plain_route))
            .route("/missing", get(|| async { StatusCode::NOT_FOUND }))
            .route("/broken", get(broken_route))
            .route("/reset", get(reset_route))
            .route("/endless", get(endless_route))
            .route("/wav/{secs}", get(wav_route))
            .with_state(state.clone());

        let (addr, handle) = serve(app).await;

        Self {
            addr,
            produced: state.produced,
            endless_dropped: state.endless_dropped,
            handle,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub async fn wait_endless_dropped(&self, limit: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + limit;
        while tokio::time::Instant::now() < deadline {
            if self.endless_dropped.load(Ordering::SeqCst) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        self.endless_dropped.load(Ordering::SeqCst)
    }
}

impl Drop for UpstreamFixture {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn pattern_body(len: u64, produced: Arc<AtomicU64>) -> Body {
    let chunks = stream::unfold(0u64, move |offset| {
        let produced = produced.clone();
        async move {
            if offset >= len {
                return None;
            }
            let n = (FIXTURE_CHUNK as u64).min(len - offset);
            let chunk: Vec<u8> = (offset..offset + n).map(pattern_byte).collect();
            produced.fetch_add(n, Ordering::SeqCst);
            Some((Ok::<_, std::io::Error>(Bytes::from(chunk)), offset + n))
        }
    });
    Body::from_stream(chunks)
}

async fn bytes_route(State(state): State<FixtureState>, Path(len): Path<u64>) -> Response {
    let mut response = Response::new(pattern_body(len, state.produced));
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, "video/webm".parse().unwrap());
    headers.insert(header::CONTENT_LENGTH, len.to_string().parse().unwrap());
    response
}

async fn plain_route(State(state): State<FixtureState>, Path(len): Path<u64>) -> Response {
    Response::new(pattern_body(len, state.produced))
}

async fn broken_route() -> Response {
    let chunks = stream::unfold(0u8, |step| async move {
        match step {
            0 => Some((Ok(Bytes::from(vec![1u8; 4096])), 1)),
            1 => {
                tokio::time::sleep(Duration::from_millis(200)).await;
                Some((Err(std::io::Error::other("upstream reset")), 2))
            }
            _ => None,
        }
    });
    Response::new(Body::from_stream(chunks))
}

async fn reset_route() -> Response {
    let chunks = stream::once(async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        Err::<Bytes, _>(std::io::Error::other("upstream reset"))
    });
    Response::new(Body::from_stream(chunks))
}

async fn endless_route(State(state): State<FixtureState>) -> Response {
    let guard = DropFlag(state.endless_dropped.clone());
    let chunks = stream::unfold(guard, |guard| async move {
        tokio::time::sleep(Duration::from_millis(5)).await;
        Some((Ok::<_, std::io::Error>(Bytes::from(vec![7u8; 1024])), guard))
    });
    Response::new(Body::from_stream(chunks))
}

async fn wav_route(Path(secs): Path<u32>) -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "audio/wav")], sine_wav(secs))
}

fn sine_wav(secs: u32) -> Vec<u8> {
    const RATE: u32 = 44_100;
    let samples = RATE * secs;
    let data_len = samples * 2;

    let mut wav = Vec::with_capacity(44 + data_len as usize);
    wav.extend_from_slice(b"RIFF");
    wav.extend_from_slice(&(36 + data_len).to_le_bytes());
    wav.extend_from_slice(b"WAVEfmt ");
    wav.extend_from_slice(&16u32.to_le_bytes());
    wav.extend_from_slice(&1u16.to_le_bytes());
    wav.extend_from_slice(&1u16.to_le_bytes());
    wav.extend_from_slice(&RATE.to_le_bytes());
    wav.extend_from_slice(&(RATE * 2).to_le_bytes());
    wav.extend_from_slice(&2u16.to_le_bytes());
    wav.extend_from_slice(&16u16.to_le_bytes());
    wav.extend_from_slice(b"data");
    wav.extend_from_slice(&data_len.to_le_bytes());

    for i in 0..samples {
        let t = i as f64 / RATE as f64;
        let sample = ((t * 440.0 * std::f64::consts::TAU).sin() * 12_000.0) as i16;
        wav.extend_from_slice(&sample.to_le_bytes());
    }
    wav
}

/// Walks MPEG-1 Layer III frames and returns the playing time, skipping an
/// ID3v2 tag and the Xing/Info header frame. `None` if the bytes are not a
/// well-formed frame sequence.
pub fn mp3_duration_secs(data: &[u8]) -> Option<f64> {
    const BITRATES: [u32; 16] = [
        0, 32, 40, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320, 0,
    ];
    const RATES: [u32; 4] = [44_100, 48_000, 32_000, 0];

    let mut pos = 0usize;
    if data.len() >= 10 && &data[..3] == b"ID3" {
        let size = data[6..10]
            .iter()
            .fold(0usize, |acc, b| (acc << 7) | (*b as usize & 0x7f));
        pos = 10 + size;
    }

    let mut frames = 0u64;
    let mut sample_rate = 0u32;
    let mut first = true;

    while pos + 4 <= data.len() {
        let header = &data[pos..pos + 4];
        if header[0] != 0xFF || header[1] & 0xFE != 0xFA {
            return None;
        }
        let bitrate = BITRATES[(header[2] >> 4) as usize] * 1000;
        let rate = RATES[((header[2] >> 2) & 0x3) as usize];
        if bitrate == 0 || rate == 0 {
            return None;
        }
        let padding = ((header[2] >> 1) & 0x1) as usize;
        let frame_len = (144 * bitrate / rate) as usize + padding;

        let frame = &data[pos..(pos + frame_len).min(data.len())];
        let is_info = first
            && frame
                .windows(4)
                .any(|w| w == b"Xing" || w == b"Info");
        if !is_info {
            frames += 1;
        }

        first = false;
        sample_rate = rate;
        pos += frame_len;
    }

    if frames == 0 {
        return None;
    }
    Some(frames as f64 * 1152.0 / sample_rate as f64)
}
