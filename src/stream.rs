use std::{io::SeekFrom, path::Path};

use anyhow::{Context, Result, bail, ensure};
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use reqwest::{
    Body, Client, Response, StatusCode,
    header::{CONTENT_TYPE, LOCATION},
    multipart::{Form, Part},
};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::json;
use tokio::{
    fs::File,
    io::{AsyncReadExt, AsyncSeekExt},
};
use tokio_util::io::ReaderStream;
use tracing::{debug, error, info, instrument, warn};

pub const CLOUDFLARE_API_BASE: &str = "https://api.cloudflare.com/client/v4";

const TUS_VERSION: &str = "1.0.0";
const TUS_CONTENT_TYPE: &str = "application/offset+octet-stream";

/// Cloudflare wants chunks in multiples of 256 KiB, at least 5 MiB except for the last one
pub const DEFAULT_CHUNK_SIZE: u64 = 50 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingState {
    Ready,
    Error,
    /// Also covers `queued`, `downloading`, `inprogress` and `pendingupload`
    #[serde(other)]
    Processing,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoStatus {
    pub state: ProcessingState,
    pub pct_complete: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Playback {
    pub hls: String,
    pub dash: String,
}

/// A video as returned by Cloudflare Stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamVideo {
    pub uid: String,
    pub status: Option<VideoStatus>,
    pub thumbnail: Option<String>,
    pub playback: Option<Playback>,
    pub duration: Option<f64>,
}

impl StreamVideo {
    #[must_use]
    pub fn state(&self) -> ProcessingState {
        self.status
            .as_ref()
            .map_or(ProcessingState::Processing, |s| s.state)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiMessage {
    pub code: i64,
    pub message: String,
}

#[derive(Debug, Deserialize)]
struct ApiEnvelope<T> {
    success: bool,
    #[serde(default)]
    errors: Vec<ApiMessage>,
    result: Option<T>,
}

#[derive(Debug, Clone)]
pub struct StreamClient {
    client: Client,
    api_base: String,
    account_id: String,
    api_token: String,
}

impl StreamClient {
    #[must_use]
    pub fn new(client: Client, api_base: &str, account_id: &str, api_token: &str) -> Self {
        Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            account_id: account_id.to_string(),
            api_token: api_token.to_string(),
        }
    }

    fn stream_endpoint(&self) -> String {
        format!("{}/accounts/{}/stream", self.api_base, self.account_id)
    }

    /// Asks Stream to fetch the video from a publicly reachable URL
    ///
    /// # Errors
    /// Errors on network error, non-2xx status or `success: false`
    #[instrument(skip(self))]
    pub async fn copy_from_url(&self, url: &str, name: &str) -> Result<StreamVideo> {
        let req = self
            .client
            .post(format!("{}/copy", self.stream_endpoint()))
            .bearer_auth(&self.api_token)
            .json(&json!({
                "url": url,
                "meta": { "name": name }
            }))
            .send()
            .await
            .context("Sending copy request")?;

        parse_envelope(req).await
    }

    /// Uploads a whole file as a single multipart form
    ///
    /// # Errors
    /// Errors when the file can't be read, on network error, non-2xx status or `success: false`
    #[instrument(skip(self))]
    pub async fn upload_form(&self, path: &Path, name: &str) -> Result<StreamVideo> {
        let file = File::open(path)
            .await
            .with_context(|| format!("Opening {}", path.display()))?;
        let file_size = file.metadata().await.context("Reading file metadata")?.len();

        let pb = progress_bar(file_size);
        let file = pb.wrap_async_read(file);

        let file_name = path
            .file_name()
            .map_or_else(|| "video.mp4".to_string(), |f| f.to_string_lossy().to_string());
        let form = Form::new()
            .part(
                "file",
                Part::stream_with_length(Body::wrap_stream(ReaderStream::new(file)), file_size)
                    .file_name(file_name),
            )
            .text("meta", json!({ "name": name }).to_string());

        let req = self
            .client
            .post(self.stream_endpoint())
            .bearer_auth(&self.api_token)
            .multipart(form)
            .send()
            .await
            .context("Sending form upload");
        pb.finish_and_clear();

        parse_envelope(req?).await
    }

    /// Uploads a file over the tus resumable protocol
    ///
    /// When a chunk fails, the upload resumes once from whatever offset the server reports having.
    ///
    /// # Errors
    /// Errors when the handshake is rejected, when a chunk fails twice, or on IO errors
    #[instrument(skip(self))]
    pub async fn upload_resumable(
        &self,
        path: &Path,
        name: &str,
        chunk_size: u64,
    ) -> Result<StreamVideo> {
        ensure!(chunk_size > 0, "Chunk size must be positive");

        let mut file = File::open(path)
            .await
            .with_context(|| format!("Opening {}", path.display()))?;
        let file_size = file.metadata().await.context("Reading file metadata")?.len();

        let init_upload_req = self
            .client
            .post(self.stream_endpoint())
            .bearer_auth(&self.api_token)
            .header("Tus-Resumable", TUS_VERSION)
            .header("Upload-Length", file_size)
            .header("Upload-Metadata", format!("name {}", BASE64.encode(name)))
            .send()
            .await
            .context("Initializing resumable upload")?;

        if init_upload_req.status() != StatusCode::CREATED {
            let status = init_upload_req.status();
            let body = init_upload_req.text().await.unwrap_or_default();
            error!("Unable to initialize resumable upload. Status {status}");
            error!(body);
            bail!("Unable to initialize resumable upload: {status}");
        }

        let upload_url = init_upload_req
            .headers()
            .get(LOCATION)
            .context("Upload response is missing a Location header")?
            .to_str()
            .context("Location header is not valid UTF-8")?
            .to_string();
        let uid = init_upload_req
            .headers()
            .get("stream-media-id")
            .and_then(|v| v.to_str().ok())
            .map(ToString::to_string)
            .or_else(|| uid_from_upload_url(&upload_url))
            .context("Unable to determine the Stream media ID")?;
        info!("Upload initiated. Video ID: {uid}");
        debug!("Upload URL: {upload_url}");

        let pb = progress_bar(file_size);
        let sent = self
            .send_chunks(&upload_url, &mut file, file_size, chunk_size, &pb)
            .await;
        pb.finish_and_clear();
        sent?;

        Ok(StreamVideo {
            uid,
            status: Some(VideoStatus {
                state: ProcessingState::Processing,
                pct_complete: None,
            }),
            thumbnail: None,
            playback: None,
            duration: None,
        })
    }

    async fn send_chunks(
        &self,
        upload_url: &str,
        file: &mut File,
        file_size: u64,
        chunk_size: u64,
        pb: &indicatif::ProgressBar,
    ) -> Result<()> {
        let mut offset = 0;
        let mut resumed = false;
        while offset < file_size {
            let len = chunk_size.min(file_size - offset);
            let mut chunk = vec![0; usize::try_from(len)?];
            file.seek(SeekFrom::Start(offset)).await?;
            file.read_exact(&mut chunk).await.context("Reading chunk")?;

            match self.patch_chunk(upload_url, offset, chunk).await {
                Ok(acked) => {
                    ensure!(acked > offset, "Server did not accept any bytes at {offset}");
                    offset = acked;
                    resumed = false;
                }
                Err(e) if !resumed => {
                    warn!("Chunk at offset {offset} failed, resuming: {e:#}");
                    offset = self.server_offset(upload_url).await?;
                    ensure!(
                        offset <= file_size,
                        "Server reports an offset past the end of the file"
                    );
                    resumed = true;
                }
                Err(e) => return Err(e.context(format!("Retrying chunk at offset {offset}"))),
            }
            pb.set_position(offset);
        }
        Ok(())
    }

    /// Sends one chunk and returns the offset the server acknowledged
    async fn patch_chunk(&self, upload_url: &str, offset: u64, chunk: Vec<u8>) -> Result<u64> {
        let len = chunk.len() as u64;
        let req = self
            .client
            .patch(upload_url)
            .bearer_auth(&self.api_token)
            .header("Tus-Resumable", TUS_VERSION)
            .header("Upload-Offset", offset)
            .header(CONTENT_TYPE, TUS_CONTENT_TYPE)
            .body(chunk)
            .send()
            .await
            .context("Sending chunk")?;

        ensure!(
            req.status().is_success(),
            "Chunk rejected with status {}",
            req.status()
        );

        Ok(upload_offset(&req).unwrap_or(offset + len))
    }

    async fn server_offset(&self, upload_url: &str) -> Result<u64> {
        let req = self
            .client
            .head(upload_url)
            .bearer_auth(&self.api_token)
            .header("Tus-Resumable", TUS_VERSION)
            .send()
            .await
            .context("Fetching upload offset")?;

        ensure!(
            req.status().is_success(),
            "Unable to fetch upload offset: {}",
            req.status()
        );
        upload_offset(&req).context("Response is missing Upload-Offset")
    }
}

fn upload_offset(res: &Response) -> Option<u64> {
    res.headers()
        .get("Upload-Offset")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
}

/// `https://upload.videodelivery.net/tus/<uid>?tusv2=true` -> `<uid>`
fn uid_from_upload_url(upload_url: &str) -> Option<String> {
    let url = reqwest::Url::parse(upload_url).ok()?;
    url.path_segments()?
        .rfind(|s| !s.is_empty())
        .map(ToString::to_string)
}

async fn parse_envelope<T: DeserializeOwned>(res: Response) -> Result<T> {
    let status = res.status();
    if !status.is_success() {
        let body = res.text().await.unwrap_or_default();
        bail!("API Error: {status} - {body}");
    }

    let envelope = res
        .json::<ApiEnvelope<T>>()
        .await
        .context("Parsing API response")?;

    if !envelope.success {
        let errors = envelope
            .errors
            .iter()
            .map(|e| format!("{} ({})", e.message, e.code))
            .collect::<Vec<_>>()
            .join(", ");
        bail!("API returned success=false: {errors}");
    }

    envelope.result.context("API response has no result")
}

fn progress_bar(len: u64) -> indicatif::ProgressBar {
    let pb = indicatif::ProgressBar::new(len);
    if let Ok(style) = indicatif::ProgressStyle::with_template(
        "[{elapsed_precise}] [{wide_bar:.cyan/blue}] {bytes}/{total_bytes} ({eta})",
    ) {
        pb.set_style(style);
    }
    pb
}
