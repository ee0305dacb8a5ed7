use std::{fmt::Write as _, future::Future, path::PathBuf, time::Duration};

use anyhow::{Context, Result};
use tracing::{error, info, instrument};

use crate::{
    catalog::VideoDescriptor,
    stream::{ProcessingState, StreamClient, StreamVideo},
};

/// Anything that can turn a descriptor into a hosted Stream video
pub trait Uploader {
    fn upload(&self, video: &VideoDescriptor) -> impl Future<Output = Result<StreamVideo>>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadMethod {
    /// Stream downloads `{base_url}/videos/{filename}` itself
    CopyFromUrl { base_url: String },
    /// Single multipart POST of the local file
    Form { videos_dir: PathBuf },
    /// tus upload of the local file in `chunk_size` byte chunks
    Resumable { videos_dir: PathBuf, chunk_size: u64 },
}

pub struct StreamUploader {
    client: StreamClient,
    method: UploadMethod,
}

impl StreamUploader {
    #[must_use]
    pub const fn new(client: StreamClient, method: UploadMethod) -> Self {
        Self { client, method }
    }
}

impl Uploader for StreamUploader {
    #[instrument(skip_all, fields(key = %video.key))]
    async fn upload(&self, video: &VideoDescriptor) -> Result<StreamVideo> {
        let (videos_dir, chunk_size) = match &self.method {
            UploadMethod::CopyFromUrl { base_url } => {
                let url = format!("{}/videos/{}", base_url.trim_end_matches('/'), video.filename);
                info!("Asking Stream to copy {url}");
                return self.client.copy_from_url(&url, &video.name).await;
            }
            UploadMethod::Form { videos_dir } => (videos_dir, None),
            UploadMethod::Resumable {
                videos_dir,
                chunk_size,
            } => (videos_dir, Some(*chunk_size)),
        };

        let path = videos_dir.join(&video.filename);
        let metadata = tokio::fs::metadata(&path)
            .await
            .with_context(|| format!("File not found: {}", path.display()))?;
        #[allow(clippy::cast_precision_loss)]
        let size_mb = metadata.len() as f64 / 1024.0 / 1024.0;
        info!("File size: {size_mb:.2} MB");

        match chunk_size {
            Some(chunk_size) => {
                self.client
                    .upload_resumable(&path, &video.name, chunk_size)
                    .await
            }
            None => self.client.upload_form(&path, &video.name).await,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedVideo {
    pub key: String,
    pub uid: String,
    pub state: ProcessingState,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub total: usize,
    /// In input order
    pub uploaded: Vec<UploadedVideo>,
    /// `(key, error)`
    pub failed: Vec<(String, String)>,
}

impl BatchReport {
    /// The block to paste into the page's video ID mapping, plus a tally
    #[must_use]
    pub fn render_summary(&self) -> String {
        let mut out = String::from("Upload Summary:\n====================\n\n");

        if self.uploaded.is_empty() {
            out.push_str("No videos were successfully uploaded\n");
            return out;
        }

        out.push_str("Update VIDEO_IDS with these values:\n\n");
        out.push_str("export const VIDEO_IDS = {\n");
        for video in &self.uploaded {
            let _ = writeln!(out, "  {}: '{}',", video.key, video.uid);
        }
        out.push_str("} as const;\n\n");

        let _ = writeln!(
            out,
            "Successfully uploaded {} out of {} videos",
            self.uploaded.len(),
            self.total
        );
        if self
            .uploaded
            .iter()
            .any(|v| v.state != ProcessingState::Ready)
        {
            out.push_str(indoc::indoc! {"
                Note: Videos may still be processing. Check your Cloudflare Stream dashboard.
            "});
        }

        out
    }
}

/// Uploads `videos` one at a time, waiting `delay` between calls to stay under the rate limit.
///
/// Failures are logged and skipped; they only show up in the returned report.
pub async fn run_batch<U: Uploader>(
    uploader: &U,
    videos: &[VideoDescriptor],
    delay: Duration,
) -> BatchReport {
    let mut report = BatchReport {
        total: videos.len(),
        ..Default::default()
    };

    for (i, video) in videos.iter().enumerate() {
        if i > 0 {
            tokio::time::sleep(delay).await;
        }

        info!("Uploading {}...", video.filename);
        match uploader.upload(video).await {
            Ok(uploaded) => {
                info!(
                    "Successfully uploaded {}. Video ID: {}, status: {:?}",
                    video.filename,
                    uploaded.uid,
                    uploaded.state()
                );
                report.uploaded.push(UploadedVideo {
                    key: video.key.clone(),
                    uid: uploaded.uid.clone(),
                    state: uploaded.state(),
                });
            }
            Err(e) => {
                error!("Failed to upload {}: {e:#}", video.filename);
                report.failed.push((video.key.clone(), format!("{e:#}")));
            }
        }
    }

    report
}
