#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(clippy::cargo)]
#![warn(clippy::perf)]
#![warn(clippy::complexity)]
#![warn(clippy::style)]
#![allow(clippy::multiple_crate_versions)]

use std::{path::PathBuf, time::Duration};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use stream_porter::{
    catalog::Catalog,
    config::{Credentials, load_env_files},
    manifest::{get_master_playlist, renditions},
    player::ClientCapabilities,
    resolver::{Environment, VideoSource, manifest_url, resolve, resolve_poster},
    stream::{DEFAULT_CHUNK_SIZE, StreamClient},
    upload::{StreamUploader, UploadMethod, run_batch},
    util::{init_http_client, public_base_url},
};
use tracing::{info, warn};

const MAX_CHUNK_SIZE_MIB: u64 = 4096;

/// Resolves, plays back and uploads the landing page's Cloudflare Stream videos
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Environment file holding the Cloudflare credentials
    #[arg(long, global = true, default_value = ".env.local")]
    env_file: PathBuf,

    /// JSON video mapping to use instead of the built-in one
    #[arg(long, global = true)]
    catalog: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Asks Stream to copy every video from the deployed page
    Migrate {
        /// Public base URL of the page [default: https://$VERCEL_URL or http://localhost:3002]
        #[arg(long)]
        base_url: Option<String>,

        /// Seconds to wait between API calls
        #[arg(long, default_value_t = 2)]
        delay_secs: u64,
    },

    /// Uploads every video straight from disk
    Upload {
        #[arg(long, value_enum, default_value_t = Method::Form)]
        method: Method,

        /// Directory holding the video files
        #[arg(long, default_value = "public/videos")]
        videos_dir: PathBuf,

        /// Chunk size for resumable uploads, in MiB
        #[arg(
            long,
            default_value_t = DEFAULT_CHUNK_SIZE / 1024 / 1024,
            value_parser = clap::value_parser!(u64).range(1..=MAX_CHUNK_SIZE_MIB),
        )]
        chunk_size_mib: u64,

        /// Seconds to wait between API calls
        #[arg(long, default_value_t = 3)]
        delay_secs: u64,
    },

    /// Prints the source the player would load for a video in the current environment
    Resolve {
        key: String,

        /// Pretend the client plays HLS natively
        #[arg(long)]
        native_hls: bool,
    },

    /// Lists the renditions Stream serves for a video
    Probe { key: String },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum Method {
    Form,
    Resumable,
}

#[allow(clippy::too_many_lines)]
#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    load_env_files(&args.env_file);

    let catalog = match &args.catalog {
        Some(path) => {
            Catalog::load(path).with_context(|| format!("Loading catalog {}", path.display()))?
        }
        None => Catalog::builtin(),
    };

    match args.command {
        Command::Migrate {
            base_url,
            delay_secs,
        } => {
            let base_url = base_url
                .unwrap_or_else(|| public_base_url(std::env::var("VERCEL_URL").ok().as_deref()));
            info!("Base URL: {base_url}");
            upload_all(
                &catalog,
                UploadMethod::CopyFromUrl { base_url },
                Duration::from_secs(delay_secs),
            )
            .await?;
        }
        Command::Upload {
            method,
            videos_dir,
            chunk_size_mib,
            delay_secs,
        } => {
            let method = match method {
                Method::Form => UploadMethod::Form { videos_dir },
                Method::Resumable => UploadMethod::Resumable {
                    videos_dir,
                    chunk_size: chunk_size_mib
                        .checked_mul(1024 * 1024)
                        .context("Chunk size is too large")?,
                },
            };
            upload_all(&catalog, method, Duration::from_secs(delay_secs)).await?;
        }
        Command::Resolve { key, native_hls } => {
            let env = Environment::from_env();
            let source = resolve(&catalog, &key, &env)?;
            let capabilities = ClientCapabilities { native_hls };

            match &source {
                VideoSource::Local(path) => println!("local  {path}"),
                VideoSource::Stream(url) if capabilities.native_hls => {
                    println!("native {url}");
                }
                VideoSource::Stream(url) => println!("engine {url}"),
            }
            if let Some(poster) = resolve_poster(&catalog, &key, &env)? {
                println!("poster {poster}");
            }
        }
        Command::Probe { key } => {
            let env = Environment::from_env();
            let Some(subdomain) = env.stream_subdomain.as_deref() else {
                bail!("Probing needs a Stream customer subdomain in the environment");
            };
            let video = catalog.get(&key)?;
            if !video.is_uploaded() {
                bail!("`{key}` has not been uploaded yet");
            }

            let client = init_http_client()?;
            let playlist =
                get_master_playlist(&client, &manifest_url(subdomain, &video.stream_id)).await?;
            for rendition in renditions(&playlist) {
                println!(
                    "{:>10} {:>9} kbps  {}",
                    rendition.resolution.as_deref().unwrap_or("audio"),
                    rendition.bandwidth / 1000,
                    rendition.uri
                );
            }
        }
    }

    Ok(())
}

async fn upload_all(catalog: &Catalog, method: UploadMethod, delay: Duration) -> Result<()> {
    // Bail before touching the network if credentials are missing
    let credentials = Credentials::from_env()?;
    info!("Account ID: {}", credentials.account_id);

    let client = StreamClient::new(
        init_http_client()?,
        &credentials.api_base,
        &credentials.account_id,
        &credentials.api_token,
    );
    let uploader = StreamUploader::new(client, method);

    info!("Starting upload of {} videos", catalog.videos().len());
    let report = run_batch(&uploader, catalog.videos(), delay).await;

    println!("\n{}", report.render_summary());
    if !report.failed.is_empty() {
        warn!(
            "{} video(s) failed, re-run after fixing: {}",
            report.failed.len(),
            report
                .failed
                .iter()
                .map(|(key, _)| key.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk_size_arg(value: &str) -> Result<u64, clap::Error> {
        let args = Args::try_parse_from(["stream-porter", "upload", "--chunk-size-mib", value])?;
        match args.command {
            Command::Upload { chunk_size_mib, .. } => Ok(chunk_size_mib),
            other => panic!("parsed as {other:?}"),
        }
    }

    #[test]
    fn chunk_size_must_be_in_range() {
        assert_eq!(chunk_size_arg("50").unwrap(), 50);
        assert_eq!(chunk_size_arg("4096").unwrap(), MAX_CHUNK_SIZE_MIB);
        chunk_size_arg("0").unwrap_err();
        chunk_size_arg("4097").unwrap_err();
        chunk_size_arg("18446744073709551615").unwrap_err();
    }

    #[test]
    fn chunk_size_defaults_to_the_stream_default() {
        let args = Args::try_parse_from(["stream-porter", "upload"]).unwrap();
        let Command::Upload { chunk_size_mib, .. } = args.command else {
            panic!("expected the upload command");
        };
        assert_eq!(chunk_size_mib * 1024 * 1024, DEFAULT_CHUNK_SIZE);
    }
}
