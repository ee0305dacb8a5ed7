use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};

/// HTTP client shared by every Stream call
///
/// # Errors
/// Errors when the TLS backend can't be initialised
pub fn init_http_client() -> Result<reqwest::Client> {
    let mut headers = HeaderMap::new();
    headers.insert(
        USER_AGENT,
        HeaderValue::from_str(&format!(
            "{}/{} (+{})",
            env!("CARGO_PKG_NAME"),
            env!("CARGO_PKG_VERSION"),
            env!("CARGO_PKG_REPOSITORY")
        ))
        .context("Building User-Agent header")?,
    );

    reqwest::Client::builder()
        .default_headers(headers)
        .connect_timeout(Duration::from_secs(10))
        .build()
        .context("Unable to build HTTP client")
}

/// Where the page is publicly reachable, so Stream can copy videos from it
#[must_use]
pub fn public_base_url(vercel_url: Option<&str>) -> String {
    match vercel_url.map(str::trim).filter(|u| !u.is_empty()) {
        Some(host) => format!("https://{host}"),
        None => "http://localhost:3002".to_string(),
    }
}
