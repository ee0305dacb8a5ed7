use anyhow::{Context, Result, anyhow, bail};
use m3u8_rs::{MasterPlaylist, Playlist};
use tracing::{info, instrument};

/// One bitrate variant advertised by a master playlist
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rendition {
    pub uri: String,
    pub bandwidth: u64,
    pub resolution: Option<String>,
}

/// Fetches a Stream HLS master manifest
#[instrument(skip(client))]
pub async fn get_master_playlist(client: &reqwest::Client, url: &str) -> Result<MasterPlaylist> {
    let req = client
        .get(url)
        .send()
        .await
        .context("Fetching HLS manifest")?;
    anyhow::ensure!(
        req.status().is_success(),
        "Manifest request failed with status {}",
        req.status()
    );
    let body = req.bytes().await.context("Decoding HLS manifest")?;

    parse_master_playlist(&body)
}

/// # Errors
/// Errors when `body` isn't a master playlist
pub fn parse_master_playlist(body: &[u8]) -> Result<MasterPlaylist> {
    match m3u8_rs::parse_playlist_res(body).map_err(|e| anyhow!("Parsing HLS playlist: {e}"))? {
        Playlist::MasterPlaylist(playlist) => Ok(playlist),
        Playlist::MediaPlaylist(_) => bail!("Expected a master playlist, got a media playlist"),
    }
}

/// Variants sorted from highest to lowest bandwidth
#[must_use]
pub fn renditions(playlist: &MasterPlaylist) -> Vec<Rendition> {
    let mut renditions = playlist
        .variants
        .iter()
        .filter(|v| !v.is_i_frame)
        .map(|v| Rendition {
            uri: v.uri.clone(),
            bandwidth: v.bandwidth,
            resolution: v.resolution.map(|r| r.to_string()),
        })
        .collect::<Vec<_>>();
    renditions.sort_by(|a, b| b.bandwidth.cmp(&a.bandwidth));

    info!(
        "Available quality: {}",
        renditions
            .iter()
            .map(|r| r
                .resolution
                .clone()
                .unwrap_or_else(|| "Unknown resolution".to_string()))
            .collect::<Vec<String>>()
            .join(", ")
    );

    renditions
}

#[cfg(test)]
mod tests {
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{method, path},
    };

    use super::*;

    const MASTER: &str = "#EXTM3U
#EXT-X-VERSION:6
#EXT-X-INDEPENDENT-SEGMENTS
#EXT-X-STREAM-INF:RESOLUTION=854x480,CODECS=\"avc1.4d401f,mp4a.40.2\",BANDWIDTH=1100000,FRAME-RATE=30.000
stream_t1/video.m3u8
#EXT-X-STREAM-INF:RESOLUTION=1920x1080,CODECS=\"avc1.640028,mp4a.40.2\",BANDWIDTH=4500000,FRAME-RATE=30.000
stream_t3/video.m3u8
#EXT-X-STREAM-INF:RESOLUTION=1280x720,CODECS=\"avc1.4d401f,mp4a.40.2\",BANDWIDTH=2600000,FRAME-RATE=30.000
stream_t2/video.m3u8
";

    #[test]
    fn renditions_are_sorted_by_bandwidth() {
        let playlist = parse_master_playlist(MASTER.as_bytes()).unwrap();
        let renditions = renditions(&playlist);

        assert_eq!(
            renditions
                .iter()
                .map(|r| r.resolution.as_deref().unwrap())
                .collect::<Vec<_>>(),
            ["1920x1080", "1280x720", "854x480"]
        );
        assert_eq!(renditions[0].uri, "stream_t3/video.m3u8");
        assert_eq!(renditions[0].bandwidth, 4_500_000);
    }

    #[test]
    fn media_playlist_is_rejected() {
        let media = "#EXTM3U\n#EXT-X-TARGETDURATION:4\n#EXTINF:4.0,\nseg0.ts\n#EXT-X-ENDLIST\n";
        assert!(parse_master_playlist(media.as_bytes()).is_err());
    }

    #[tokio::test]
    async fn fetches_manifest_over_http() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/uid/manifest/video.m3u8"))
            .respond_with(ResponseTemplate::new(200).set_body_string(MASTER))
            .mount(&server)
            .await;

        let playlist = get_master_playlist(
            &reqwest::Client::new(),
            &format!("{}/uid/manifest/video.m3u8", server.uri()),
        )
        .await
        .unwrap();
        assert_eq!(playlist.variants.len(), 3);
    }
}
