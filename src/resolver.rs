//! Decides whether the page serves a video from its own static files or from
//! the Cloudflare Stream HLS manifest.

use tracing::debug;

use crate::catalog::{Catalog, LookupError};

pub const NODE_ENV_VAR: &str = "NODE_ENV";
pub const STREAM_SUBDOMAIN_VAR: &str = "NEXT_PUBLIC_CLOUDFLARE_STREAM_CUSTOMER_SUBDOMAIN";

/// Deployment inputs that fully determine the resolver's branch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Environment {
    pub production: bool,
    pub stream_subdomain: Option<String>,
}

impl Environment {
    #[must_use]
    pub fn new(production: bool, stream_subdomain: Option<&str>) -> Self {
        Self {
            production,
            stream_subdomain: stream_subdomain
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(ToString::to_string),
        }
    }

    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self::new(
            lookup(NODE_ENV_VAR).is_some_and(|v| v == "production"),
            lookup(STREAM_SUBDOMAIN_VAR).as_deref(),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VideoSource {
    /// Static file served by the page itself
    Local(String),
    /// HLS master manifest on Cloudflare Stream
    Stream(String),
}

impl VideoSource {
    #[must_use]
    pub fn url(&self) -> &str {
        match self {
            Self::Local(url) | Self::Stream(url) => url,
        }
    }

    #[must_use]
    pub const fn is_stream(&self) -> bool {
        matches!(self, Self::Stream(_))
    }
}

/// Stream is only used on production deployments that have a customer subdomain configured
#[must_use]
pub const fn should_use_stream(env: &Environment) -> bool {
    env.production && env.stream_subdomain.is_some()
}

#[must_use]
pub fn manifest_url(subdomain: &str, stream_id: &str) -> String {
    format!("https://{subdomain}.cloudflarestream.com/{stream_id}/manifest/video.m3u8")
}

#[must_use]
pub fn thumbnail_url(subdomain: &str, stream_id: &str) -> String {
    format!("https://{subdomain}.cloudflarestream.com/{stream_id}/thumbnails/thumbnail.jpg")
}

/// Resolves the URL the player should request for `key`
///
/// # Errors
/// * [`LookupError::UnknownKey`] if the key isn't in the catalog, regardless of environment
/// * [`LookupError::NotUploaded`] if Stream is selected but the video has no identifier
pub fn resolve(catalog: &Catalog, key: &str, env: &Environment) -> Result<VideoSource, LookupError> {
    let video = catalog.get(key)?;

    let source = match env.stream_subdomain.as_deref() {
        Some(subdomain) if env.production => {
            if !video.is_uploaded() {
                return Err(LookupError::NotUploaded(key.to_string()));
            }
            VideoSource::Stream(manifest_url(subdomain, &video.stream_id))
        }
        _ => VideoSource::Local(video.local_path()),
    };

    debug!(key, ?source, "Resolved video source");
    Ok(source)
}

/// Poster image for `key`; only Stream generates thumbnails
///
/// # Errors
/// Same as [`resolve`]
pub fn resolve_poster(
    catalog: &Catalog,
    key: &str,
    env: &Environment,
) -> Result<Option<String>, LookupError> {
    let video = catalog.get(key)?;

    match env.stream_subdomain.as_deref() {
        Some(subdomain) if env.production => {
            if !video.is_uploaded() {
                return Err(LookupError::NotUploaded(key.to_string()));
            }
            Ok(Some(thumbnail_url(subdomain, &video.stream_id)))
        }
        _ => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::VideoDescriptor;

    #[test]
    fn stream_requires_production_and_subdomain() {
        let catalog = Catalog::builtin();
        let local = VideoSource::Local("/videos/learningScience.mp4".to_string());

        for (production, subdomain) in [
            (false, None),
            (false, Some("example")),
            (true, None),
            (true, Some("example")),
        ] {
            let env = Environment::new(production, subdomain);
            let source = resolve(&catalog, "learningScience", &env).unwrap();

            assert_eq!(should_use_stream(&env), production && subdomain.is_some());
            if production && subdomain.is_some() {
                assert!(source.is_stream());
            } else {
                assert_eq!(source, local);
            }
        }
    }

    #[test]
    fn production_with_subdomain_points_at_manifest() {
        let env = Environment::new(true, Some("example"));
        let source = resolve(&Catalog::builtin(), "learningScience", &env).unwrap();

        assert_eq!(
            source.url(),
            "https://example.cloudflarestream.com/ba54db52baa14399965d55553ee3db40/manifest/video.m3u8"
        );
    }

    #[test]
    fn unknown_key_fails_in_every_environment() {
        let catalog = Catalog::builtin();
        for production in [false, true] {
            for subdomain in [None, Some("example")] {
                let env = Environment::new(production, subdomain);
                assert_eq!(
                    resolve(&catalog, "nope", &env),
                    Err(LookupError::UnknownKey("nope".to_string()))
                );
            }
        }
    }

    #[test]
    fn blank_subdomain_counts_as_missing() {
        let env = Environment::new(true, Some("   "));
        assert!(!should_use_stream(&env));
    }

    #[test]
    fn reads_environment_variables() {
        let env = Environment::from_lookup(|key| match key {
            NODE_ENV_VAR => Some("production".to_string()),
            STREAM_SUBDOMAIN_VAR => Some("customer-abc".to_string()),
            _ => None,
        });
        assert_eq!(env, Environment::new(true, Some("customer-abc")));

        let dev = Environment::from_lookup(|key| {
            (key == NODE_ENV_VAR).then(|| "development".to_string())
        });
        assert!(!dev.production);
        assert!(dev.stream_subdomain.is_none());
    }

    #[test]
    fn not_uploaded_video_only_fails_when_streaming() {
        let catalog =
            Catalog::new(vec![VideoDescriptor::new("draft", "", "draft.mp4", "Draft")]).unwrap();

        let dev = Environment::new(false, Some("example"));
        assert_eq!(
            resolve(&catalog, "draft", &dev).unwrap(),
            VideoSource::Local("/videos/draft.mp4".to_string())
        );

        let prod = Environment::new(true, Some("example"));
        assert_eq!(
            resolve(&catalog, "draft", &prod),
            Err(LookupError::NotUploaded("draft".to_string()))
        );
    }

    #[test]
    fn poster_only_when_streaming() {
        let catalog = Catalog::builtin();
        assert_eq!(
            resolve_poster(&catalog, "bloom2sig", &Environment::default()).unwrap(),
            None
        );
        assert_eq!(
            resolve_poster(&catalog, "bloom2sig", &Environment::new(true, Some("example")))
                .unwrap()
                .as_deref(),
            Some(
                "https://example.cloudflarestream.com/d9a2589b04104ad78d725b1075a9ea0f/thumbnails/thumbnail.jpg"
            )
        );
    }
}
