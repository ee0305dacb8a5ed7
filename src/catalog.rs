use std::{collections::HashSet, path::Path, sync::LazyLock};

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Cloudflare Stream video uids are 32 lowercase hex characters
pub static STREAM_UID_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9a-f]{32}$").unwrap());

/// Directory the landing page serves its static videos from
pub const LOCAL_VIDEO_DIR: &str = "/videos";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LookupError {
    #[error("unknown video key `{0}`")]
    UnknownKey(String),
    #[error("video `{0}` has no Stream identifier yet, upload it first")]
    NotUploaded(String),
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("reading catalog file")]
    Io(#[from] std::io::Error),
    #[error("parsing catalog JSON")]
    Json(#[from] serde_json::Error),
    #[error("duplicate video key `{0}`")]
    DuplicateKey(String),
    #[error("video `{key}` has a malformed Stream identifier `{stream_id}`")]
    MalformedId { key: String, stream_id: String },
}

/// One entry of the descriptor mapping
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoDescriptor {
    pub key: String,
    /// Opaque identifier assigned by Cloudflare Stream at upload time. Empty until uploaded.
    #[serde(default)]
    pub stream_id: String,
    pub filename: String,
    pub name: String,
}

impl VideoDescriptor {
    #[must_use]
    pub fn new(key: &str, stream_id: &str, filename: &str, name: &str) -> Self {
        Self {
            key: key.to_string(),
            stream_id: stream_id.to_string(),
            filename: filename.to_string(),
            name: name.to_string(),
        }
    }

    /// Path the page requests when serving the file itself, e.g. `/videos/bloom2sig.mp4`
    #[must_use]
    pub fn local_path(&self) -> String {
        format!("{LOCAL_VIDEO_DIR}/{}", self.filename)
    }

    #[must_use]
    pub fn is_uploaded(&self) -> bool {
        !self.stream_id.is_empty()
    }
}

/// Ordered mapping of logical video keys to their descriptors
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Catalog {
    videos: Vec<VideoDescriptor>,
}

impl Catalog {
    /// The landing page's videos, with the identifiers from the last migration
    #[must_use]
    pub fn builtin() -> Self {
        Self {
            videos: vec![
                VideoDescriptor::new(
                    "trimmedIntro",
                    "58ef7fad00bc439c97e9eecbd5df4f10",
                    "trimmedIntro.mp4",
                    "TimeBack Introduction Video",
                ),
                VideoDescriptor::new(
                    "learningScience",
                    "ba54db52baa14399965d55553ee3db40",
                    "learningScience.mp4",
                    "Learning Science - 2 Sigma Discovery",
                ),
                VideoDescriptor::new(
                    "IntroToTB",
                    "28fbc4ff4ba44a6aadc4444167f8b9b9",
                    "IntroToTB.mp4",
                    "Introduction to TimeBack",
                ),
                VideoDescriptor::new(
                    "IntroToLearningApps",
                    "2909dc54ad15416a93e6f8bd8d568af6",
                    "IntroToLearningApps.mp4",
                    "Introduction to Learning Apps",
                ),
                VideoDescriptor::new(
                    "bloom2sig",
                    "d9a2589b04104ad78d725b1075a9ea0f",
                    "bloom2sig.mp4",
                    "Bloom 2 Sigma",
                ),
            ],
        }
    }

    /// Builds a catalog, rejecting duplicate keys and malformed identifiers
    ///
    /// # Errors
    /// See [`CatalogError`]
    pub fn new(videos: Vec<VideoDescriptor>) -> Result<Self, CatalogError> {
        let mut seen = HashSet::new();
        for video in &videos {
            if !seen.insert(video.key.as_str()) {
                return Err(CatalogError::DuplicateKey(video.key.clone()));
            }
            if video.is_uploaded() && !STREAM_UID_REGEX.is_match(&video.stream_id) {
                return Err(CatalogError::MalformedId {
                    key: video.key.clone(),
                    stream_id: video.stream_id.clone(),
                });
            }
        }

        Ok(Self { videos })
    }

    /// # Errors
    /// Errors on malformed JSON or on any [`Catalog::new`] validation failure
    pub fn from_json(json: &str) -> Result<Self, CatalogError> {
        Self::new(serde_json::from_str(json)?)
    }

    /// # Errors
    /// Errors when the file can't be read or doesn't hold a valid catalog
    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        Self::from_json(&std::fs::read_to_string(path)?)
    }

    /// # Errors
    /// [`LookupError::UnknownKey`] when no descriptor has this key
    pub fn get(&self, key: &str) -> Result<&VideoDescriptor, LookupError> {
        self.videos
            .iter()
            .find(|v| v.key == key)
            .ok_or_else(|| LookupError::UnknownKey(key.to_string()))
    }

    #[must_use]
    pub fn videos(&self) -> &[VideoDescriptor] {
        &self.videos
    }
}

impl Default for Catalog {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_catalog_is_valid() {
        let builtin = Catalog::builtin();
        let rebuilt = Catalog::new(builtin.videos().to_vec()).unwrap();
        assert_eq!(rebuilt.videos().len(), 5);
        assert_eq!(rebuilt.videos()[0].key, "trimmedIntro");
        assert_eq!(rebuilt.videos()[4].key, "bloom2sig");
    }

    #[test]
    fn local_path_points_at_static_dir() {
        let catalog = Catalog::builtin();
        let video = catalog.get("learningScience").unwrap();
        assert_eq!(video.local_path(), "/videos/learningScience.mp4");
    }

    #[test]
    fn unknown_key_is_a_lookup_failure() {
        let catalog = Catalog::builtin();
        assert_eq!(
            catalog.get("missing"),
            Err(LookupError::UnknownKey("missing".to_string()))
        );
    }

    #[test]
    fn parses_hand_edited_json() {
        let catalog = Catalog::from_json(
            r#"[
                { "key": "intro", "streamId": "58ef7fad00bc439c97e9eecbd5df4f10", "filename": "intro.mp4", "name": "Intro" },
                { "key": "outro", "filename": "outro.mp4", "name": "Outro" }
            ]"#,
        )
        .unwrap();

        assert!(catalog.get("intro").unwrap().is_uploaded());
        assert!(!catalog.get("outro").unwrap().is_uploaded());
    }

    #[test]
    fn rejects_duplicate_keys() {
        let video = VideoDescriptor::new("a", "", "a.mp4", "A");
        let err = Catalog::new(vec![video.clone(), video]).unwrap_err();
        assert!(matches!(err, CatalogError::DuplicateKey(k) if k == "a"));
    }

    #[test]
    fn rejects_malformed_identifiers() {
        let err = Catalog::new(vec![VideoDescriptor::new("a", "not-a-uid", "a.mp4", "A")])
            .unwrap_err();
        assert!(matches!(err, CatalogError::MalformedId { .. }));
    }

    #[test]
    fn loads_catalog_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(
            &mut file,
            br#"[{ "key": "intro", "streamId": "58ef7fad00bc439c97e9eecbd5df4f10", "filename": "intro.mp4", "name": "Intro" }]"#,
        )
        .unwrap();

        let catalog = Catalog::load(file.path()).unwrap();
        assert_eq!(catalog.get("intro").unwrap().local_path(), "/videos/intro.mp4");

        assert!(matches!(
            Catalog::load(&file.path().with_extension("missing")),
            Err(CatalogError::Io(_))
        ));
    }

    #[test]
    fn loading_garbage_is_a_json_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut file, b"{ not json").unwrap();

        assert!(matches!(
            Catalog::load(file.path()),
            Err(CatalogError::Json(_))
        ));
    }
}
