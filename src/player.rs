//! Binds a resolved video source to a video element.
//!
//! Clients that play HLS natively get the manifest URL assigned directly. Everyone else gets an
//! adaptive streaming engine (hls.js on the page) which is created lazily, owned by exactly one
//! [`PlaybackController`], and destroyed before any replacement is created.
//!
//! ```text
//! Idle -> SourceResolved -> NativePlayback | EngineAttached -> (Playing <-> Buffering <-> Error) -> TornDown
//! ```

use std::{
    ops::{Deref, DerefMut},
    time::Duration,
};

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::{
    catalog::{Catalog, LookupError},
    resolver::{Environment, VideoSource, resolve},
};

pub const UNSUPPORTED_MESSAGE: &str = "Video format not supported in this browser";
pub const LOADER_FAILED_MESSAGE: &str = "Failed to load video player";
pub const PLAYBACK_ERROR_MESSAGE: &str = "Video playback error";
pub const ELEMENT_ERROR_MESSAGE: &str = "Failed to load video";

/// What the client can do without help
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClientCapabilities {
    /// `canPlayType("application/vnd.apple.mpegurl")` answered something other than `""`
    pub native_hls: bool,
}

/// Buffering limits handed to the engine on construction
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub max_buffer_length: Duration,
    pub max_max_buffer_length: Duration,
    /// Bytes
    pub max_buffer_size: u64,
    pub max_buffer_hole: Duration,
    pub low_latency_mode: bool,
    pub progressive: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_buffer_length: Duration::from_secs(30),
            max_max_buffer_length: Duration::from_secs(600),
            max_buffer_size: 60 * 1000 * 1000,
            max_buffer_hole: Duration::from_millis(500),
            low_latency_mode: true,
            progressive: true,
        }
    }
}

pub trait MediaElement {
    fn set_source(&mut self, url: &str);
}

/// An adaptive streaming engine bound to the controller's media element
pub trait StreamEngine {
    fn attach_media(&mut self);
    fn load_source(&mut self, url: &str);
    fn start_load(&mut self);
    fn recover_media_error(&mut self);
    fn destroy(&mut self);
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("streaming engine failed to load: {0}")]
pub struct EngineLoadError(pub String);

/// The lazily loaded engine module
pub trait EngineLoader {
    type Engine: StreamEngine;

    fn is_supported(&self) -> bool;

    /// # Errors
    /// Errors when the engine module can't be loaded
    fn create(&mut self, config: &EngineConfig) -> Result<Self::Engine, EngineLoadError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineErrorKind {
    Network,
    Media,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineError {
    pub kind: EngineErrorKind,
    pub fatal: bool,
    pub details: String,
}

impl EngineError {
    #[must_use]
    pub fn fatal(kind: EngineErrorKind, details: &str) -> Self {
        Self {
            kind,
            fatal: true,
            details: details.to_string(),
        }
    }
}

/// Error reported by the media element itself
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MediaErrorDetail {
    pub code: Option<u16>,
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackFailure {
    Unsupported,
    LoaderFailed(EngineLoadError),
    Engine(EngineError),
    Element(MediaErrorDetail),
}

impl PlaybackFailure {
    /// Short message shown on top of the player
    #[must_use]
    pub const fn user_message(&self) -> &'static str {
        match self {
            Self::Unsupported => UNSUPPORTED_MESSAGE,
            Self::LoaderFailed(_) => LOADER_FAILED_MESSAGE,
            Self::Engine(_) => PLAYBACK_ERROR_MESSAGE,
            Self::Element(_) => ELEMENT_ERROR_MESSAGE,
        }
    }
}

/// Lifecycle callbacks for the embedding page
pub trait PlaybackObserver {
    fn on_load_start(&mut self) {}
    fn on_can_play(&mut self) {}
    fn on_error(&mut self, _failure: &PlaybackFailure) {}
}

impl PlaybackObserver for () {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Idle,
    SourceResolved,
    NativePlayback,
    EngineAttached,
    Playing,
    Buffering,
    Error,
    TornDown,
}

/// Owned engine; destroyed exactly once when dropped
pub struct EngineHandle<E: StreamEngine> {
    engine: E,
}

impl<E: StreamEngine> EngineHandle<E> {
    const fn new(engine: E) -> Self {
        Self { engine }
    }
}

impl<E: StreamEngine> Deref for EngineHandle<E> {
    type Target = E;

    fn deref(&self) -> &E {
        &self.engine
    }
}

impl<E: StreamEngine> DerefMut for EngineHandle<E> {
    fn deref_mut(&mut self) -> &mut E {
        &mut self.engine
    }
}

impl<E: StreamEngine> Drop for EngineHandle<E> {
    fn drop(&mut self) {
        debug!("Cleaning up streaming engine");
        self.engine.destroy();
    }
}

pub struct PlaybackController<M, L, O>
where
    M: MediaElement,
    L: EngineLoader,
    O: PlaybackObserver,
{
    element: M,
    loader: L,
    observer: O,
    capabilities: ClientCapabilities,
    engine_config: EngineConfig,

    engine: Option<EngineHandle<L::Engine>>,
    key: Option<String>,
    source: Option<VideoSource>,
    state: PlaybackState,
    error: Option<&'static str>,
    is_loading: bool,

    // Each recovery is attempted once until the video plays again
    network_retried: bool,
    media_recovered: bool,
    // Stream delivery failed for good; only a new mount leaves Error
    engine_lost: bool,
}

impl<M, L, O> PlaybackController<M, L, O>
where
    M: MediaElement,
    L: EngineLoader,
    O: PlaybackObserver,
{
    pub fn new(element: M, loader: L, observer: O, capabilities: ClientCapabilities) -> Self {
        Self {
            element,
            loader,
            observer,
            capabilities,
            engine_config: EngineConfig::default(),
            engine: None,
            key: None,
            source: None,
            state: PlaybackState::Idle,
            error: None,
            is_loading: false,
            network_retried: false,
            media_recovered: false,
            engine_lost: false,
        }
    }

    #[must_use]
    pub fn with_engine_config(mut self, engine_config: EngineConfig) -> Self {
        self.engine_config = engine_config;
        self
    }

    /// Loads `key` into the element, tearing down whatever was loaded before
    ///
    /// # Errors
    /// Propagates the resolver's [`LookupError`]; the controller is left idle
    pub fn mount(
        &mut self,
        catalog: &Catalog,
        key: &str,
        env: &Environment,
    ) -> Result<(), LookupError> {
        self.release_engine();
        self.key = None;
        self.source = None;
        self.error = None;
        self.is_loading = false;
        self.network_retried = false;
        self.media_recovered = false;
        self.engine_lost = false;
        self.state = PlaybackState::Idle;

        let source = resolve(catalog, key, env)?;
        info!(key, ?source, native_hls = self.capabilities.native_hls, "Loading video");
        self.key = Some(key.to_string());
        self.state = PlaybackState::SourceResolved;
        self.is_loading = true;

        match &source {
            VideoSource::Local(path) => {
                info!("Using local video: {path}");
                self.element.set_source(path);
                self.state = PlaybackState::NativePlayback;
            }
            VideoSource::Stream(url) if self.capabilities.native_hls => {
                info!("Native HLS support detected");
                self.element.set_source(url);
                self.state = PlaybackState::NativePlayback;
            }
            VideoSource::Stream(url) => self.attach_engine(url),
        }

        self.source = Some(source);
        Ok(())
    }

    fn attach_engine(&mut self, url: &str) {
        if !self.loader.is_supported() {
            error!("Streaming engine is not supported by this client");
            self.engine_lost = true;
            self.surface_error(PlaybackFailure::Unsupported);
            return;
        }

        let engine = match self.loader.create(&self.engine_config) {
            Ok(e) => e,
            Err(e) => {
                error!("Failed to load streaming engine: {e}");
                self.engine_lost = true;
                self.surface_error(PlaybackFailure::LoaderFailed(e));
                return;
            }
        };

        let mut handle = EngineHandle::new(engine);
        handle.attach_media();
        handle.load_source(url);
        self.engine = Some(handle);
        self.state = PlaybackState::EngineAttached;
        debug!("Streaming engine attached");
    }

    pub fn on_load_start(&mut self) {
        if !self.is_live() {
            return;
        }
        debug!("Video load started");
        self.is_loading = true;
        self.state = PlaybackState::Buffering;
        self.observer.on_load_start();
    }

    pub fn on_can_play(&mut self) {
        if !self.is_live() {
            return;
        }
        debug!("Video can play");
        self.is_loading = false;
        self.error = None;
        self.network_retried = false;
        self.media_recovered = false;
        self.state = PlaybackState::Playing;
        self.observer.on_can_play();
    }

    pub fn on_element_error(&mut self, detail: MediaErrorDetail) {
        if !self.is_live() {
            return;
        }
        if detail.code.is_some() || detail.message.is_some() {
            error!(
                code = ?detail.code,
                message = detail.message.as_deref().unwrap_or("Unknown error"),
                src = self.source.as_ref().map(VideoSource::url),
                "Video error"
            );
        }
        self.surface_error(PlaybackFailure::Element(detail));
    }

    /// Applies the recovery policy for an error reported by the engine
    pub fn on_engine_error(&mut self, err: EngineError) {
        let Some(engine) = self.engine.as_mut() else {
            debug!(?err, "Ignoring engine error without an attached engine");
            return;
        };

        if !err.fatal {
            warn!(kind = ?err.kind, "Non-fatal engine error: {}", err.details);
            return;
        }

        match err.kind {
            EngineErrorKind::Network if !self.network_retried => {
                warn!("Fatal network error, trying to recover...");
                self.network_retried = true;
                engine.start_load();
                self.state = PlaybackState::Buffering;
            }
            EngineErrorKind::Media if !self.media_recovered => {
                warn!("Fatal media error, trying to recover...");
                self.media_recovered = true;
                engine.recover_media_error();
                self.state = PlaybackState::Buffering;
            }
            _ => {
                error!(kind = ?err.kind, "Fatal error, cannot recover: {}", err.details);
                self.release_engine();
                self.engine_lost = true;
                self.surface_error(PlaybackFailure::Engine(err));
            }
        }
    }

    /// Releases the engine and stops reacting to events until the next [`Self::mount`]
    pub fn unmount(&mut self) {
        self.release_engine();
        self.key = None;
        self.source = None;
        self.error = None;
        self.is_loading = false;
        self.engine_lost = false;
        self.state = PlaybackState::TornDown;
    }

    fn release_engine(&mut self) {
        // Drop runs `destroy`
        self.engine = None;
    }

    fn surface_error(&mut self, failure: PlaybackFailure) {
        self.error = Some(failure.user_message());
        self.is_loading = false;
        self.state = PlaybackState::Error;
        self.observer.on_error(&failure);
    }

    const fn is_live(&self) -> bool {
        !self.engine_lost && !matches!(self.state, PlaybackState::Idle | PlaybackState::TornDown)
    }

    #[must_use]
    pub const fn state(&self) -> PlaybackState {
        self.state
    }

    #[must_use]
    pub const fn error_message(&self) -> Option<&'static str> {
        self.error
    }

    #[must_use]
    pub const fn is_loading(&self) -> bool {
        self.is_loading
    }

    #[must_use]
    pub const fn has_engine(&self) -> bool {
        self.engine.is_some()
    }

    #[must_use]
    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    #[must_use]
    pub const fn source(&self) -> Option<&VideoSource> {
        self.source.as_ref()
    }

    #[must_use]
    pub const fn element(&self) -> &M {
        &self.element
    }

    #[must_use]
    pub const fn observer(&self) -> &O {
        &self.observer
    }
}
