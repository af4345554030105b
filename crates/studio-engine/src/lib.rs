pub mod config;
pub mod download;
pub mod http;
pub mod media;
pub mod polling;
pub mod providers;

mod endpoints;
mod flow;

use serde_json::Value;
use studio_contracts::events::{EventPayload, EventWriter};
use studio_contracts::models::ModelSelector;
use studio_contracts::{StudioError, StudioResult};

pub use config::{Credential, StudioConfig};
pub use download::{DownloadedResource, Downloader};
pub use flow::wait_for_job;

use providers::{
    default_image_providers, default_text_providers, default_video_providers, ImageProvider,
    ImageProviders, TextProvider, TextProviders, VideoProvider, VideoProviders,
};

const DRYRUN_PROVIDER: &str = "dryrun";

/// Provider registries, catalog and event log behind every endpoint and flow run.
pub struct StudioEngine {
    config: StudioConfig,
    selector: ModelSelector,
    text: TextProviders,
    images: ImageProviders,
    videos: VideoProviders,
    downloader: Downloader,
    events: EventWriter,
}

impl StudioEngine {
    pub fn new(config: StudioConfig) -> StudioResult<Self> {
        let http = http::build_client(config.request_timeout)?;
        let events = match &config.events_path {
            Some(path) => EventWriter::new(path, "studio"),
            None => EventWriter::discard("studio"),
        };
        Ok(Self {
            selector: ModelSelector::default(),
            text: default_text_providers(&http),
            images: default_image_providers(&http),
            videos: default_video_providers(&http),
            downloader: Downloader::new(http),
            events,
            config,
        })
    }

    /// Engine that answers every generation offline.
    pub fn dryrun() -> StudioResult<Self> {
        Self::new(StudioConfig {
            dryrun: true,
            ..StudioConfig::default()
        })
    }

    pub fn with_events(mut self, events: EventWriter) -> Self {
        self.events = events;
        self
    }

    pub fn with_selector(mut self, selector: ModelSelector) -> Self {
        self.selector = selector;
        self
    }

    pub fn register_text_provider(&mut self, provider: Box<dyn TextProvider>) {
        self.text.register(provider);
    }

    pub fn register_image_provider(&mut self, provider: Box<dyn ImageProvider>) {
        self.images.register(provider);
    }

    pub fn register_video_provider(&mut self, provider: Box<dyn VideoProvider>) {
        self.videos.register(provider);
    }

    pub fn config(&self) -> &StudioConfig {
        &self.config
    }

    pub fn selector(&self) -> &ModelSelector {
        &self.selector
    }

    pub fn event_writer(&self) -> EventWriter {
        self.events.clone()
    }

    pub fn emit_event(&self, event_type: &str, payload: EventPayload) -> StudioResult<Value> {
        emit(&self.events, event_type, payload)
    }

    fn route<'a>(&self, provider: &'a str) -> &'a str {
        if self.config.dryrun {
            DRYRUN_PROVIDER
        } else {
            provider
        }
    }

    pub fn text_provider(&self, name: &str) -> StudioResult<&dyn TextProvider> {
        let name = self.route(name);
        self.text
            .get(name)
            .map(|provider| provider.as_ref())
            .ok_or_else(|| StudioError::not_found(format!("Unknown text provider '{name}'")))
    }

    pub fn image_provider(&self, name: &str) -> StudioResult<&dyn ImageProvider> {
        let name = self.route(name);
        self.images
            .get(name)
            .map(|provider| provider.as_ref())
            .ok_or_else(|| StudioError::not_found(format!("Unknown image provider '{name}'")))
    }

    pub fn video_provider(&self, name: &str) -> StudioResult<&dyn VideoProvider> {
        let name = self.route(name);
        self.videos
            .get(name)
            .map(|provider| provider.as_ref())
            .ok_or_else(|| StudioError::not_found(format!("Unknown video provider '{name}'")))
    }
}

pub(crate) fn emit(
    events: &EventWriter,
    event_type: &str,
    payload: EventPayload,
) -> StudioResult<Value> {
    events
        .emit(event_type, payload)
        .map_err(|err| StudioError::internal(format!("Failed to write {event_type} event: {err:#}")))
}
