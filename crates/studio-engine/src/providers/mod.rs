//! Vendor executors for text, image and video generation.

mod dryrun;
mod flux;
mod ideogram;
mod imagen;
mod kling;
mod minimax;
mod openai;
mod runway;
mod topaz;

use std::time::Duration;

use serde_json::{Map, Value};
use studio_contracts::api::{ImageResponse, JobStatusResponse};
use studio_contracts::providers::{NamedProvider, ProviderRegistry};
use studio_contracts::{StudioError, StudioResult};

use crate::polling::PollPolicy;

pub use dryrun::DryrunProvider;
pub use flux::FluxProvider;
pub use ideogram::IdeogramProvider;
pub use imagen::ImagenProvider;
pub use kling::KlingProvider;
pub use minimax::MinimaxProvider;
pub use openai::OpenAiProvider;
pub use runway::RunwayProvider;
pub use topaz::TopazProvider;

#[derive(Debug, Clone, PartialEq, Default)]
pub struct TextRequest {
    pub prompt: String,
    /// Vendor model id.
    pub model: String,
    pub images: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextOutput {
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ImageRequest {
    pub prompt: String,
    /// Vendor model id.
    pub model: String,
    /// Node ratio such as `16:9`.
    pub ratio: Option<String>,
    /// Pixel size such as `1024x1024`, for vendors that take one.
    pub size: Option<String>,
    pub images: Vec<String>,
    pub options: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageOutput {
    Url(String),
    Base64 { data: String, mime: Option<String> },
}

impl ImageOutput {
    pub fn into_response(self) -> ImageResponse {
        match self {
            Self::Url(url) => ImageResponse {
                url: Some(url),
                ..ImageResponse::default()
            },
            Self::Base64 { data, mime } => ImageResponse {
                url: None,
                b64: Some(data),
                mime,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct VideoRequest {
    pub prompt: String,
    /// Vendor model id.
    pub model: String,
    pub ratio: Option<String>,
    pub duration_secs: u32,
    pub images: Vec<String>,
    pub videos: Vec<String>,
    pub options: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VideoOutput {
    Url(String),
    /// Client-polled job.
    Job(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum JobStatus {
    Pending(Option<String>),
    Ready(String),
    Failed {
        state: Option<String>,
        error: Option<String>,
        details: Option<Value>,
    },
}

impl JobStatus {
    pub fn into_response(self) -> JobStatusResponse {
        match self {
            Self::Pending(state) => JobStatusResponse::pending(state),
            Self::Ready(url) => JobStatusResponse::ready(url),
            Self::Failed {
                state,
                error,
                details,
            } => JobStatusResponse::failed(state, error, details),
        }
    }
}

pub trait TextProvider: NamedProvider + Send + Sync {
    fn generate(&self, request: &TextRequest) -> StudioResult<TextOutput>;
}

pub trait ImageProvider: NamedProvider + Send + Sync {
    fn generate(&self, request: &ImageRequest) -> StudioResult<ImageOutput>;
}

pub trait VideoProvider: NamedProvider + Send + Sync {
    fn generate(&self, request: &VideoRequest) -> StudioResult<VideoOutput>;

    fn poll(&self, job_id: &str) -> StudioResult<JobStatus> {
        Err(StudioError::validation(format!(
            "{} does not issue job ids ('{job_id}')",
            self.name()
        )))
    }

    fn poll_policy(&self) -> PollPolicy {
        PollPolicy::fixed(Duration::from_secs(5), Duration::from_secs(600))
    }
}

pub type TextProviders = ProviderRegistry<Box<dyn TextProvider>>;
pub type ImageProviders = ProviderRegistry<Box<dyn ImageProvider>>;
pub type VideoProviders = ProviderRegistry<Box<dyn VideoProvider>>;

/// Every text executor, built on one shared HTTP client.
pub fn default_text_providers(http: &reqwest::blocking::Client) -> TextProviders {
    let providers: Vec<Box<dyn TextProvider>> = vec![
        Box::new(OpenAiProvider::new(http.clone())),
        Box::new(DryrunProvider::new()),
    ];
    ProviderRegistry::new(providers)
}

pub fn default_image_providers(http: &reqwest::blocking::Client) -> ImageProviders {
    let providers: Vec<Box<dyn ImageProvider>> = vec![
        Box::new(OpenAiProvider::new(http.clone())),
        Box::new(FluxProvider::new(http.clone())),
        Box::new(IdeogramProvider::new(http.clone())),
        Box::new(ImagenProvider::new(http.clone())),
        Box::new(RunwayProvider::new(http.clone())),
        Box::new(TopazProvider::new(http.clone())),
        Box::new(DryrunProvider::new()),
    ];
    ProviderRegistry::new(providers)
}

pub fn default_video_providers(http: &reqwest::blocking::Client) -> VideoProviders {
    let providers: Vec<Box<dyn VideoProvider>> = vec![
        Box::new(KlingProvider::new(http.clone())),
        Box::new(MinimaxProvider::new(http.clone())),
        Box::new(RunwayProvider::new(http.clone())),
        Box::new(TopazProvider::new(http.clone())),
        Box::new(DryrunProvider::new()),
    ];
    ProviderRegistry::new(providers)
}

/// Map key/value lookups shared by the option-driven providers.
pub(crate) fn option_f64(options: &Map<String, Value>, key: &str) -> Option<f64> {
    options.get(key).and_then(|value| match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    })
}

pub(crate) fn option_str<'a>(options: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    options
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
}
