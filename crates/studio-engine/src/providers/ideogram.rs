use reqwest::blocking::multipart::Form as MultipartForm;
use reqwest::blocking::Client as HttpClient;
use studio_contracts::providers::NamedProvider;
use studio_contracts::{StudioError, StudioResult};
use tracing::info;

use super::{ImageOutput, ImageProvider, ImageRequest};
use crate::config::Credential;
use crate::http::{api_base, details_from_text, parse_json, read_text, send, string_at};

#[derive(Debug, Clone)]
pub struct IdeogramProvider {
    api_base: String,
    http: HttpClient,
    credential: Credential,
}

impl IdeogramProvider {
    pub fn new(http: HttpClient) -> Self {
        Self {
            api_base: api_base(&["IDEOGRAM_API_BASE"], "https://api.ideogram.ai"),
            http,
            credential: Credential::from_env("IDEOGRAM_API_KEY"),
        }
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_credential(mut self, credential: Credential) -> Self {
        self.credential = credential;
        self
    }
}

/// `16:9` becomes `16x9`.
pub fn ideogram_aspect(ratio: &str) -> String {
    ratio.replacen(':', "x", 1)
}

impl NamedProvider for IdeogramProvider {
    fn name(&self) -> &str {
        "ideogram"
    }
}

impl ImageProvider for IdeogramProvider {
    fn generate(&self, request: &ImageRequest) -> StudioResult<ImageOutput> {
        let api_key = self.credential.resolve()?;
        let aspect = ideogram_aspect(request.ratio.as_deref().unwrap_or("1:1"));
        let form = MultipartForm::new()
            .text("prompt", request.prompt.clone())
            .text("aspect_ratio", aspect.clone())
            .text("num_images", "1");
        info!(aspect = %aspect, "ideogram request");
        let response = send(
            "Ideogram",
            self.http
                .post(format!("{}/v1/ideogram-v3/generate", self.api_base))
                .header("Api-Key", api_key)
                .header("accept", "application/json")
                .multipart(form),
        )?;
        let (code, body) = read_text("Ideogram", response)?;
        if !(200..300).contains(&code) {
            return Err(StudioError::upstream_with(
                format!("Ideogram request failed: {code}"),
                code,
                details_from_text(&body),
            ));
        }
        let data = parse_json("Ideogram", &body)?;
        match string_at(&data, &["/data/0/url"]) {
            Some(url) => Ok(ImageOutput::Url(url)),
            None => Err(StudioError::upstream_with(
                "Ideogram response missing image URL",
                502,
                Some(data),
            )),
        }
    }
}
