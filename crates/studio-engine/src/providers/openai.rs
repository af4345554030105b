use reqwest::blocking::multipart::Form as MultipartForm;
use reqwest::blocking::Client as HttpClient;
use serde_json::{json, Value};
use studio_contracts::providers::NamedProvider;
use studio_contracts::{StudioError, StudioResult};
use tracing::info;

use super::{ImageOutput, ImageProvider, ImageRequest, TextOutput, TextProvider, TextRequest};
use crate::config::Credential;
use crate::http::{api_base, details_from_text, parse_json, read_text, response_json_or_error, send};
use crate::media::load_media;

const IMAGE_MODEL: &str = "gpt-image-1";
const MAX_EDIT_IMAGES: usize = 10;

#[derive(Debug, Clone)]
pub struct OpenAiProvider {
    api_base: String,
    http: HttpClient,
    credential: Credential,
}

impl OpenAiProvider {
    pub fn new(http: HttpClient) -> Self {
        Self {
            api_base: api_base(&["OPENAI_API_BASE"], "https://api.openai.com/v1"),
            http,
            credential: Credential::from_env("OPENAI_API_KEY"),
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

    fn responses_input(request: &TextRequest) -> Value {
        if request.images.is_empty() {
            return Value::String(request.prompt.clone());
        }
        let mut content = vec![json!({"type": "input_text", "text": request.prompt})];
        content.extend(request.images.iter().map(|url| {
            json!({"type": "input_image", "image_url": url, "detail": "high"})
        }));
        json!([{"role": "user", "content": content}])
    }

    fn generate_image(&self, api_key: &str, request: &ImageRequest) -> StudioResult<ImageOutput> {
        let size = request.size.as_deref().unwrap_or("1024x1024");
        let payload = json!({
            "model": IMAGE_MODEL,
            "prompt": request.prompt,
            "size": size,
        });
        let response = send(
            "OpenAI",
            self.http
                .post(format!("{}/images/generations", self.api_base))
                .bearer_auth(api_key)
                .json(&payload),
        )?;
        let data = response_json_or_error("OpenAI", response)?;
        extract_image(&data)
    }

    fn edit_image(&self, api_key: &str, request: &ImageRequest) -> StudioResult<ImageOutput> {
        let prompt = if request.prompt.trim().is_empty() {
            " ".to_string()
        } else {
            request.prompt.clone()
        };
        let mut form = MultipartForm::new()
            .text("model", IMAGE_MODEL)
            .text("prompt", prompt);
        if let Some(size) = request.size.as_deref().filter(|size| *size != "auto") {
            form = form.text("size", size.to_string());
        }
        for (index, input) in request.images.iter().take(MAX_EDIT_IMAGES).enumerate() {
            let media = load_media(&self.http, input, "application/octet-stream", "reference image")?;
            form = form.part("image[]", media.into_part(&format!("image_{index}"))?);
        }

        let response = send(
            "OpenAI",
            self.http
                .post(format!("{}/images/edits", self.api_base))
                .bearer_auth(api_key)
                .multipart(form),
        )?;
        let (code, body) = read_text("OpenAI", response)?;
        if !(200..300).contains(&code) {
            return Err(StudioError::upstream_with(
                format!("OpenAI image edit failed: {code}"),
                502,
                details_from_text(&body),
            ));
        }
        let data = parse_json("OpenAI", &body)?;
        extract_image(&data)
    }
}

impl NamedProvider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }
}

impl TextProvider for OpenAiProvider {
    fn generate(&self, request: &TextRequest) -> StudioResult<TextOutput> {
        let api_key = self.credential.resolve()?;
        let payload = json!({
            "model": request.model,
            "input": Self::responses_input(request),
        });
        info!(model = %request.model, images = request.images.len(), "openai text request");
        let response = send(
            "OpenAI",
            self.http
                .post(format!("{}/responses", self.api_base))
                .bearer_auth(&api_key)
                .json(&payload),
        )?;
        let data = response_json_or_error("OpenAI", response)?;
        Ok(TextOutput {
            text: extract_output_text(&data),
        })
    }
}

impl ImageProvider for OpenAiProvider {
    fn generate(&self, request: &ImageRequest) -> StudioResult<ImageOutput> {
        let api_key = self.credential.resolve()?;
        if !request.images.is_empty() {
            info!(images = request.images.len(), "openai image edit request");
            return self.edit_image(&api_key, request);
        }
        if request.prompt.trim().is_empty() {
            return Err(StudioError::validation(
                "Prompt is required when no input images are provided",
            ));
        }
        info!("openai image generation request");
        self.generate_image(&api_key, request)
    }
}

/// `output_text` when present, otherwise every `output_text` content part joined.
fn extract_output_text(data: &Value) -> String {
    if let Some(text) = data.get("output_text").and_then(Value::as_str) {
        return text.to_string();
    }
    data.get("output")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.get("content").and_then(Value::as_array))
                .flatten()
                .filter(|part| part.get("type").and_then(Value::as_str) == Some("output_text"))
                .filter_map(|part| part.get("text").and_then(Value::as_str))
                .collect::<Vec<&str>>()
                .join("")
        })
        .unwrap_or_default()
}

fn extract_image(data: &Value) -> StudioResult<ImageOutput> {
    let first = data.pointer("/data/0");
    if let Some(url) = first
        .and_then(|item| item.get("url"))
        .and_then(Value::as_str)
        .filter(|url| !url.is_empty())
    {
        return Ok(ImageOutput::Url(url.to_string()));
    }
    if let Some(b64) = first
        .and_then(|item| item.get("b64_json"))
        .and_then(Value::as_str)
        .filter(|b64| !b64.is_empty())
    {
        return Ok(ImageOutput::Base64 {
            data: b64.to_string(),
            mime: None,
        });
    }
    Err(StudioError::upstream("OpenAI response missing image data"))
}
