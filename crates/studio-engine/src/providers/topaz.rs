use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use reqwest::blocking::multipart::Form as MultipartForm;
use reqwest::blocking::Client as HttpClient;
use reqwest::header::{CONTENT_TYPE, ETAG};
use serde_json::{json, Map, Value};
use studio_contracts::providers::NamedProvider;
use studio_contracts::{StudioError, StudioResult};
use tracing::{debug, info};

use super::{
    option_f64, ImageOutput, ImageProvider, ImageRequest, VideoOutput, VideoProvider,
    VideoRequest,
};
use crate::config::Credential;
use crate::http::{api_base, details_from_text, read_text, send, string_at};
use crate::media::{load_media, MediaBytes};
use crate::polling::{poll_until, PollPolicy, PollState};

const MAX_DIMENSION: u32 = 4096;
const DEFAULT_IMAGE_MODEL: &str = "Standard V2";

const ENHANCE_PATHS: &[&str] = &[
    "/v1/image/enhance",
    "/v1/images/enhance",
    "/v1/enhance",
    "/image/v1/enhance",
    "/images/v1/enhance",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AuthStyle {
    ApiKeyHeader,
    LegacyApiKeyHeader,
    Bearer,
}

impl AuthStyle {
    const ALL: [AuthStyle; 3] = [Self::ApiKeyHeader, Self::LegacyApiKeyHeader, Self::Bearer];

    fn label(self) -> &'static str {
        match self {
            Self::ApiKeyHeader => "x-api-key",
            Self::LegacyApiKeyHeader => "Api-Key",
            Self::Bearer => "Authorization Bearer",
        }
    }
}

/// Topaz Labs image enhance and video upscale.
#[derive(Debug, Clone)]
pub struct TopazProvider {
    api_base: String,
    http: HttpClient,
    credential: Credential,
    video_poll_policy: PollPolicy,
}

impl TopazProvider {
    pub fn new(http: HttpClient) -> Self {
        Self {
            api_base: api_base(&["TOPAZ_API_BASE"], "https://api.topazlabs.com"),
            http,
            credential: Credential::from_env("TOPAZ_API_KEY"),
            video_poll_policy: PollPolicy::backoff(
                Duration::from_millis(2000),
                Duration::from_millis(500),
                Duration::from_millis(15000),
                Duration::from_secs(30 * 60),
            ),
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

    pub fn with_poll_policy(mut self, poll_policy: PollPolicy) -> Self {
        self.video_poll_policy = poll_policy;
        self
    }

    fn enhance_form(
        source: &MediaBytes,
        model: &str,
        settings: &EnhanceSettings,
    ) -> StudioResult<MultipartForm> {
        let mut form = MultipartForm::new()
            .text("model", model.to_string())
            .text("output_height", settings.output_height.to_string());
        for (key, value) in &settings.tuning {
            form = form.text(*key, value.to_string());
        }
        Ok(form.part("image", source.clone().into_part("input")?))
    }

    fn video_step(
        &self,
        step: &str,
        request: reqwest::blocking::RequestBuilder,
    ) -> StudioResult<Value> {
        let response = send("Topaz", request)?;
        let (code, body) = read_text("Topaz", response)?;
        if !(200..300).contains(&code) {
            return Err(StudioError::upstream_with(
                format!("Topaz {step} failed: {code}"),
                502,
                details_from_text(&body),
            ));
        }
        Ok(serde_json::from_str(&body).unwrap_or_else(|_| json!({})))
    }

    fn video_status(&self, api_key: &str, request_id: &str) -> StudioResult<PollState<Option<String>>> {
        let status = self.video_step(
            "status",
            self.http
                .get(format!("{}/video/{request_id}/status", self.api_base))
                .header("accept", "application/json")
                .header("X-API-Key", api_key),
        )?;
        let state = string_at(&status, &["/status", "/data/status"])
            .unwrap_or_default()
            .to_ascii_lowercase();
        match state.as_str() {
            "completed" | "succeeded" | "finished" | "success" => {
                Ok(PollState::Ready(first_http_url(&status)))
            }
            "failed" | "error" | "canceled" | "cancelled" => {
                Err(StudioError::job_failed("Topaz job failed", Some(status)))
            }
            _ => Ok(PollState::Pending(state)),
        }
    }
}

/// Output height plus the optional tuning fields, derived from request options.
#[derive(Debug, Clone, PartialEq)]
pub struct EnhanceSettings {
    pub output_width: Option<u32>,
    pub output_height: u32,
    pub tuning: Vec<(&'static str, f64)>,
}

impl EnhanceSettings {
    pub fn from_options(options: &Map<String, Value>) -> Self {
        let dimension = |key: &str| {
            option_f64(options, key)
                .filter(|value| *value >= 1.0)
                .map(|value| value.round() as u32)
        };
        let mut output_width = dimension("output_width");
        let mut output_height = dimension("output_height");
        if let (Some(width), Some(height)) = (output_width, output_height) {
            let (width, height) = clamp_dims(width, height, MAX_DIMENSION);
            output_width = Some(width);
            output_height = Some(height);
        }
        let output_height = output_height.unwrap_or_else(|| {
            let factor = option_f64(options, "scale")
                .filter(|scale| scale.is_finite())
                .unwrap_or(2.0)
                .clamp(2.0, 4.0);
            ((1024.0 * factor).round() as u32).clamp(512, MAX_DIMENSION)
        });
        let tuning = ["sharpen", "denoise", "fix_compression", "strength"]
            .into_iter()
            .filter_map(|key| option_f64(options, key).map(|value| (key, value)))
            .collect();
        Self {
            output_width,
            output_height,
            tuning,
        }
    }
}

/// Scales `width`x`height` down so neither side exceeds `max`, keeping the aspect ratio.
pub fn clamp_dims(width: u32, height: u32, max: u32) -> (u32, u32) {
    if width <= max && height <= max {
        return (width, height);
    }
    let ratio = f64::from(width) / f64::from(height.max(1));
    if width >= height {
        (max, ((f64::from(max) / ratio).round() as u32).max(1))
    } else {
        (((f64::from(max) * ratio).round() as u32).max(1), max)
    }
}

/// Create payload for a video upscale request.
pub fn video_create_payload(options: &Map<String, Value>) -> Value {
    let mut output = json!({"container": "mp4"});
    if let (Some(width), Some(height)) = (
        option_f64(options, "output_width"),
        option_f64(options, "output_height"),
    ) {
        output["resolution"] = json!({"width": width as u32, "height": height as u32});
    }
    let filters = match option_f64(options, "scale") {
        Some(scale) => json!([{"model": "upscale", "scale": scale as u32}]),
        None => json!([]),
    };
    json!({"output": output, "filters": filters})
}

fn first_http_url(status: &Value) -> Option<String> {
    [
        "/downloadUrl",
        "/outputUrl",
        "/data/downloadUrl",
        "/data/outputUrl",
        "/url",
        "/data/url",
    ]
    .iter()
    .filter_map(|pointer| status.pointer(pointer).and_then(Value::as_str))
    .find(|url| {
        let lower = url.to_ascii_lowercase();
        lower.starts_with("http://") || lower.starts_with("https://")
    })
    .map(str::to_string)
}

fn image_output(content_type: &str, body: &[u8]) -> ImageOutput {
    if content_type.contains("application/json") {
        if let Ok(data) = serde_json::from_slice::<Value>(body) {
            if let Some(url) = string_at(&data, &["/output_url", "/url", "/image_url"]) {
                return ImageOutput::Url(url);
            }
            if let Some(b64) = string_at(&data, &["/b64", "/image_base64"]) {
                return ImageOutput::Base64 {
                    data: b64,
                    mime: None,
                };
            }
        }
    }
    let mime = if content_type.starts_with("image/") {
        content_type.to_string()
    } else {
        "image/png".to_string()
    };
    ImageOutput::Base64 {
        data: BASE64.encode(body),
        mime: Some(mime),
    }
}

impl NamedProvider for TopazProvider {
    fn name(&self) -> &str {
        "topaz"
    }
}

impl ImageProvider for TopazProvider {
    fn generate(&self, request: &ImageRequest) -> StudioResult<ImageOutput> {
        let api_key = self.credential.resolve()?;
        let source_url = request
            .images
            .first()
            .ok_or_else(|| StudioError::validation("Topaz upscale requires an input image"))?;
        let settings = EnhanceSettings::from_options(&request.options);
        let model = if request.model.trim().is_empty() {
            DEFAULT_IMAGE_MODEL
        } else {
            request.model.as_str()
        };
        let source = load_media(&self.http, source_url, "application/octet-stream", "input image")?;

        let mut last_status = 0;
        let mut last_body = String::new();
        for path in ENHANCE_PATHS {
            for auth in AuthStyle::ALL {
                let endpoint = format!("{}{path}", self.api_base);
                let builder = self
                    .http
                    .post(&endpoint)
                    .header("accept", "application/json")
                    .multipart(Self::enhance_form(&source, model, &settings)?);
                let builder = match auth {
                    AuthStyle::ApiKeyHeader => builder.header("x-api-key", &api_key),
                    AuthStyle::LegacyApiKeyHeader => builder.header("Api-Key", &api_key),
                    AuthStyle::Bearer => builder.bearer_auth(&api_key),
                };
                let response = send("Topaz", builder)?;
                let code = response.status().as_u16();
                if code == 401 || code == 404 {
                    debug!(endpoint = %endpoint, auth = auth.label(), code, "topaz candidate rejected");
                    last_status = code;
                    last_body = response.text().unwrap_or_default();
                    continue;
                }
                let content_type = response
                    .headers()
                    .get(CONTENT_TYPE)
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or_default()
                    .to_string();
                if !(200..300).contains(&code) {
                    let body = response.text().unwrap_or_default();
                    return Err(StudioError::upstream_with(
                        format!("Topaz request failed: {code}"),
                        502,
                        Some(json!({"contentType": content_type, "details": body})),
                    ));
                }
                info!(endpoint = %endpoint, auth = auth.label(), "topaz enhance accepted");
                let body = response
                    .bytes()
                    .map_err(|err| StudioError::upstream(format!("Topaz request failed: {err}")))?;
                return Ok(image_output(&content_type, &body));
            }
        }
        let details = if last_body.is_empty() {
            "All candidates failed".to_string()
        } else {
            last_body
        };
        Err(StudioError::upstream_with(
            "Topaz request failed",
            502,
            Some(json!({
                "status": if last_status == 0 { 404 } else { last_status },
                "details": details,
                "candidates": ENHANCE_PATHS,
            })),
        ))
    }
}

impl VideoProvider for TopazProvider {
    fn generate(&self, request: &VideoRequest) -> StudioResult<VideoOutput> {
        let api_key = self.credential.resolve()?;
        let source_url = request
            .videos
            .first()
            .ok_or_else(|| StudioError::validation("Topaz video upscale requires a video input"))?;

        let created = self.video_step(
            "create",
            self.http
                .post(format!("{}/video/", self.api_base))
                .header("accept", "application/json")
                .header("X-API-Key", &api_key)
                .json(&video_create_payload(&request.options)),
        )?;
        let request_id = string_at(&created, &["/id", "/requestId", "/data/id"]).ok_or_else(|| {
            StudioError::upstream_with("Topaz create missing request id", 502, Some(created.clone()))
        })?;
        info!(request_id = %request_id, "topaz video request created");

        let accepted = self.video_step(
            "accept",
            self.http
                .patch(format!("{}/video/{request_id}/accept", self.api_base))
                .header("accept", "application/json")
                .header("X-API-Key", &api_key),
        )?;
        let upload_url = string_at(
            &accepted,
            &["/uploadUrls/0/url", "/data/uploadUrls/0/url", "/uploadUrl"],
        )
        .ok_or_else(|| {
            StudioError::upstream_with("Topaz accept missing upload URL", 502, Some(accepted.clone()))
        })?;
        let part_num = accepted
            .pointer("/uploadUrls/0/partNum")
            .or_else(|| accepted.pointer("/data/uploadUrls/0/partNum"))
            .and_then(Value::as_u64)
            .unwrap_or(1);

        let source = load_media(&self.http, source_url, "video/mp4", "input video")?;
        let uploaded = send(
            "Topaz",
            self.http
                .put(&upload_url)
                .header(CONTENT_TYPE, source.mime.as_str())
                .body(source.bytes),
        )?;
        let code = uploaded.status().as_u16();
        let e_tag = uploaded
            .headers()
            .get(ETAG)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_string();
        if !(200..300).contains(&code) {
            let body = uploaded.text().unwrap_or_default();
            return Err(StudioError::upstream_with(
                format!("Topaz upload failed: {code}"),
                502,
                details_from_text(&body),
            ));
        }

        self.video_step(
            "complete-upload",
            self.http
                .patch(format!("{}/video/{request_id}/complete-upload", self.api_base))
                .header("accept", "application/json")
                .header("X-API-Key", &api_key)
                .json(&json!({"uploadResults": [{"partNum": part_num, "eTag": e_tag}]})),
        )?;

        let url = match poll_until("topaz", &self.video_poll_policy, |_| {
            self.video_status(&api_key, &request_id)
        }) {
            Err(StudioError::Timeout(_)) => return Err(StudioError::timeout("Topaz job timed out")),
            other => other?,
        };
        url.map(VideoOutput::Url)
            .ok_or_else(|| StudioError::upstream("Topaz response missing video URL"))
    }

    fn poll_policy(&self) -> PollPolicy {
        self.video_poll_policy
    }
}
