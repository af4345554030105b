use std::time::Duration;

use reqwest::blocking::Client as HttpClient;
use serde_json::{json, Value};
use studio_contracts::providers::NamedProvider;
use studio_contracts::{StudioError, StudioResult};
use tracing::info;

use super::{
    ImageOutput, ImageProvider, ImageRequest, VideoOutput, VideoProvider, VideoRequest,
};
use crate::config::Credential;
use crate::http::{api_base, response_json_or_error, send, string_at};
use crate::polling::{poll_until, PollPolicy, PollState};

const RUNWAY_VERSION: &str = "2024-11-06";
const IMAGE_MODEL: &str = "gen4_image_turbo";
const MAX_REFERENCE_IMAGES: usize = 3;

/// Runway text-to-image and video tasks, polled server side.
#[derive(Debug, Clone)]
pub struct RunwayProvider {
    api_base: String,
    http: HttpClient,
    credential: Credential,
    poll_policy: PollPolicy,
}

impl RunwayProvider {
    pub fn new(http: HttpClient) -> Self {
        Self {
            api_base: api_base(&["RUNWAY_API_BASE"], "https://api.dev.runwayml.com/v1"),
            http,
            credential: Credential::from_env("RUNWAYML_API_SECRET"),
            poll_policy: PollPolicy::fixed(Duration::from_secs(2), Duration::from_secs(600)),
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
        self.poll_policy = poll_policy;
        self
    }

    fn create_task(&self, api_key: &str, route: &str, payload: &Value) -> StudioResult<String> {
        let response = send(
            "Runway",
            self.http
                .post(format!("{}/{route}", self.api_base))
                .bearer_auth(api_key)
                .header("X-Runway-Version", RUNWAY_VERSION)
                .json(payload),
        )?;
        let created = response_json_or_error("Runway", response)?;
        string_at(&created, &["/id"])
            .ok_or_else(|| StudioError::upstream_with("Runway response missing task id", 502, Some(created)))
    }

    /// Polls `/tasks/{id}` and returns the first output URL.
    fn wait_for_output(&self, api_key: &str, task_id: &str) -> StudioResult<Option<String>> {
        poll_until("runway", &self.poll_policy, |_| {
            let response = send(
                "Runway",
                self.http
                    .get(format!("{}/tasks/{task_id}", self.api_base))
                    .bearer_auth(api_key)
                    .header("X-Runway-Version", RUNWAY_VERSION),
            )?;
            let task = response_json_or_error("Runway", response)?;
            let status = task
                .get("status")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_ascii_uppercase();
            match status.as_str() {
                "SUCCEEDED" => Ok(PollState::Ready(string_at(&task, &["/output/0"]))),
                "FAILED" | "CANCELLED" | "CANCELED" => {
                    Err(StudioError::job_failed("Generation failed", Some(task)))
                }
                _ => Ok(PollState::Pending(status)),
            }
        })
    }
}

/// Node ratio to text-to-image resolution.
pub fn image_ratio(ratio: &str) -> &'static str {
    match ratio {
        "1:1" => "1080:1080",
        "16:9" => "1920:1080",
        "4:3" => "1440:1080",
        "3:4" => "1080:1440",
        "9:16" => "1080:1920",
        "21:9" => "1808:768",
        _ => "1024:1024",
    }
}

/// Node ratio to video resolution; vendor resolutions pass through.
pub fn video_ratio(ratio: &str) -> String {
    let mapped = match ratio {
        "16:9" => "1280:720",
        "9:16" => "720:1280",
        "4:3" => "1104:832",
        "3:4" => "832:1104",
        "1:1" => "960:960",
        "21:9" => "1584:672",
        other if other.contains(':') && other.len() > 5 => other,
        _ => "1280:720",
    };
    mapped.to_string()
}

fn prompt_text(prompt: &str) -> String {
    if prompt.trim().is_empty() {
        " ".to_string()
    } else {
        prompt.to_string()
    }
}

/// Route and payload of a video task for the given vendor model.
pub fn video_task(request: &VideoRequest) -> StudioResult<(&'static str, Value)> {
    let ratio = video_ratio(request.ratio.as_deref().unwrap_or("16:9"));
    let duration = if request.duration_secs == 10 { 10 } else { 5 };
    let mut payload = json!({
        "promptText": prompt_text(&request.prompt),
        "publicFigureThreshold": "low",
        "ratio": ratio,
        "duration": duration,
    });
    let first_image = request.images.first();
    let first_video = request.videos.first();
    let route = match request.model.as_str() {
        "gen4_turbo" | "Runway Gen 4 Turbo" => {
            let image = first_image.ok_or_else(|| {
                StudioError::validation("Runway Gen 4 Turbo requires an input image")
            })?;
            payload["model"] = json!("gen4_turbo");
            payload["promptImage"] = json!(image);
            "image_to_video"
        }
        "act_two" | "Runway Act Two" => {
            let (Some(image), Some(video)) = (first_image, first_video) else {
                return Err(StudioError::validation(
                    "Runway Act Two requires one image and one video input",
                ));
            };
            payload["model"] = json!("act_two");
            payload["promptImage"] = json!(image);
            payload["promptVideo"] = json!(video);
            "video_to_video"
        }
        "gen4_aleph" | "Runway Aleph" => {
            let video = first_video
                .ok_or_else(|| StudioError::validation("Runway Aleph requires a video input"))?;
            payload["model"] = json!("gen4_aleph");
            payload["promptVideo"] = json!(video);
            "video_to_video"
        }
        other => {
            return Err(StudioError::validation(format!(
                "Unsupported Runway video model '{other}'"
            )))
        }
    };
    Ok((route, payload))
}

impl NamedProvider for RunwayProvider {
    fn name(&self) -> &str {
        "runway"
    }
}

impl ImageProvider for RunwayProvider {
    fn generate(&self, request: &ImageRequest) -> StudioResult<ImageOutput> {
        let api_key = self.credential.resolve()?;
        if request.images.is_empty() && request.prompt.trim().is_empty() {
            return Err(StudioError::validation(
                "Prompt is required when no reference images are provided",
            ));
        }
        let reference_images: Vec<Value> = request
            .images
            .iter()
            .take(MAX_REFERENCE_IMAGES)
            .enumerate()
            .map(|(index, uri)| json!({"uri": uri, "tag": format!("ref{}", index + 1)}))
            .collect();
        let payload = json!({
            "model": IMAGE_MODEL,
            "promptText": prompt_text(&request.prompt),
            "ratio": image_ratio(request.ratio.as_deref().unwrap_or("auto")),
            "referenceImages": reference_images,
        });
        let task_id = self.create_task(&api_key, "text_to_image", &payload)?;
        info!(task_id = %task_id, "runway image task created");
        self.wait_for_output(&api_key, &task_id)?
            .map(ImageOutput::Url)
            .ok_or_else(|| StudioError::upstream("Runway response missing image URL"))
    }
}

impl VideoProvider for RunwayProvider {
    fn generate(&self, request: &VideoRequest) -> StudioResult<VideoOutput> {
        let api_key = self.credential.resolve()?;
        let (route, payload) = video_task(request)?;
        let task_id = self.create_task(&api_key, route, &payload)?;
        info!(task_id = %task_id, route, "runway video task created");
        self.wait_for_output(&api_key, &task_id)?
            .map(VideoOutput::Url)
            .ok_or_else(|| StudioError::upstream("Runway response missing video URL"))
    }

    fn poll_policy(&self) -> PollPolicy {
        self.poll_policy
    }
}
