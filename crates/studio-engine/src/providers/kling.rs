use std::time::Duration;

use reqwest::blocking::Client as HttpClient;
use serde_json::{json, Value};
use studio_contracts::providers::NamedProvider;
use studio_contracts::{StudioError, StudioResult};
use tracing::info;

use super::{option_f64, option_str, JobStatus, VideoOutput, VideoProvider, VideoRequest};
use crate::config::Credential;
use crate::http::{api_base, response_json_or_error, send, string_at};
use crate::media::strip_data_url_prefix;
use crate::polling::PollPolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KlingTask {
    TextToVideo,
    ImageToVideo,
}

impl KlingTask {
    pub fn path(self) -> &'static str {
        match self {
            Self::TextToVideo => "text2video",
            Self::ImageToVideo => "image2video",
        }
    }

    fn from_path(path: &str) -> Option<Self> {
        match path {
            "text2video" => Some(Self::TextToVideo),
            "image2video" => Some(Self::ImageToVideo),
            _ => None,
        }
    }
}

/// Job ids carry the task family so status lookups hit the right route.
pub fn encode_job_id(task: KlingTask, task_id: &str) -> String {
    format!("{}:{task_id}", task.path())
}

pub fn decode_job_id(job_id: &str) -> StudioResult<(KlingTask, &str)> {
    match job_id.split_once(':') {
        Some((kind, task_id)) if !task_id.is_empty() => KlingTask::from_path(kind)
            .map(|task| (task, task_id))
            .ok_or_else(|| StudioError::validation(format!("Invalid Kling job id '{job_id}'"))),
        _ => Ok((KlingTask::TextToVideo, job_id)),
    }
}

/// Kling text-to-video and image-to-video; the client polls the job id.
#[derive(Debug, Clone)]
pub struct KlingProvider {
    api_base: String,
    http: HttpClient,
    credential: Credential,
}

impl KlingProvider {
    pub fn new(http: HttpClient) -> Self {
        Self {
            api_base: api_base(&["KLING_API_BASE"], "https://api-singapore.klingai.com"),
            http,
            credential: Credential::from_env("KLING_API_KEY"),
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

/// Submit payload for the task family the inputs call for.
pub fn submit_payload(request: &VideoRequest) -> (KlingTask, Value) {
    let duration = request.duration_secs.to_string();
    let mut payload = match request.images.first() {
        Some(image) => {
            let image = strip_data_url_prefix(image);
            let mut payload = json!({
                "model_name": request.model,
                "image": image,
                "duration": duration,
            });
            if !request.prompt.trim().is_empty() {
                payload["prompt"] = json!(request.prompt);
            }
            (KlingTask::ImageToVideo, payload)
        }
        None => (
            KlingTask::TextToVideo,
            json!({
                "model_name": request.model,
                "prompt": request.prompt,
                "mode": "std",
                "aspect_ratio": request.ratio.as_deref().unwrap_or("16:9"),
                "duration": duration,
            }),
        ),
    };
    if let Some(negative) = option_str(&request.options, "negative_prompt") {
        payload.1["negative_prompt"] = json!(negative);
    }
    if let Some(cfg_scale) = option_f64(&request.options, "cfg_scale") {
        payload.1["cfg_scale"] = json!(cfg_scale);
    }
    payload
}

fn ensure_ok_code(data: &Value) -> StudioResult<()> {
    match data.get("code").and_then(Value::as_i64) {
        Some(code) if code != 0 => {
            let message = data
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown error");
            Err(StudioError::upstream_with(
                format!("Kling request failed: {message}"),
                502,
                Some(data.clone()),
            ))
        }
        _ => Ok(()),
    }
}

impl NamedProvider for KlingProvider {
    fn name(&self) -> &str {
        "kling"
    }
}

impl VideoProvider for KlingProvider {
    fn generate(&self, request: &VideoRequest) -> StudioResult<VideoOutput> {
        let api_key = self.credential.resolve()?;
        let (task, payload) = submit_payload(request);
        info!(model = %request.model, task = task.path(), "kling submit");
        let response = send(
            "Kling",
            self.http
                .post(format!("{}/v1/videos/{}", self.api_base, task.path()))
                .bearer_auth(api_key)
                .json(&payload),
        )?;
        let data = response_json_or_error("Kling", response)?;
        ensure_ok_code(&data)?;
        let task_id = string_at(&data, &["/data/task_id"]).ok_or_else(|| {
            StudioError::upstream_with("Kling response missing task id", 502, Some(data.clone()))
        })?;
        Ok(VideoOutput::Job(encode_job_id(task, &task_id)))
    }

    fn poll(&self, job_id: &str) -> StudioResult<JobStatus> {
        let api_key = self.credential.resolve()?;
        let (task, task_id) = decode_job_id(job_id)?;
        let response = send(
            "Kling",
            self.http
                .get(format!("{}/v1/videos/{}/{task_id}", self.api_base, task.path()))
                .bearer_auth(api_key),
        )?;
        let data = response_json_or_error("Kling", response)?;
        ensure_ok_code(&data)?;
        let state = string_at(&data, &["/data/task_status"]).unwrap_or_default();
        Ok(match state.as_str() {
            "succeed" => match string_at(&data, &["/data/task_result/videos/0/url"]) {
                Some(url) => JobStatus::Ready(url),
                None => JobStatus::Failed {
                    state: Some(state),
                    error: Some("Kling result missing video URL".to_string()),
                    details: Some(data),
                },
            },
            "failed" => JobStatus::Failed {
                error: string_at(&data, &["/data/task_status_msg"]),
                state: Some(state),
                details: None,
            },
            _ => JobStatus::Pending((!state.is_empty()).then_some(state)),
        })
    }

    fn poll_policy(&self) -> PollPolicy {
        PollPolicy::fixed(Duration::from_secs(5), Duration::from_secs(600))
    }
}
