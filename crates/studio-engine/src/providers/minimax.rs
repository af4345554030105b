use std::time::Duration;

use reqwest::blocking::Client as HttpClient;
use serde_json::{json, Value};
use studio_contracts::providers::NamedProvider;
use studio_contracts::{StudioError, StudioResult};
use tracing::{debug, info};

use super::{JobStatus, VideoOutput, VideoProvider, VideoRequest};
use crate::config::Credential;
use crate::http::{
    api_base, details_from_text, non_empty_env, read_text, response_json_or_error, send, string_at,
};
use crate::polling::PollPolicy;

const DEFAULT_STATUS_PATH: &str = "/v1/query/video_generation?task_id={task_id}";
const DEFAULT_RETRIEVE_PATH: &str = "/v1/files/retrieve";

/// Minimax Hailuo video; the client polls the task id.
#[derive(Debug, Clone)]
pub struct MinimaxProvider {
    api_base: String,
    http: HttpClient,
    credential: Credential,
    status_path: String,
    retrieve_path: String,
    group_id: Option<String>,
}

impl MinimaxProvider {
    pub fn new(http: HttpClient) -> Self {
        Self {
            api_base: api_base(
                &["MINIMAX_API_BASE", "MINIMAX_API_BASE_URL"],
                "https://api.minimax.io",
            ),
            http,
            credential: Credential::from_env("MINIMAX_API_KEY"),
            status_path: non_empty_env("MINIMAX_STATUS_PATH")
                .unwrap_or_else(|| DEFAULT_STATUS_PATH.to_string()),
            retrieve_path: non_empty_env("MINIMAX_RETRIEVE_PATH")
                .map(|path| path.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_RETRIEVE_PATH.to_string()),
            group_id: non_empty_env("MINIMAX_GROUP_ID"),
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

    pub fn with_group_id(mut self, group_id: Option<String>) -> Self {
        self.group_id = group_id;
        self
    }

    /// Download URL for a finished file, trying each retrieve variant in turn.
    fn retrieve(&self, api_key: &str, file_id: &str) -> Option<String> {
        let url = format!("{}{}", self.api_base, self.retrieve_path);
        let mut attempts = Vec::new();
        if let Some(group_id) = &self.group_id {
            attempts.push((false, Some(group_id.as_str())));
        }
        attempts.push((false, None));
        if let Some(group_id) = &self.group_id {
            attempts.push((true, Some(group_id.as_str())));
        }
        attempts.into_iter().find_map(|(post, group_id)| {
            let mut query = vec![("file_id", file_id)];
            if let Some(group_id) = group_id {
                query.insert(0, ("GroupId", group_id));
            }
            let builder = if post {
                self.http.post(&url)
            } else {
                self.http.get(&url)
            };
            let response = send(
                "Minimax",
                builder
                    .bearer_auth(api_key)
                    .header("Content-Type", "application/json")
                    .query(&query),
            )
            .ok()?;
            let (code, body) = read_text("Minimax", response).ok()?;
            if !(200..300).contains(&code) {
                debug!(code, post, "minimax retrieve attempt rejected");
                return None;
            }
            let data: Value = serde_json::from_str(&body).ok()?;
            string_at(
                &data,
                &[
                    "/file/download_url",
                    "/download_url",
                    "/file/backup_download_url",
                    "/backup_download_url",
                ],
            )
        })
    }
}

pub fn submit_payload(request: &VideoRequest) -> Value {
    let mut payload = json!({
        "model": request.model,
        "prompt": request.prompt,
        "duration": request.duration_secs,
    });
    if let Some(image) = request.images.first() {
        payload["first_frame_image"] = json!(image);
    }
    payload
}

fn is_failed_state(state: &str) -> bool {
    matches!(state, "failed" | "fail" | "error" | "canceled" | "cancelled")
}

impl NamedProvider for MinimaxProvider {
    fn name(&self) -> &str {
        "minimax"
    }
}

impl VideoProvider for MinimaxProvider {
    fn generate(&self, request: &VideoRequest) -> StudioResult<VideoOutput> {
        let api_key = self.credential.resolve()?;
        info!(model = %request.model, duration = request.duration_secs, "minimax submit");
        let response = send(
            "Minimax",
            self.http
                .post(format!("{}/v1/video_generation", self.api_base))
                .bearer_auth(api_key)
                .json(&submit_payload(request)),
        )?;
        let data = response_json_or_error("Minimax", response)?;
        if let Some(code) = data.pointer("/base_resp/status_code").and_then(Value::as_i64) {
            if code != 0 {
                let message = string_at(&data, &["/base_resp/status_msg"])
                    .unwrap_or_else(|| code.to_string());
                return Err(StudioError::upstream_with(
                    format!("Minimax request failed: {message}"),
                    502,
                    Some(data),
                ));
            }
        }
        string_at(&data, &["/task_id"])
            .map(VideoOutput::Job)
            .ok_or_else(|| {
                StudioError::upstream_with("Minimax response missing task id", 502, Some(data))
            })
    }

    fn poll(&self, job_id: &str) -> StudioResult<JobStatus> {
        let api_key = self.credential.resolve()?;
        let status_url = format!(
            "{}{}",
            self.api_base,
            self.status_path.replace("{task_id}", job_id)
        );
        let response = send("Minimax", self.http.get(status_url).bearer_auth(&api_key))?;
        let (code, body) = read_text("Minimax", response)?;
        if !(200..300).contains(&code) {
            return Ok(JobStatus::Failed {
                state: None,
                error: Some(format!("Minimax status failed: {code}")),
                details: details_from_text(&body),
            });
        }
        let data: Value = serde_json::from_str(&body).unwrap_or_else(|_| json!({}));
        let state = string_at(&data, &["/status", "/data/status", "/task_status"]);
        let normalized = state.as_deref().unwrap_or_default().to_ascii_lowercase();
        if normalized == "success" {
            let Some(file_id) = string_at(&data, &["/file_id", "/data/file_id"]) else {
                return Ok(JobStatus::Failed {
                    state,
                    error: Some("Missing file_id".to_string()),
                    details: None,
                });
            };
            return Ok(match self.retrieve(&api_key, &file_id) {
                Some(url) => JobStatus::Ready(url),
                None => JobStatus::Pending(Some("success".to_string())),
            });
        }
        if is_failed_state(&normalized) {
            return Ok(JobStatus::Failed {
                state,
                error: None,
                details: None,
            });
        }
        Ok(JobStatus::Pending(state))
    }

    fn poll_policy(&self) -> PollPolicy {
        PollPolicy::backoff(
            Duration::from_secs(3),
            Duration::from_secs(1),
            Duration::from_secs(10),
            Duration::from_secs(15 * 60),
        )
    }
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn provider(api_base: &str) -> MinimaxProvider {
        MinimaxProvider::new(HttpClient::new())
            .with_api_base(api_base)
            .with_credential(Credential::fixed("mm-test"))
            .with_group_id(Some("g-1".to_string()))
    }

    #[test]
    fn first_frame_only_with_image() {
        let request = VideoRequest {
            prompt: "tide".to_string(),
            model: "MiniMax-Hailuo-02".to_string(),
            duration_secs: 6,
            ..VideoRequest::default()
        };
        assert!(submit_payload(&request).get("first_frame_image").is_none());
        let with_image = VideoRequest {
            images: vec!["https://cdn/f.png".to_string()],
            ..request
        };
        assert_eq!(
            submit_payload(&with_image)["first_frame_image"],
            json!("https://cdn/f.png")
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn submit_checks_base_resp() -> anyhow::Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/video_generation"))
            .respond_with(ResponseTemplate::new(200).set_body_json(
                json!({"task_id": "mm-1", "base_resp": {"status_code": 0, "status_msg": "success"}}),
            ))
            .mount(&server)
            .await;

        let uri = server.uri();
        let output = tokio::task::spawn_blocking(move || {
            provider(&uri).generate(&VideoRequest {
                prompt: "tide".to_string(),
                model: "MiniMax-Hailuo-02".to_string(),
                duration_secs: 6,
                ..VideoRequest::default()
            })
        })
        .await??;
        assert_eq!(output, VideoOutput::Job("mm-1".to_string()));
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn success_falls_back_across_retrieve_variants() -> anyhow::Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/query/video_generation"))
            .and(query_param("task_id", "mm-1"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"status": "Success", "file_id": "f-9"})),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/files/retrieve"))
            .and(query_param("GroupId", "g-1"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/files/retrieve"))
            .and(query_param("file_id", "f-9"))
            .respond_with(ResponseTemplate::new(200).set_body_json(
                json!({"file": {"backup_download_url": "https://mm/backup.mp4"}}),
            ))
            .mount(&server)
            .await;

        let uri = server.uri();
        let status = tokio::task::spawn_blocking(move || provider(&uri).poll("mm-1")).await??;
        assert_eq!(status, JobStatus::Ready("https://mm/backup.mp4".to_string()));
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn status_failures_are_reported_not_raised() -> anyhow::Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param("task_id", "bad"))
            .respond_with(ResponseTemplate::new(500).set_body_string("oops"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(query_param("task_id", "gone"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "Fail"})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(query_param("task_id", "busy"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": {"status": "Processing"}})))
            .mount(&server)
            .await;

        let uri = server.uri();
        let (bad, gone, busy) = tokio::task::spawn_blocking(move || {
            let minimax = provider(&uri);
            (minimax.poll("bad"), minimax.poll("gone"), minimax.poll("busy"))
        })
        .await?;
        assert_eq!(
            bad?,
            JobStatus::Failed {
                state: None,
                error: Some("Minimax status failed: 500".to_string()),
                details: Some(json!("oops"))
            }
        );
        assert_eq!(
            gone?,
            JobStatus::Failed {
                state: Some("Fail".to_string()),
                error: None,
                details: None
            }
        );
        assert_eq!(busy?, JobStatus::Pending(Some("Processing".to_string())));
        Ok(())
    }
}
