use std::time::Duration;

use reqwest::blocking::Client as HttpClient;
use serde_json::{json, Value};
use studio_contracts::providers::NamedProvider;
use studio_contracts::{StudioError, StudioResult};
use tracing::info;

use super::{ImageOutput, ImageProvider, ImageRequest};
use crate::config::Credential;
use crate::http::{api_base, details_from_text, parse_json, read_text, send, string_at};
use crate::media::{is_data_url, strip_data_url_prefix};
use crate::polling::{poll_until, PollPolicy, PollState};

/// Black Forest Labs Flux: submit, then poll the returned `polling_url`.
#[derive(Debug, Clone)]
pub struct FluxProvider {
    api_base: String,
    http: HttpClient,
    credential: Credential,
    poll_policy: PollPolicy,
}

impl FluxProvider {
    pub fn new(http: HttpClient) -> Self {
        Self {
            api_base: api_base(&["FLUX_API_BASE", "BFL_API_BASE"], "https://api.bfl.ai/v1"),
            http,
            credential: Credential::with_fallbacks(&["BFL_API_KEY", "FLUX_API_KEY"]),
            poll_policy: PollPolicy::fixed(Duration::from_millis(600), Duration::from_secs(90))
                .sleeping_first(),
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

    fn submit(&self, api_key: &str, request: &ImageRequest) -> StudioResult<String> {
        let ratio = request.ratio.as_deref().unwrap_or("1:1");
        let (width, height) = dims_for_ratio(ratio);
        let mut payload = json!({
            "prompt": request.prompt,
            "aspect_ratio": ratio,
            "width": width,
            "height": height,
        });
        if let Some(input) = request.images.first() {
            let input_image = if is_data_url(input) {
                strip_data_url_prefix(input)
            } else {
                input.as_str()
            };
            payload["input_image"] = Value::String(input_image.to_string());
        }

        let endpoint = format!("{}{}", self.api_base, path_for_model(&request.model));
        info!(endpoint = %endpoint, ratio, "flux submit");
        let response = send(
            "Flux",
            self.http
                .post(&endpoint)
                .header("accept", "application/json")
                .header("x-key", api_key)
                .json(&payload),
        )?;
        let (code, body) = read_text("Flux", response)?;
        if !(200..300).contains(&code) {
            return Err(StudioError::upstream_with(
                format!("Submit failed: {code}"),
                500,
                details_from_text(&body),
            ));
        }
        let submitted = parse_json("Flux", &body)?;
        string_at(&submitted, &["/polling_url"])
            .ok_or_else(|| StudioError::internal("Missing polling_url from BFL response"))
    }

    fn poll_once(&self, polling_url: &str, api_key: &str) -> StudioResult<PollState<String>> {
        let response = send(
            "Flux",
            self.http
                .get(polling_url)
                .header("accept", "application/json")
                .header("x-key", api_key),
        )?;
        let (code, body) = read_text("Flux", response)?;
        if !(200..300).contains(&code) {
            return Err(StudioError::upstream_with(
                format!("Polling failed: {code}"),
                502,
                details_from_text(&body),
            ));
        }
        let polled = parse_json("Flux", &body)?;
        let status = polled
            .get("status")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        match status.as_str() {
            "Ready" => string_at(&polled, &["/result/sample"])
                .map(PollState::Ready)
                .ok_or_else(|| StudioError::internal("No sample URL in Ready result")),
            "Error" | "Failed" => Err(StudioError::upstream_with(
                "Generation failed",
                500,
                Some(polled),
            )),
            _ => Ok(PollState::Pending(status)),
        }
    }
}

impl NamedProvider for FluxProvider {
    fn name(&self) -> &str {
        "flux"
    }
}

impl ImageProvider for FluxProvider {
    fn generate(&self, request: &ImageRequest) -> StudioResult<ImageOutput> {
        let api_key = self.credential.resolve()?;
        let polling_url = self.submit(&api_key, request)?;
        let url = poll_until("flux", &self.poll_policy, |_| {
            self.poll_once(&polling_url, &api_key)
        })?;
        Ok(ImageOutput::Url(url))
    }
}

/// Width/height sent alongside the aspect ratio, multiples of 64.
pub fn dims_for_ratio(ratio: &str) -> (u32, u32) {
    match ratio {
        "16:9" => (1024, 576),
        "4:3" => (1024, 768),
        "3:4" => (768, 1024),
        "9:16" => (576, 1024),
        _ => (1024, 1024),
    }
}

/// Endpoint path for a catalog label or vendor model id; unknown models use Flux Dev.
pub fn path_for_model(model: &str) -> &'static str {
    match model {
        "Flux Kontext Max" | "flux-kontext-max" => "/flux-kontext-max",
        "Flux Pro 1.1" | "flux-pro-1.1" => "/flux-pro-1.1",
        _ => "/flux-dev",
    }
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn provider(api_base: &str) -> FluxProvider {
        FluxProvider::new(HttpClient::new())
            .with_api_base(api_base)
            .with_credential(Credential::fixed("bfl-test"))
            .with_poll_policy(PollPolicy::fixed(Duration::ZERO, Duration::from_secs(5)))
    }

    fn request(model: &str, ratio: &str) -> ImageRequest {
        ImageRequest {
            prompt: "a fern".to_string(),
            model: model.to_string(),
            ratio: Some(ratio.to_string()),
            ..ImageRequest::default()
        }
    }

    #[test]
    fn ratio_and_model_tables() {
        assert_eq!(dims_for_ratio("16:9"), (1024, 576));
        assert_eq!(dims_for_ratio("9:16"), (576, 1024));
        assert_eq!(dims_for_ratio("1:1"), (1024, 1024));
        assert_eq!(path_for_model("Flux Pro 1.1"), "/flux-pro-1.1");
        assert_eq!(path_for_model("flux-kontext-max"), "/flux-kontext-max");
        assert_eq!(path_for_model("Flux Schnell"), "/flux-dev");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn submit_then_poll_until_ready() -> anyhow::Result<()> {
        let server = MockServer::start().await;
        let polling_url = format!("{}/get_result?id=abc", server.uri());
        Mock::given(method("POST"))
            .and(path("/flux-pro-1.1"))
            .and(header("x-key", "bfl-test"))
            .and(body_json(json!({
                "prompt": "a fern",
                "aspect_ratio": "4:3",
                "width": 1024,
                "height": 768
            })))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"id": "abc", "polling_url": polling_url})),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/get_result"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "Pending"})))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/get_result"))
            .respond_with(ResponseTemplate::new(200).set_body_json(
                json!({"status": "Ready", "result": {"sample": "https://delivery/abc.jpg"}}),
            ))
            .mount(&server)
            .await;

        let uri = server.uri();
        let output = tokio::task::spawn_blocking(move || {
            provider(&uri).generate(&request("flux-pro-1.1", "4:3"))
        })
        .await??;
        assert_eq!(output, ImageOutput::Url("https://delivery/abc.jpg".to_string()));
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn submit_failure_is_internal_error_with_details() -> anyhow::Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(422).set_body_json(json!({"detail": "bad ratio"})))
            .mount(&server)
            .await;

        let uri = server.uri();
        let result = tokio::task::spawn_blocking(move || {
            provider(&uri).generate(&request("Flux Dev", "1:1"))
        })
        .await?;
        let err = result.err();
        assert_eq!(err.as_ref().map(|err| err.to_string()), Some("Submit failed: 422".to_string()));
        assert_eq!(err.as_ref().map(|err| err.http_status()), Some(500));
        assert_eq!(
            err.and_then(|err| err.details().cloned()),
            Some(json!({"detail": "bad ratio"}))
        );
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn missing_polling_url_and_failed_jobs() -> anyhow::Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/flux-dev"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "x"})))
            .mount(&server)
            .await;
        let failing_url = format!("{}/poll/failed", server.uri());
        Mock::given(method("POST"))
            .and(path("/flux-kontext-max"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"polling_url": failing_url})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/poll/failed"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "Error"})))
            .mount(&server)
            .await;

        let uri = server.uri();
        let (missing, failed) = tokio::task::spawn_blocking(move || {
            let flux = provider(&uri);
            (
                flux.generate(&request("Flux Dev", "1:1")),
                flux.generate(&request("Flux Kontext Max", "1:1")),
            )
        })
        .await?;
        assert_eq!(
            missing.err().map(|err| err.to_string()),
            Some("Missing polling_url from BFL response".to_string())
        );
        let failed = failed.err();
        assert_eq!(failed.as_ref().map(|err| err.to_string()), Some("Generation failed".to_string()));
        assert_eq!(
            failed.and_then(|err| err.details().cloned()),
            Some(json!({"status": "Error"}))
        );
        Ok(())
    }
}
