use reqwest::blocking::Client as HttpClient;
use serde_json::{json, Value};
use studio_contracts::providers::NamedProvider;
use studio_contracts::{StudioError, StudioResult};
use tracing::info;

use super::{ImageOutput, ImageProvider, ImageRequest};
use crate::config::Credential;
use crate::http::{api_base, parse_json, read_text, send, string_at};

const IMAGEN_MODEL: &str = "imagen-4.0-generate-001";
const IMAGEN_ULTRA_MODEL: &str = "imagen-4.0-ultra-generate-001";

/// Google Imagen through the Generative Language `predict` endpoint.
#[derive(Debug, Clone)]
pub struct ImagenProvider {
    api_base: String,
    http: HttpClient,
    credential: Credential,
}

impl ImagenProvider {
    pub fn new(http: HttpClient) -> Self {
        Self {
            api_base: api_base(
                &["IMAGEN_API_BASE", "GEMINI_API_BASE"],
                "https://generativelanguage.googleapis.com",
            ),
            http,
            credential: Credential::with_fallbacks(&["GOOGLE_API_KEY", "GEMINI_API_KEY"]),
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

/// Vendor model id for a catalog label or id; anything unknown maps to Imagen 4.
pub fn imagen_model_id(model: &str) -> &'static str {
    match model {
        "Imagen 4 Ultra" | IMAGEN_ULTRA_MODEL => IMAGEN_ULTRA_MODEL,
        _ => IMAGEN_MODEL,
    }
}

pub fn predict_payload(prompt: &str, ratio: &str, model_id: &str) -> Value {
    let mut parameters = json!({
        "sampleCount": 1,
        "aspectRatio": ratio,
    });
    if model_id == IMAGEN_ULTRA_MODEL {
        parameters["sampleImageSize"] = json!("2K");
    }
    json!({
        "instances": [{"prompt": prompt}],
        "parameters": parameters,
    })
}

impl NamedProvider for ImagenProvider {
    fn name(&self) -> &str {
        "imagen"
    }
}

impl ImageProvider for ImagenProvider {
    fn generate(&self, request: &ImageRequest) -> StudioResult<ImageOutput> {
        let api_key = self.credential.resolve()?;
        if request.prompt.trim().is_empty() {
            return Err(StudioError::validation("Prompt is required"));
        }
        let model_id = imagen_model_id(&request.model);
        let ratio = request.ratio.as_deref().unwrap_or("1:1");
        info!(model = model_id, ratio, "imagen request");
        let response = send(
            "Imagen",
            self.http
                .post(format!("{}/v1beta/models/{model_id}:predict", self.api_base))
                .header("x-goog-api-key", api_key)
                .json(&predict_payload(&request.prompt, ratio, model_id)),
        )?;
        let (code, body) = read_text("Imagen", response)?;
        if !(200..300).contains(&code) {
            return Err(StudioError::upstream(format!(
                "Imagen request failed: {code} {body}"
            )));
        }
        let data = parse_json("Imagen", &body)?;
        let b64 = string_at(
            &data,
            &[
                "/generatedImages/0/image/imageBytes",
                "/predictions/0/bytesBase64Encoded",
                "/predictions/0/image/imageBytes",
            ],
        )
        .ok_or_else(|| StudioError::upstream("Imagen response missing image bytes"))?;
        let mime = string_at(&data, &["/predictions/0/mimeType"]);
        Ok(ImageOutput::Base64 { data: b64, mime })
    }
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn provider(api_base: &str) -> ImagenProvider {
        ImagenProvider::new(HttpClient::new())
            .with_api_base(api_base)
            .with_credential(Credential::fixed("goog-test"))
    }

    #[test]
    fn ultra_requests_2k_samples() {
        assert_eq!(imagen_model_id("Imagen 4 Ultra"), IMAGEN_ULTRA_MODEL);
        assert_eq!(imagen_model_id("Imagen 4"), IMAGEN_MODEL);
        let payload = predict_payload("fern", "3:4", IMAGEN_ULTRA_MODEL);
        assert_eq!(payload["parameters"]["sampleImageSize"], json!("2K"));
        let payload = predict_payload("fern", "3:4", IMAGEN_MODEL);
        assert!(payload["parameters"].get("sampleImageSize").is_none());
        assert_eq!(payload["instances"][0]["prompt"], json!("fern"));
    }

    #[test]
    fn blank_prompt_is_rejected_before_any_request() {
        let provider = ImagenProvider::new(HttpClient::new()).with_credential(Credential::fixed("k"));
        let err = provider
            .generate(&ImageRequest {
                prompt: "  ".to_string(),
                ..ImageRequest::default()
            })
            .err();
        assert_eq!(err.map(|err| err.to_string()), Some("Prompt is required".to_string()));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn reads_prediction_bytes() -> anyhow::Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1beta/models/imagen-4.0-generate-001:predict"))
            .and(header("x-goog-api-key", "goog-test"))
            .and(body_json(json!({
                "instances": [{"prompt": "fern"}],
                "parameters": {"sampleCount": 1, "aspectRatio": "16:9"}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "predictions": [{"bytesBase64Encoded": "UE5H", "mimeType": "image/png"}]
            })))
            .mount(&server)
            .await;

        let uri = server.uri();
        let output = tokio::task::spawn_blocking(move || {
            provider(&uri).generate(&ImageRequest {
                prompt: "fern".to_string(),
                model: "Imagen 4".to_string(),
                ratio: Some("16:9".to_string()),
                ..ImageRequest::default()
            })
        })
        .await??;
        assert_eq!(
            output,
            ImageOutput::Base64 {
                data: "UE5H".to_string(),
                mime: Some("image/png".to_string())
            }
        );
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn missing_bytes_and_failures_are_bad_gateway() -> anyhow::Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1beta/models/imagen-4.0-ultra-generate-001:predict"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"predictions": []})))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1beta/models/imagen-4.0-generate-001:predict"))
            .respond_with(ResponseTemplate::new(403).set_body_string("denied"))
            .mount(&server)
            .await;

        let uri = server.uri();
        let (missing, denied) = tokio::task::spawn_blocking(move || {
            let imagen = provider(&uri);
            let request = |model: &str| ImageRequest {
                prompt: "fern".to_string(),
                model: model.to_string(),
                ..ImageRequest::default()
            };
            (
                imagen.generate(&request("Imagen 4 Ultra")),
                imagen.generate(&request("Imagen 4")),
            )
        })
        .await?;
        assert_eq!(
            missing.err().map(|err| err.to_string()),
            Some("Imagen response missing image bytes".to_string())
        );
        let denied = denied.err();
        assert_eq!(denied.as_ref().map(|err| err.http_status()), Some(502));
        assert_eq!(
            denied.map(|err| err.to_string()),
            Some("Imagen request failed: 403 denied".to_string())
        );
        Ok(())
    }
}
