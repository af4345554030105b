//! Request and response contracts of the HTTP endpoints.

mod requests;
mod responses;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{StudioError, StudioResult};

pub use requests::{
    DownloadQuery, FlowRunBody, FluxImageBody, IdeogramImageBody, ImageGenerateBody,
    ImagenImageBody, JobStatusQuery, KlingVideoBody, MinimaxVideoBody, ModelsQuery,
    RunwayImageBody, ScaleValue, TextGenerateBody, TopazImageBody, TopazVideoBody,
    VideoGenerateBody, FLUX_MODELS, FLUX_RATIOS, IDEOGRAM_RATIOS, IMAGEN_MODELS, IMAGEN_RATIOS,
    IMAGE_SIZES, KLING_MODELS, KLING_RATIOS, MINIMAX_MODELS, RUNWAY_IMAGE_RATIOS,
    RUNWAY_VIDEO_MODELS, RUNWAY_VIDEO_RATIOS, TOPAZ_IMAGE_MODELS,
};
pub use responses::{
    FlowRunResponse, ImageResponse, JobStatusResponse, ModelsResponse, TextResponse,
    VideoResponse,
};

/// Field-level checks applied after deserialization.
pub trait Validate {
    fn validate(&self) -> StudioResult<()>;
}

pub fn parse_body<T: DeserializeOwned + Validate>(bytes: &[u8]) -> StudioResult<T> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Err(StudioError::validation("Request body is empty"));
    }
    let body: T = serde_json::from_slice(bytes)?;
    body.validate()?;
    Ok(body)
}

pub fn parse_value<T: DeserializeOwned + Validate>(value: Value) -> StudioResult<T> {
    let body: T = serde_json::from_value(value)?;
    body.validate()?;
    Ok(body)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn defaults_are_filled_in() -> anyhow::Result<()> {
        let body: TextGenerateBody = parse_value(json!({"prompt": "hi"}))?;
        assert_eq!(body.model, "gpt-4o-mini");
        assert!(body.images.is_empty());

        let flux: FluxImageBody = parse_value(json!({"prompt": "fern"}))?;
        assert_eq!(flux.model, "Flux Dev");
        assert_eq!(flux.ratio, "1:1");

        let video: VideoGenerateBody =
            parse_value(json!({"prompt": "wave", "images": ["https://x/a.png"]}))?;
        assert_eq!(video.duration, 5);
        assert_eq!(video.ratio, "1280:720");
        assert_eq!(video.model, "Runway Gen 4 Turbo");
        Ok(())
    }

    #[test]
    fn missing_or_empty_prompts_are_rejected() {
        assert!(matches!(
            parse_value::<TextGenerateBody>(json!({"prompt": ""})),
            Err(StudioError::Validation(_))
        ));
        assert!(matches!(
            parse_value::<TextGenerateBody>(json!({})),
            Err(StudioError::Validation(_))
        ));
        assert!(matches!(
            parse_value::<ImagenImageBody>(json!({"prompt": "   "})),
            Err(StudioError::Validation(message)) if message == "Prompt is required"
        ));
        assert!(matches!(
            parse_value::<ImageGenerateBody>(json!({})),
            Err(StudioError::Validation(_))
        ));
        assert!(parse_value::<ImageGenerateBody>(json!({"images": ["data:image/png;base64,AA=="]})).is_ok());
        assert!(parse_value::<RunwayImageBody>(json!({"images": ["https://x/1.png"]})).is_ok());
    }

    #[test]
    fn enumerations_and_limits_are_enforced() {
        assert!(parse_value::<ImageGenerateBody>(json!({"prompt": "x", "size": "512x512"})).is_err());
        assert!(parse_value::<IdeogramImageBody>(json!({"prompt": "x", "ratio": "10:16"})).is_ok());
        assert!(parse_value::<IdeogramImageBody>(json!({"prompt": "x", "ratio": "5:4"})).is_err());
        assert!(parse_value::<RunwayImageBody>(json!({
            "prompt": "x",
            "images": ["a", "b", "c", "d"]
        }))
        .is_err());
        assert!(parse_value::<ImagenImageBody>(json!({"prompt": "x", "model": "Imagen 3"})).is_err());
        assert!(parse_value::<VideoGenerateBody>(json!({"prompt": "x", "duration": 7, "images": ["a"]})).is_err());
        assert!(parse_value::<KlingVideoBody>(json!({"prompt": "x", "images": ["a", "b"]})).is_err());
        assert!(parse_value::<MinimaxVideoBody>(json!({"prompt": "x", "model": "Hailuo 3"})).is_err());
    }

    #[test]
    fn runway_video_requires_model_specific_inputs() {
        let err = parse_value::<VideoGenerateBody>(json!({"prompt": "x"})).err();
        assert_eq!(
            err.map(|err| err.to_string()).as_deref(),
            Some("Runway Gen 4 Turbo requires an input image")
        );
        assert!(parse_value::<VideoGenerateBody>(json!({
            "prompt": "x",
            "model": "Runway Act Two",
            "images": ["a"]
        }))
        .is_err());
        assert!(parse_value::<VideoGenerateBody>(json!({
            "prompt": "x",
            "model": "Runway Aleph",
            "videos": ["v"]
        }))
        .is_ok());
    }

    #[test]
    fn topaz_scale_accepts_number_or_string() {
        assert!(parse_value::<TopazImageBody>(json!({"image": "a", "scale": "3"})).is_ok());
        assert!(parse_value::<TopazImageBody>(json!({"image": "a", "scale": 4})).is_ok());
        assert!(parse_value::<TopazImageBody>(json!({"image": "a", "scale": 5})).is_err());
        assert!(parse_value::<TopazImageBody>(json!({"image": "a", "strength": 0.0})).is_err());
        assert!(parse_value::<TopazImageBody>(json!({"image": "a", "output_width": -3})).is_err());
        assert!(parse_value::<TopazVideoBody>(json!({"video": "v", "scale": "4"})).is_ok());
        assert!(parse_value::<TopazVideoBody>(json!({"video": "v", "scale": "5"})).is_err());
    }

    #[test]
    fn body_parsing_rejects_empty_and_malformed_input() {
        assert!(matches!(
            parse_body::<TextGenerateBody>(b"  "),
            Err(StudioError::Validation(_))
        ));
        assert!(matches!(
            parse_body::<TextGenerateBody>(b"{not json"),
            Err(StudioError::Validation(_))
        ));
        assert!(parse_body::<TextGenerateBody>(br#"{"prompt":"ok"}"#).is_ok());
    }

    #[test]
    fn queries_report_missing_fields() {
        assert!(JobStatusQuery::default().job_id().is_err());
        let download = DownloadQuery {
            url: Some("https://x/a.png".to_string()),
            filename: None,
        };
        assert_eq!(download.source().ok(), Some("https://x/a.png"));
        assert_eq!(download.filename(), "download");
        assert_eq!(
            DownloadQuery::default().source().err().map(|err| err.to_string()).as_deref(),
            Some("Missing url")
        );
    }
}
