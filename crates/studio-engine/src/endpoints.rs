//! Handlers behind the HTTP endpoints: validated bodies in, normalized payloads out.

use serde_json::{Map, Value};
use studio_contracts::api::{
    DownloadQuery, FlowRunBody, FlowRunResponse, FluxImageBody, IdeogramImageBody,
    ImageGenerateBody, ImageResponse, ImagenImageBody, JobStatusQuery, JobStatusResponse,
    KlingVideoBody, MinimaxVideoBody, ModelsQuery, ModelsResponse, RunwayImageBody,
    TextGenerateBody, TextResponse, TopazImageBody, TopazVideoBody, VideoGenerateBody,
    VideoResponse,
};
use studio_contracts::graph::{Canvas, NodeKind};
use studio_contracts::models::MediaCounts;
use studio_contracts::{StudioError, StudioResult};
use tracing::info;

use crate::download::DownloadedResource;
use crate::flow::wait_for_job;
use crate::providers::{ImageRequest, TextRequest, VideoOutput, VideoProvider, VideoRequest};
use crate::StudioEngine;

const OPENAI: &str = "openai";

fn insert_some<T: Into<Value>>(options: &mut Map<String, Value>, key: &str, value: Option<T>) {
    if let Some(value) = value {
        options.insert(key.to_string(), value.into());
    }
}

impl StudioEngine {
    /// Vendor model id for a catalog label; unknown labels pass through.
    fn api_model(&self, label: &str) -> String {
        self.selector
            .registry
            .find(label)
            .map(|spec| spec.api_model.clone())
            .unwrap_or_else(|| label.to_string())
    }

    fn generate_image(&self, provider: &str, request: ImageRequest) -> StudioResult<ImageResponse> {
        info!(provider, model = %request.model, images = request.images.len(), "image request");
        let output = self.image_provider(provider)?.generate(&request)?;
        Ok(output.into_response())
    }

    /// Client-polled jobs are handed back as `{jobId}` unless `settle` is set.
    fn video_response(
        &self,
        provider: &dyn VideoProvider,
        output: VideoOutput,
        settle: bool,
    ) -> StudioResult<VideoResponse> {
        Ok(match output {
            VideoOutput::Url(url) => VideoResponse {
                url: Some(url),
                job_id: None,
            },
            VideoOutput::Job(job_id) if settle => VideoResponse {
                url: Some(wait_for_job(provider, &job_id)?),
                job_id: None,
            },
            VideoOutput::Job(job_id) => VideoResponse {
                url: None,
                job_id: Some(job_id),
            },
        })
    }

    fn generate_video(
        &self,
        provider: &str,
        request: VideoRequest,
        settle: bool,
    ) -> StudioResult<VideoResponse> {
        info!(provider, model = %request.model, duration = request.duration_secs, "video request");
        let provider = self.video_provider(provider)?;
        let output = provider.generate(&request)?;
        self.video_response(provider, output, settle)
    }

    pub fn handle_generate_text(&self, body: &TextGenerateBody) -> StudioResult<TextResponse> {
        let (provider, model) = match self.selector.registry.find(&body.model) {
            Some(spec) if spec.kind == NodeKind::Text => {
                (spec.provider.as_str(), spec.api_model.clone())
            }
            _ => (OPENAI, body.model.clone()),
        };
        info!(provider, model = %model, images = body.images.len(), "text request");
        let output = self.text_provider(provider)?.generate(&TextRequest {
            prompt: body.prompt.clone(),
            model,
            images: body.images.clone(),
        })?;
        Ok(TextResponse { text: output.text })
    }

    pub fn handle_generate_image(&self, body: &ImageGenerateBody) -> StudioResult<ImageResponse> {
        self.generate_image(
            OPENAI,
            ImageRequest {
                prompt: body.prompt.clone(),
                model: self.api_model("GPT Image"),
                size: Some(body.size.clone()),
                images: body.images.clone(),
                ..ImageRequest::default()
            },
        )
    }

    pub fn handle_generate_image_flux(&self, body: &FluxImageBody) -> StudioResult<ImageResponse> {
        self.generate_image(
            "flux",
            ImageRequest {
                prompt: body.prompt.clone(),
                model: self.api_model(&body.model),
                ratio: Some(body.ratio.clone()),
                ..ImageRequest::default()
            },
        )
    }

    pub fn handle_generate_image_ideogram(
        &self,
        body: &IdeogramImageBody,
    ) -> StudioResult<ImageResponse> {
        self.generate_image(
            "ideogram",
            ImageRequest {
                prompt: body.prompt.clone(),
                model: self.api_model("Ideogram 3.0"),
                ratio: Some(body.ratio.clone()),
                ..ImageRequest::default()
            },
        )
    }

    pub fn handle_generate_image_imagen(
        &self,
        body: &ImagenImageBody,
    ) -> StudioResult<ImageResponse> {
        self.generate_image(
            "imagen",
            ImageRequest {
                prompt: body.prompt.clone(),
                model: self.api_model(&body.model),
                ratio: Some(body.ratio.clone()),
                ..ImageRequest::default()
            },
        )
    }

    pub fn handle_generate_image_runway(
        &self,
        body: &RunwayImageBody,
    ) -> StudioResult<ImageResponse> {
        self.generate_image(
            "runway",
            ImageRequest {
                prompt: body.prompt.clone(),
                model: self.api_model("Runway Gen 4 Image"),
                ratio: Some(body.ratio.clone()),
                images: body.images.clone(),
                ..ImageRequest::default()
            },
        )
    }

    pub fn handle_generate_image_topaz(&self, body: &TopazImageBody) -> StudioResult<ImageResponse> {
        let mut options = Map::new();
        insert_some(&mut options, "output_width", body.output_width);
        insert_some(&mut options, "output_height", body.output_height);
        insert_some(
            &mut options,
            "scale",
            body.scale.as_ref().and_then(|scale| scale.as_factor()),
        );
        insert_some(&mut options, "sharpen", body.sharpen);
        insert_some(&mut options, "denoise", body.denoise);
        insert_some(&mut options, "fix_compression", body.fix_compression);
        insert_some(&mut options, "strength", body.strength);
        self.generate_image(
            "topaz",
            ImageRequest {
                model: body.model.clone(),
                images: vec![body.image.clone()],
                options,
                ..ImageRequest::default()
            },
        )
    }

    /// Runway video. The vendor polls server-side, so the answer is always `{url}`.
    pub fn handle_generate_video(&self, body: &VideoGenerateBody) -> StudioResult<VideoResponse> {
        self.generate_video(
            "runway",
            VideoRequest {
                prompt: body.prompt.clone(),
                model: self.api_model(&body.model),
                ratio: Some(body.ratio.clone()),
                duration_secs: body.duration,
                images: body.images.clone(),
                videos: body.videos.clone(),
                ..VideoRequest::default()
            },
            true,
        )
    }

    pub fn handle_generate_video_kling(&self, body: &KlingVideoBody) -> StudioResult<VideoResponse> {
        let mut options = Map::new();
        insert_some(&mut options, "negative_prompt", body.negative_prompt.clone());
        insert_some(&mut options, "cfg_scale", body.cfg_scale);
        self.generate_video(
            "kling",
            VideoRequest {
                prompt: body.prompt.clone(),
                model: self.api_model(&body.model),
                ratio: Some(body.ratio.clone()),
                duration_secs: body.duration,
                images: body.images.clone(),
                options,
                ..VideoRequest::default()
            },
            false,
        )
    }

    pub fn handle_generate_video_minimax(
        &self,
        body: &MinimaxVideoBody,
    ) -> StudioResult<VideoResponse> {
        self.generate_video(
            "minimax",
            VideoRequest {
                prompt: body.prompt.clone(),
                model: self.api_model(&body.model),
                duration_secs: body.duration,
                images: body.images.clone(),
                ..VideoRequest::default()
            },
            false,
        )
    }

    pub fn handle_generate_video_topaz(&self, body: &TopazVideoBody) -> StudioResult<VideoResponse> {
        let mut options = Map::new();
        insert_some(&mut options, "output_width", body.output_width);
        insert_some(&mut options, "output_height", body.output_height);
        insert_some(
            &mut options,
            "scale",
            body.scale.as_deref().and_then(|scale| scale.parse::<u32>().ok()),
        );
        self.generate_video(
            "topaz",
            VideoRequest {
                model: self.api_model("Topaz Video Upscale"),
                videos: vec![body.video.clone()],
                options,
                ..VideoRequest::default()
            },
            true,
        )
    }

    /// Status of a client-polled job. Provider trouble is reported in the body;
    /// only a bad query or a missing key becomes an error status.
    pub fn handle_job_status(
        &self,
        provider: &str,
        query: &JobStatusQuery,
    ) -> StudioResult<JobStatusResponse> {
        let job_id = query.job_id()?;
        let provider = self.video_provider(provider)?;
        match provider.poll(job_id) {
            Ok(status) => Ok(status.into_response()),
            Err(err @ (StudioError::MissingCredential(_) | StudioError::Validation(_))) => Err(err),
            Err(err) => Ok(JobStatusResponse::failed(
                None,
                Some(err.to_string()),
                err.details().cloned(),
            )),
        }
    }

    pub fn handle_download(&self, query: &DownloadQuery) -> StudioResult<DownloadedResource> {
        self.downloader.fetch(query)
    }

    pub fn handle_models(&self, query: &ModelsQuery) -> StudioResult<ModelsResponse> {
        let Some(kind) = query.kind.as_deref() else {
            return Ok(ModelsResponse {
                kind: None,
                models: self.selector.registry.list().cloned().collect(),
                gate: None,
            });
        };
        let kind: NodeKind = kind.parse()?;
        let counts = MediaCounts::new(query.images, query.videos);
        let models = self
            .selector
            .available_models(kind, counts)
            .into_iter()
            .cloned()
            .collect();
        let gate = if query.model.is_some() || query.ratio.is_some() {
            Some(
                self.selector
                    .gate(kind, query.model.as_deref(), query.ratio.as_deref(), counts)
                    .map_err(StudioError::Validation)?,
            )
        } else {
            None
        };
        Ok(ModelsResponse {
            kind: Some(kind),
            models,
            gate,
        })
    }

    /// Runs the posted canvas (or one node of it) and returns the updated canvas.
    pub fn handle_flow_run(&self, body: FlowRunBody) -> StudioResult<FlowRunResponse> {
        let mut canvas = Canvas::from_snapshot(body.canvas)?;
        let report = match body.node.as_deref() {
            Some(id) => self.run_single(&mut canvas, id, body.order)?,
            None => self.run_flow(&mut canvas, body.order)?,
        };
        Ok(FlowRunResponse {
            canvas: canvas.snapshot(),
            report,
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use studio_contracts::api::parse_value;
    use studio_contracts::graph::{ExecutionOrder, NodePatch};
    use studio_contracts::runs::NodeStatus;

    use super::*;
    use crate::StudioConfig;

    #[test]
    fn dryrun_text_resolves_catalog_labels() -> StudioResult<()> {
        let engine = StudioEngine::dryrun()?;
        let body: TextGenerateBody = parse_value(json!({"prompt": "hello", "model": "GPT-4o"}))?;
        let response = engine.handle_generate_text(&body)?;
        assert_eq!(response.text, "[dryrun gpt-4o] hello");

        let raw: TextGenerateBody = parse_value(json!({"prompt": "hello", "model": "o3-mini"}))?;
        assert_eq!(engine.handle_generate_text(&raw)?.text, "[dryrun o3-mini] hello");
        Ok(())
    }

    #[test]
    fn dryrun_image_returns_png_bytes() -> StudioResult<()> {
        let engine = StudioEngine::dryrun()?;
        let body: FluxImageBody = parse_value(json!({"prompt": "fern", "ratio": "16:9"}))?;
        let response = engine.handle_generate_image_flux(&body)?;
        assert_eq!(response.mime.as_deref(), Some("image/png"));
        assert!(response.b64.is_some_and(|b64| !b64.is_empty()));
        assert!(response.url.is_none());
        Ok(())
    }

    #[test]
    fn kling_returns_job_id_and_status_follows_it() -> StudioResult<()> {
        let engine = StudioEngine::dryrun()?;
        let body: KlingVideoBody = parse_value(json!({"prompt": "waves"}))?;
        let response = engine.handle_generate_video_kling(&body)?;
        assert!(response.url.is_none());
        let job_id = response.job_id.ok_or_else(|| StudioError::internal("no job id"))?;

        let query = JobStatusQuery { id: Some(job_id) };
        let status = engine.handle_job_status("kling", &query)?;
        assert!(status.is_done());
        assert!(status.url.is_some_and(|url| url.starts_with("data:video/mp4;base64,")));
        Ok(())
    }

    #[test]
    fn runway_video_settles_to_url() -> StudioResult<()> {
        let engine = StudioEngine::dryrun()?;
        let body: VideoGenerateBody = parse_value(json!({
            "prompt": "drift",
            "images": ["https://cdn/f.png"]
        }))?;
        let response = engine.handle_generate_video(&body)?;
        assert!(response.job_id.is_none());
        assert!(response.url.is_some());
        Ok(())
    }

    #[test]
    fn job_status_reports_provider_trouble_in_body() -> StudioResult<()> {
        let engine = StudioEngine::dryrun()?;
        let missing = engine.handle_job_status("minimax", &JobStatusQuery::default());
        assert_eq!(missing.err().map(|err| err.http_status()), Some(400));

        let unknown = engine.handle_job_status(
            "minimax",
            &JobStatusQuery {
                id: Some("nope".to_string()),
            },
        )?;
        assert!(unknown.is_failed());
        assert_eq!(unknown.error.as_deref(), Some("Unknown job 'nope'"));
        Ok(())
    }

    #[test]
    fn missing_credentials_surface_as_500() -> StudioResult<()> {
        if crate::http::non_empty_env("IDEOGRAM_API_KEY").is_some() {
            return Ok(());
        }
        let engine = StudioEngine::new(StudioConfig::default())?;
        let body: IdeogramImageBody = parse_value(json!({"prompt": "fern"}))?;
        let err = engine.handle_generate_image_ideogram(&body).err();
        assert_eq!(err.as_ref().map(StudioError::http_status), Some(500));
        assert_eq!(
            err.as_ref().map(StudioError::to_payload),
            Some(json!({"error": "Missing IDEOGRAM_API_KEY on server"}))
        );
        Ok(())
    }

    #[test]
    fn models_query_gates_against_inputs() -> StudioResult<()> {
        let engine = StudioEngine::dryrun()?;
        let response = engine.handle_models(&ModelsQuery {
            kind: Some("image".to_string()),
            images: 2,
            model: Some("Flux Dev".to_string()),
            ..ModelsQuery::default()
        })?;
        assert_eq!(response.kind, Some(NodeKind::Image));
        assert!(response.models.iter().all(|model| model.name != "Flux Dev"));
        let gate = response.gate.ok_or_else(|| StudioError::internal("no gate"))?;
        assert_eq!(gate.model.name, "GPT Image");

        let all = engine.handle_models(&ModelsQuery::default())?;
        assert!(all.models.len() > response.models.len());

        let bad = engine.handle_models(&ModelsQuery {
            kind: Some("audio".to_string()),
            ..ModelsQuery::default()
        });
        assert_eq!(bad.err().map(|err| err.http_status()), Some(400));
        Ok(())
    }

    #[test]
    fn flow_run_returns_updated_canvas() -> StudioResult<()> {
        let engine = StudioEngine::dryrun()?;
        let mut canvas = Canvas::new();
        let text = canvas.add_node(NodeKind::Text, None);
        let image = canvas.add_node(NodeKind::Image, None);
        canvas.connect(&text, &image)?;
        canvas.update_node_data(&text, NodePatch::prompt("a fern"))?;

        let response = engine.handle_flow_run(FlowRunBody {
            canvas: canvas.snapshot(),
            order: ExecutionOrder::Insertion,
            node: None,
        })?;
        assert_eq!(response.report.count(NodeStatus::Completed), 2);
        let image_node = response
            .canvas
            .nodes
            .iter()
            .find(|node| node.id == image)
            .ok_or_else(|| StudioError::internal("image node missing"))?;
        assert_eq!(image_node.data.prompt, "[dryrun gpt-4o-mini] a fern");
        assert!(!image_node.data.image_url.is_empty());

        let single = engine.handle_flow_run(FlowRunBody {
            canvas: canvas.snapshot(),
            order: ExecutionOrder::Insertion,
            node: Some(text.clone()),
        })?;
        assert_eq!(single.report.outcomes.len(), 1);
        assert_eq!(single.report.outcomes[0].node_id, text);
        Ok(())
    }
}
