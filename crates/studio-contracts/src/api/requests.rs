use serde::Deserialize;

use super::Validate;
use crate::error::{StudioError, StudioResult};
use crate::graph::{CanvasSnapshot, ExecutionOrder};

pub const IMAGE_SIZES: &[&str] = &["1024x1024", "1536x1024", "1024x1536", "auto"];
pub const FLUX_RATIOS: &[&str] = &["1:1", "16:9", "4:3", "3:4", "9:16"];
pub const FLUX_MODELS: &[&str] = &["Flux Dev", "Flux Kontext Max", "Flux Pro 1.1"];
pub const IDEOGRAM_RATIOS: &[&str] = &[
    "1:1", "3:1", "16:10", "16:9", "3:2", "4:3", "3:4", "2:3", "9:16", "10:16", "1:3",
];
pub const IMAGEN_RATIOS: &[&str] = &["1:1", "4:3", "16:9", "3:4", "9:16"];
pub const IMAGEN_MODELS: &[&str] = &["Imagen 4", "Imagen 4 Ultra"];
pub const RUNWAY_IMAGE_RATIOS: &[&str] = &["auto", "1:1", "16:9", "4:3", "3:4", "9:16", "21:9"];
pub const RUNWAY_VIDEO_RATIOS: &[&str] = &[
    "1280:720", "720:1280", "1104:832", "832:1104", "960:960", "1584:672",
];
pub const RUNWAY_VIDEO_MODELS: &[&str] = &["Runway Gen 4 Turbo", "Runway Act Two", "Runway Aleph"];
pub const TOPAZ_IMAGE_MODELS: &[&str] = &[
    "Standard V2",
    "Low Resolution V2",
    "CGI",
    "High Fidelity V2",
    "Text Refine",
    "Redefine",
    "Recovery",
    "Recovery V2",
];
pub const KLING_MODELS: &[&str] = &["Kling 2.1 Master", "Kling 2.0 Master", "Kling 1.6"];
pub const KLING_RATIOS: &[&str] = &["16:9", "9:16", "1:1"];
pub const MINIMAX_MODELS: &[&str] = &["Minimax Hailuo", "Minimax Hailuo 02 Pro"];
pub const VIDEO_DURATIONS: &[u32] = &[5, 10];
pub const MINIMAX_DURATIONS: &[u32] = &[6, 10];

pub(crate) fn one_of(field: &str, value: &str, allowed: &[&str]) -> StudioResult<()> {
    if allowed.contains(&value) {
        return Ok(());
    }
    Err(StudioError::validation(format!(
        "Invalid {field} '{value}'. Expected one of: {}",
        allowed.join(", ")
    )))
}

fn non_empty(field: &str, value: &str) -> StudioResult<()> {
    if value.is_empty() {
        return Err(StudioError::validation(format!("{field} must not be empty")));
    }
    Ok(())
}

fn at_most(field: &str, items: &[String], max: usize) -> StudioResult<()> {
    if items.len() > max {
        return Err(StudioError::validation(format!(
            "{field} accepts at most {max} item(s), got {}",
            items.len()
        )));
    }
    if items.iter().any(String::is_empty) {
        return Err(StudioError::validation(format!(
            "{field} entries must not be empty"
        )));
    }
    Ok(())
}

fn in_range(field: &str, value: Option<f64>, min: f64, max: f64) -> StudioResult<()> {
    match value {
        Some(value) if !(min..=max).contains(&value) => Err(StudioError::validation(format!(
            "{field} must be between {min} and {max}"
        ))),
        _ => Ok(()),
    }
}

fn positive(field: &str, value: Option<i64>) -> StudioResult<()> {
    match value {
        Some(value) if value <= 0 => Err(StudioError::validation(format!(
            "{field} must be a positive integer"
        ))),
        _ => Ok(()),
    }
}

fn blank(value: &str) -> bool {
    value.trim().is_empty()
}

fn default_text_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_image_size() -> String {
    "1024x1024".to_string()
}

fn default_square() -> String {
    "1:1".to_string()
}

fn default_auto() -> String {
    "auto".to_string()
}

fn default_flux_model() -> String {
    "Flux Dev".to_string()
}

fn default_imagen_model() -> String {
    "Imagen 4".to_string()
}

fn default_topaz_model() -> String {
    "Standard V2".to_string()
}

fn default_duration() -> u32 {
    5
}

fn default_minimax_duration() -> u32 {
    6
}

fn default_runway_video_ratio() -> String {
    "1280:720".to_string()
}

fn default_runway_video_model() -> String {
    "Runway Gen 4 Turbo".to_string()
}

fn default_kling_model() -> String {
    "Kling 1.6".to_string()
}

fn default_landscape() -> String {
    "16:9".to_string()
}

fn default_minimax_model() -> String {
    "Minimax Hailuo".to_string()
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TextGenerateBody {
    pub prompt: String,
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default = "default_text_model")]
    pub model: String,
}

impl Validate for TextGenerateBody {
    fn validate(&self) -> StudioResult<()> {
        non_empty("prompt", &self.prompt)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ImageGenerateBody {
    #[serde(default)]
    pub prompt: String,
    #[serde(default = "default_image_size")]
    pub size: String,
    #[serde(default)]
    pub images: Vec<String>,
}

impl Validate for ImageGenerateBody {
    fn validate(&self) -> StudioResult<()> {
        one_of("size", &self.size, IMAGE_SIZES)?;
        at_most("images", &self.images, 10)?;
        if self.images.is_empty() && blank(&self.prompt) {
            return Err(StudioError::validation(
                "Prompt is required when no input images are provided",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FluxImageBody {
    pub prompt: String,
    #[serde(default = "default_flux_model")]
    pub model: String,
    #[serde(default = "default_square")]
    pub ratio: String,
}

impl Validate for FluxImageBody {
    fn validate(&self) -> StudioResult<()> {
        non_empty("prompt", &self.prompt)?;
        one_of("ratio", &self.ratio, FLUX_RATIOS)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct IdeogramImageBody {
    pub prompt: String,
    #[serde(default = "default_square")]
    pub ratio: String,
}

impl Validate for IdeogramImageBody {
    fn validate(&self) -> StudioResult<()> {
        non_empty("prompt", &self.prompt)?;
        one_of("ratio", &self.ratio, IDEOGRAM_RATIOS)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ImagenImageBody {
    #[serde(default)]
    pub prompt: String,
    #[serde(default = "default_square")]
    pub ratio: String,
    #[serde(default = "default_imagen_model")]
    pub model: String,
}

impl Validate for ImagenImageBody {
    fn validate(&self) -> StudioResult<()> {
        one_of("ratio", &self.ratio, IMAGEN_RATIOS)?;
        one_of("model", &self.model, IMAGEN_MODELS)?;
        if blank(&self.prompt) {
            return Err(StudioError::validation("Prompt is required"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RunwayImageBody {
    #[serde(default)]
    pub prompt: String,
    #[serde(default = "default_auto")]
    pub ratio: String,
    #[serde(default)]
    pub images: Vec<String>,
}

impl Validate for RunwayImageBody {
    fn validate(&self) -> StudioResult<()> {
        one_of("ratio", &self.ratio, RUNWAY_IMAGE_RATIOS)?;
        at_most("images", &self.images, 3)?;
        if self.images.is_empty() && blank(&self.prompt) {
            return Err(StudioError::validation(
                "Prompt is required when no reference images are provided",
            ));
        }
        Ok(())
    }
}

/// Scale given either as a number or as its string form.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ScaleValue {
    Number(i64),
    Text(String),
}

impl ScaleValue {
    pub fn as_factor(&self) -> Option<u32> {
        match self {
            Self::Number(value) => u32::try_from(*value).ok(),
            Self::Text(value) => value.trim().parse().ok(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TopazImageBody {
    pub image: String,
    pub output_width: Option<i64>,
    pub output_height: Option<i64>,
    pub scale: Option<ScaleValue>,
    #[serde(default = "default_topaz_model")]
    pub model: String,
    pub sharpen: Option<f64>,
    pub denoise: Option<f64>,
    pub fix_compression: Option<f64>,
    pub strength: Option<f64>,
}

impl Validate for TopazImageBody {
    fn validate(&self) -> StudioResult<()> {
        non_empty("image", &self.image)?;
        positive("output_width", self.output_width)?;
        positive("output_height", self.output_height)?;
        if let Some(scale) = &self.scale {
            match scale.as_factor() {
                Some(2..=4) => {}
                _ => return Err(StudioError::validation("scale must be 2, 3 or 4")),
            }
        }
        one_of("model", &self.model, TOPAZ_IMAGE_MODELS)?;
        in_range("sharpen", self.sharpen, 0.0, 1.0)?;
        in_range("denoise", self.denoise, 0.0, 1.0)?;
        in_range("fix_compression", self.fix_compression, 0.0, 1.0)?;
        in_range("strength", self.strength, 0.01, 1.0)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct VideoGenerateBody {
    pub prompt: String,
    #[serde(default = "default_duration")]
    pub duration: u32,
    #[serde(default = "default_runway_video_ratio")]
    pub ratio: String,
    #[serde(default = "default_runway_video_model")]
    pub model: String,
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default)]
    pub videos: Vec<String>,
}

impl Validate for VideoGenerateBody {
    fn validate(&self) -> StudioResult<()> {
        non_empty("prompt", &self.prompt)?;
        if !VIDEO_DURATIONS.contains(&self.duration) {
            return Err(StudioError::validation("duration must be 5 or 10"));
        }
        one_of("ratio", &self.ratio, RUNWAY_VIDEO_RATIOS)?;
        one_of("model", &self.model, RUNWAY_VIDEO_MODELS)?;
        at_most("images", &self.images, usize::MAX)?;
        at_most("videos", &self.videos, usize::MAX)?;
        match self.model.as_str() {
            "Runway Gen 4 Turbo" if self.images.is_empty() => Err(StudioError::validation(
                "Runway Gen 4 Turbo requires an input image",
            )),
            "Runway Act Two" if self.images.is_empty() || self.videos.is_empty() => Err(
                StudioError::validation("Runway Act Two requires one image and one video input"),
            ),
            "Runway Aleph" if self.videos.is_empty() => Err(StudioError::validation(
                "Runway Aleph requires a video input",
            )),
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct KlingVideoBody {
    #[serde(default)]
    pub prompt: String,
    #[serde(default = "default_kling_model")]
    pub model: String,
    #[serde(default = "default_landscape")]
    pub ratio: String,
    #[serde(default = "default_duration")]
    pub duration: u32,
    #[serde(default)]
    pub images: Vec<String>,
    pub negative_prompt: Option<String>,
    pub cfg_scale: Option<f64>,
}

impl Validate for KlingVideoBody {
    fn validate(&self) -> StudioResult<()> {
        one_of("model", &self.model, KLING_MODELS)?;
        if self.images.is_empty() {
            one_of("ratio", &self.ratio, KLING_RATIOS)?;
        }
        if !VIDEO_DURATIONS.contains(&self.duration) {
            return Err(StudioError::validation("duration must be 5 or 10"));
        }
        at_most("images", &self.images, 1)?;
        in_range("cfg_scale", self.cfg_scale, 0.0, 1.0)?;
        if self.images.is_empty() && blank(&self.prompt) {
            return Err(StudioError::validation(
                "Prompt is required when no input image is provided",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MinimaxVideoBody {
    pub prompt: String,
    #[serde(default = "default_minimax_model")]
    pub model: String,
    #[serde(default = "default_minimax_duration")]
    pub duration: u32,
    #[serde(default)]
    pub images: Vec<String>,
}

impl Validate for MinimaxVideoBody {
    fn validate(&self) -> StudioResult<()> {
        non_empty("prompt", &self.prompt)?;
        one_of("model", &self.model, MINIMAX_MODELS)?;
        if !MINIMAX_DURATIONS.contains(&self.duration) {
            return Err(StudioError::validation("duration must be 6 or 10"));
        }
        at_most("images", &self.images, 1)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TopazVideoBody {
    pub video: String,
    pub output_width: Option<i64>,
    pub output_height: Option<i64>,
    pub scale: Option<String>,
}

impl Validate for TopazVideoBody {
    fn validate(&self) -> StudioResult<()> {
        non_empty("video", &self.video)?;
        positive("output_width", self.output_width)?;
        positive("output_height", self.output_height)?;
        if let Some(scale) = &self.scale {
            one_of("scale", scale, &["2", "3", "4"])?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct JobStatusQuery {
    pub id: Option<String>,
}

impl JobStatusQuery {
    pub fn job_id(&self) -> StudioResult<&str> {
        match self.id.as_deref() {
            Some(id) if !id.is_empty() => Ok(id),
            _ => Err(StudioError::validation("Missing id")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct DownloadQuery {
    pub url: Option<String>,
    pub filename: Option<String>,
}

impl DownloadQuery {
    pub fn source(&self) -> StudioResult<&str> {
        match self.url.as_deref() {
            Some(url) if !url.is_empty() => Ok(url),
            _ => Err(StudioError::validation("Missing url")),
        }
    }

    pub fn filename(&self) -> &str {
        match self.filename.as_deref() {
            Some(name) if !name.is_empty() => name,
            _ => "download",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct ModelsQuery {
    pub kind: Option<String>,
    #[serde(default)]
    pub images: usize,
    #[serde(default)]
    pub videos: usize,
    pub model: Option<String>,
    pub ratio: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FlowRunBody {
    pub canvas: CanvasSnapshot,
    #[serde(default)]
    pub order: ExecutionOrder,
    /// Runs only this node, with context from its inputs.
    pub node: Option<String>,
}

impl Validate for FlowRunBody {
    fn validate(&self) -> StudioResult<()> {
        if let Some(node) = &self.node {
            if !self.canvas.nodes.iter().any(|candidate| &candidate.id == node) {
                return Err(StudioError::not_found(format!("Node '{node}' not found")));
            }
        }
        Ok(())
    }
}
