use indexmap::IndexMap;
use serde::Serialize;

use crate::graph::NodeKind;

/// How a provider delivers its result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStyle {
    /// Result returned by the submit call.
    Sync,
    /// The request blocks while the engine polls the vendor.
    ServerPoll,
    /// Submit returns a job id that callers poll through a status endpoint.
    ClientPoll,
}

/// Accepted number of upstream image and video sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct InputLimits {
    pub min_images: usize,
    pub max_images: usize,
    pub min_videos: usize,
    pub max_videos: usize,
}

impl InputLimits {
    pub const NONE: InputLimits = InputLimits::images(0, 0);

    pub const fn images(min: usize, max: usize) -> Self {
        Self {
            min_images: min,
            max_images: max,
            min_videos: 0,
            max_videos: 0,
        }
    }

    pub const fn with_videos(self, min: usize, max: usize) -> Self {
        Self {
            min_videos: min,
            max_videos: max,
            ..self
        }
    }

    pub fn accepts_images(&self, count: usize) -> bool {
        (self.min_images..=self.max_images).contains(&count)
    }

    pub fn accepts_videos(&self, count: usize) -> bool {
        (self.min_videos..=self.max_videos).contains(&count)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelSpec {
    /// Catalog label shown on the node.
    pub name: String,
    pub provider: String,
    /// Vendor-side model id.
    pub api_model: String,
    pub kind: NodeKind,
    pub capabilities: Vec<String>,
    pub ratios: Vec<String>,
    pub ratios_with_inputs: Vec<String>,
    pub inputs: InputLimits,
    pub job_style: JobStyle,
}

impl ModelSpec {
    /// Ratios offered given whether any media inputs are connected.
    pub fn ratios_for(&self, has_inputs: bool) -> &[String] {
        if has_inputs {
            &self.ratios_with_inputs
        } else {
            &self.ratios
        }
    }
}

#[derive(Debug, Clone)]
pub struct ModelRegistry {
    models: IndexMap<String, ModelSpec>,
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::new(None)
    }
}

impl ModelRegistry {
    pub fn new(models: Option<IndexMap<String, ModelSpec>>) -> Self {
        Self {
            models: models.unwrap_or_else(default_models),
        }
    }

    pub fn get(&self, name: &str) -> Option<&ModelSpec> {
        self.models.get(name)
    }

    /// Lookup by catalog label, falling back to the vendor model id.
    pub fn find(&self, name_or_api_model: &str) -> Option<&ModelSpec> {
        self.get(name_or_api_model).or_else(|| {
            self.models
                .values()
                .find(|model| model.api_model == name_or_api_model)
        })
    }

    pub fn list(&self) -> impl Iterator<Item = &ModelSpec> {
        self.models.values()
    }

    pub fn by_kind(&self, kind: NodeKind) -> Vec<&ModelSpec> {
        self.models
            .values()
            .filter(|model| model.kind == kind)
            .collect()
    }

    pub fn ensure(&self, name: &str, kind: NodeKind) -> Option<ModelSpec> {
        let model = self.get(name)?;
        if model.kind == kind {
            return Some(model.clone());
        }
        None
    }
}

struct Entry<'a> {
    name: &'a str,
    provider: &'a str,
    api_model: &'a str,
    kind: NodeKind,
    capabilities: &'a [&'a str],
    ratios: &'a [&'a str],
    ratios_with_inputs: &'a [&'a str],
    inputs: InputLimits,
    job_style: JobStyle,
}

const FLUX_RATIOS: &[&str] = &["1:1", "16:9", "4:3", "3:4", "9:16"];
const IMAGEN_RATIOS: &[&str] = &["1:1", "4:3", "16:9", "3:4", "9:16"];
const IDEOGRAM_RATIOS: &[&str] = &[
    "1:1", "3:1", "16:10", "16:9", "3:2", "4:3", "3:4", "2:3", "9:16", "10:16", "1:3",
];
const GPT_IMAGE_RATIOS: &[&str] = &["auto", "1:1", "3:2", "2:3"];
const RUNWAY_IMAGE_RATIOS: &[&str] = &["auto", "1:1", "16:9", "4:3", "3:4", "9:16", "21:9"];
const RUNWAY_VIDEO_RATIOS: &[&str] = &["16:9", "9:16", "4:3", "3:4", "1:1", "21:9"];
const KLING_RATIOS: &[&str] = &["16:9", "9:16", "1:1"];
const AUTO_ONLY: &[&str] = &["auto"];

fn default_models() -> IndexMap<String, ModelSpec> {
    let text = |name: &'static str, provider: &'static str, api_model: &'static str| Entry {
        name,
        provider,
        api_model,
        kind: NodeKind::Text,
        capabilities: &["text", "vision"],
        ratios: &[],
        ratios_with_inputs: &[],
        inputs: InputLimits::images(0, 16),
        job_style: JobStyle::Sync,
    };

    let entries = [
        text("GPT-4o Mini", "openai", "gpt-4o-mini"),
        text("GPT-4o", "openai", "gpt-4o"),
        text("GPT-4.1 Mini", "openai", "gpt-4.1-mini"),
        text("Dryrun Text", "dryrun", "dryrun-text-1"),
        Entry {
            name: "GPT Image",
            provider: "openai",
            api_model: "gpt-image-1",
            kind: NodeKind::Image,
            capabilities: &["image", "edit"],
            ratios: GPT_IMAGE_RATIOS,
            ratios_with_inputs: GPT_IMAGE_RATIOS,
            inputs: InputLimits::images(0, 10),
            job_style: JobStyle::Sync,
        },
        Entry {
            name: "Flux Dev",
            provider: "flux",
            api_model: "flux-dev",
            kind: NodeKind::Image,
            capabilities: &["image"],
            ratios: FLUX_RATIOS,
            ratios_with_inputs: FLUX_RATIOS,
            inputs: InputLimits::NONE,
            job_style: JobStyle::ServerPoll,
        },
        Entry {
            name: "Flux Pro 1.1",
            provider: "flux",
            api_model: "flux-pro-1.1",
            kind: NodeKind::Image,
            capabilities: &["image"],
            ratios: FLUX_RATIOS,
            ratios_with_inputs: FLUX_RATIOS,
            inputs: InputLimits::NONE,
            job_style: JobStyle::ServerPoll,
        },
        Entry {
            name: "Flux Kontext Max",
            provider: "flux",
            api_model: "flux-kontext-max",
            kind: NodeKind::Image,
            capabilities: &["image", "edit"],
            ratios: FLUX_RATIOS,
            ratios_with_inputs: FLUX_RATIOS,
            inputs: InputLimits::images(0, 1),
            job_style: JobStyle::ServerPoll,
        },
        Entry {
            name: "Imagen 4",
            provider: "imagen",
            api_model: "imagen-4.0-generate-001",
            kind: NodeKind::Image,
            capabilities: &["image"],
            ratios: IMAGEN_RATIOS,
            ratios_with_inputs: IMAGEN_RATIOS,
            inputs: InputLimits::NONE,
            job_style: JobStyle::Sync,
        },
        Entry {
            name: "Imagen 4 Ultra",
            provider: "imagen",
            api_model: "imagen-4.0-ultra-generate-001",
            kind: NodeKind::Image,
            capabilities: &["image"],
            ratios: IMAGEN_RATIOS,
            ratios_with_inputs: IMAGEN_RATIOS,
            inputs: InputLimits::NONE,
            job_style: JobStyle::Sync,
        },
        Entry {
            name: "Ideogram 3.0",
            provider: "ideogram",
            api_model: "ideogram-v3",
            kind: NodeKind::Image,
            capabilities: &["image"],
            ratios: IDEOGRAM_RATIOS,
            ratios_with_inputs: IDEOGRAM_RATIOS,
            inputs: InputLimits::NONE,
            job_style: JobStyle::Sync,
        },
        Entry {
            name: "Runway Gen 4 Image",
            provider: "runway",
            api_model: "gen4_image_turbo",
            kind: NodeKind::Image,
            capabilities: &["image", "edit"],
            ratios: RUNWAY_IMAGE_RATIOS,
            ratios_with_inputs: RUNWAY_IMAGE_RATIOS,
            inputs: InputLimits::images(0, 3),
            job_style: JobStyle::ServerPoll,
        },
        Entry {
            name: "Topaz Upscale",
            provider: "topaz",
            api_model: "Standard V2",
            kind: NodeKind::Image,
            capabilities: &["upscale"],
            ratios: AUTO_ONLY,
            ratios_with_inputs: AUTO_ONLY,
            inputs: InputLimits::images(1, 1),
            job_style: JobStyle::Sync,
        },
        Entry {
            name: "Dryrun Image",
            provider: "dryrun",
            api_model: "dryrun-image-1",
            kind: NodeKind::Image,
            capabilities: &["image", "edit"],
            ratios: GPT_IMAGE_RATIOS,
            ratios_with_inputs: GPT_IMAGE_RATIOS,
            inputs: InputLimits::images(0, 10),
            job_style: JobStyle::Sync,
        },
        Entry {
            name: "Kling 2.1 Master",
            provider: "kling",
            api_model: "kling-v2-1-master",
            kind: NodeKind::Video,
            capabilities: &["video", "image_to_video"],
            ratios: KLING_RATIOS,
            ratios_with_inputs: AUTO_ONLY,
            inputs: InputLimits::images(0, 1),
            job_style: JobStyle::ClientPoll,
        },
        Entry {
            name: "Kling 2.0 Master",
            provider: "kling",
            api_model: "kling-v2-master",
            kind: NodeKind::Video,
            capabilities: &["video", "image_to_video"],
            ratios: KLING_RATIOS,
            ratios_with_inputs: AUTO_ONLY,
            inputs: InputLimits::images(0, 1),
            job_style: JobStyle::ClientPoll,
        },
        Entry {
            name: "Kling 1.6",
            provider: "kling",
            api_model: "kling-v1-6",
            kind: NodeKind::Video,
            capabilities: &["video", "image_to_video"],
            ratios: KLING_RATIOS,
            ratios_with_inputs: AUTO_ONLY,
            inputs: InputLimits::images(0, 1),
            job_style: JobStyle::ClientPoll,
        },
        Entry {
            name: "Minimax Hailuo",
            provider: "minimax",
            api_model: "MiniMax-Hailuo-02",
            kind: NodeKind::Video,
            capabilities: &["video", "image_to_video"],
            ratios: &["16:9"],
            ratios_with_inputs: AUTO_ONLY,
            inputs: InputLimits::images(0, 1),
            job_style: JobStyle::ClientPoll,
        },
        Entry {
            name: "Minimax Hailuo 02 Pro",
            provider: "minimax",
            api_model: "MiniMax-Hailuo-02-Pro",
            kind: NodeKind::Video,
            capabilities: &["video", "image_to_video"],
            ratios: &["16:9"],
            ratios_with_inputs: AUTO_ONLY,
            inputs: InputLimits::images(0, 1),
            job_style: JobStyle::ClientPoll,
        },
        Entry {
            name: "Runway Gen 4 Turbo",
            provider: "runway",
            api_model: "gen4_turbo",
            kind: NodeKind::Video,
            capabilities: &["video", "image_to_video"],
            ratios: RUNWAY_VIDEO_RATIOS,
            ratios_with_inputs: RUNWAY_VIDEO_RATIOS,
            inputs: InputLimits::images(1, 1),
            job_style: JobStyle::ServerPoll,
        },
        Entry {
            name: "Runway Act Two",
            provider: "runway",
            api_model: "act_two",
            kind: NodeKind::Video,
            capabilities: &["video", "character_performance"],
            ratios: RUNWAY_VIDEO_RATIOS,
            ratios_with_inputs: RUNWAY_VIDEO_RATIOS,
            inputs: InputLimits::images(1, 1).with_videos(1, 1),
            job_style: JobStyle::ServerPoll,
        },
        Entry {
            name: "Runway Aleph",
            provider: "runway",
            api_model: "gen4_aleph",
            kind: NodeKind::Video,
            capabilities: &["video", "video_to_video"],
            ratios: RUNWAY_VIDEO_RATIOS,
            ratios_with_inputs: RUNWAY_VIDEO_RATIOS,
            inputs: InputLimits::NONE.with_videos(1, 1),
            job_style: JobStyle::ServerPoll,
        },
        Entry {
            name: "Topaz Video Upscale",
            provider: "topaz",
            api_model: "prob-4",
            kind: NodeKind::Video,
            capabilities: &["upscale"],
            ratios: AUTO_ONLY,
            ratios_with_inputs: AUTO_ONLY,
            inputs: InputLimits::NONE.with_videos(1, 1),
            job_style: JobStyle::ServerPoll,
        },
        Entry {
            name: "Dryrun Video",
            provider: "dryrun",
            api_model: "dryrun-video-1",
            kind: NodeKind::Video,
            capabilities: &["video", "image_to_video"],
            ratios: KLING_RATIOS,
            ratios_with_inputs: AUTO_ONLY,
            inputs: InputLimits::images(0, 1),
            job_style: JobStyle::ClientPoll,
        },
    ];

    let strings = |items: &[&str]| -> Vec<String> {
        items.iter().map(|item| (*item).to_string()).collect()
    };
    let mut map = IndexMap::new();
    for entry in entries {
        map.insert(
            entry.name.to_string(),
            ModelSpec {
                name: entry.name.to_string(),
                provider: entry.provider.to_string(),
                api_model: entry.api_model.to_string(),
                kind: entry.kind,
                capabilities: strings(entry.capabilities),
                ratios: strings(entry.ratios),
                ratios_with_inputs: strings(entry.ratios_with_inputs),
                inputs: entry.inputs,
                job_style: entry.job_style,
            },
        );
    }
    map
}
