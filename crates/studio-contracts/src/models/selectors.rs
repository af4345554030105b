use serde::Serialize;

use super::registry::{ModelRegistry, ModelSpec};
use crate::graph::NodeKind;

/// Number of image and video sources connected into a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct MediaCounts {
    pub images: usize,
    pub videos: usize,
}

impl MediaCounts {
    pub fn new(images: usize, videos: usize) -> Self {
        Self { images, videos }
    }

    pub fn has_inputs(&self) -> bool {
        self.images > 0 || self.videos > 0
    }

    /// Text nodes take images as context but never videos.
    fn effective_for(self, kind: NodeKind) -> Self {
        match kind {
            NodeKind::Text => Self {
                images: self.images,
                videos: 0,
            },
            _ => self,
        }
    }
}

/// Result of resolving a node's model/ratio against its inputs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GateOutcome {
    pub model: ModelSpec,
    pub ratio: Option<String>,
    pub fallback_reason: Option<String>,
    pub ratio_reset: Option<String>,
}

impl GateOutcome {
    pub fn reasons(&self) -> Vec<String> {
        self.fallback_reason
            .iter()
            .chain(self.ratio_reset.iter())
            .cloned()
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct ModelSelector {
    pub registry: ModelRegistry,
}

impl Default for ModelSelector {
    fn default() -> Self {
        Self::new(None)
    }
}

pub fn default_model_name(kind: NodeKind) -> &'static str {
    match kind {
        NodeKind::Text => "GPT-4o Mini",
        NodeKind::Image => "GPT Image",
        NodeKind::Video => "Kling 1.6",
    }
}

impl ModelSelector {
    pub fn new(registry: Option<ModelRegistry>) -> Self {
        Self {
            registry: registry.unwrap_or_default(),
        }
    }

    /// Models of `kind` whose input limits accept `counts`.
    pub fn available_models(&self, kind: NodeKind, counts: MediaCounts) -> Vec<&ModelSpec> {
        let counts = counts.effective_for(kind);
        self.registry
            .by_kind(kind)
            .into_iter()
            .filter(|model| {
                model.inputs.accepts_images(counts.images) && model.inputs.accepts_videos(counts.videos)
            })
            .collect()
    }

    pub fn available_ratios<'a>(&self, model: &'a ModelSpec, counts: MediaCounts) -> &'a [String] {
        model.ratios_for(counts.effective_for(model.kind).has_inputs())
    }

    pub fn gate(
        &self,
        kind: NodeKind,
        model: Option<&str>,
        ratio: Option<&str>,
        counts: MediaCounts,
    ) -> Result<GateOutcome, String> {
        let effective = counts.effective_for(kind);
        let available = self.available_models(kind, effective);
        if available.is_empty() {
            return Err(format!(
                "No {kind} model accepts {} image input(s) and {} video input(s).",
                effective.images, effective.videos
            ));
        }

        let fallback = pick_default(&available, kind)
            .ok_or_else(|| format!("No models available for {kind} nodes."))?;
        let (chosen, fallback_reason) = match model {
            Some(name) => match available.iter().find(|spec| spec.name == name) {
                Some(spec) => ((*spec).clone(), None),
                None => {
                    let reason = format!(
                        "Model '{name}' is unavailable with {} image and {} video input(s); switched to '{}'.",
                        effective.images, effective.videos, fallback.name
                    );
                    (fallback, Some(reason))
                }
            },
            None => {
                let reason = format!("No model specified; using '{}'.", fallback.name);
                (fallback, Some(reason))
            }
        };

        if kind == NodeKind::Text {
            return Ok(GateOutcome {
                model: chosen,
                ratio: None,
                fallback_reason,
                ratio_reset: None,
            });
        }

        let ratios = self.available_ratios(&chosen, effective);
        let (ratio, ratio_reset) = match ratio {
            Some(value) if ratios.iter().any(|allowed| allowed == value) => {
                (Some(value.to_string()), None)
            }
            requested => {
                let first = ratios.first().cloned();
                let reason = match (requested, first.as_deref()) {
                    (Some(value), Some(first)) => Some(format!(
                        "Ratio '{value}' is not offered by '{}'; using '{first}'.",
                        chosen.name
                    )),
                    (None, Some(first)) => Some(format!("No ratio specified; using '{first}'.")),
                    _ => None,
                };
                (first, reason)
            }
        };

        Ok(GateOutcome {
            model: chosen,
            ratio,
            fallback_reason,
            ratio_reset,
        })
    }
}

fn pick_default(available: &[&ModelSpec], kind: NodeKind) -> Option<ModelSpec> {
    let preferred = default_model_name(kind);
    available
        .iter()
        .find(|spec| spec.name == preferred)
        .or_else(|| available.first())
        .map(|spec| (*spec).clone())
}
