use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::StudioError;

pub const DEFAULT_TEXT_PROMPT: &str = "Write a haiku about forests.";
pub const DEFAULT_IMAGE_PROMPT: &str = "A watercolor painting of a fern in a misty forest";
pub const DEFAULT_VIDEO_PROMPT: &str = "A short looping animation of leaves swaying in the wind";
pub const DEFAULT_VIDEO_DURATION_SECS: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Text,
    Image,
    Video,
}

impl NodeKind {
    pub const ALL: [NodeKind; 3] = [NodeKind::Text, NodeKind::Image, NodeKind::Video];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
            Self::Video => "video",
        }
    }

    pub fn is_media(self) -> bool {
        matches!(self, Self::Image | Self::Video)
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeKind {
    type Err = StudioError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "text" | "textgenerate" => Ok(Self::Text),
            "image" | "imagegenerate" => Ok(Self::Image),
            "video" | "videogenerate" => Ok(Self::Video),
            other => Err(StudioError::validation(format!(
                "Unknown node type '{other}'. Expected text, image or video."
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn offset(self, dx: f64, dy: f64) -> Self {
        Self {
            x: self.x + dx,
            y: self.y + dy,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeData {
    pub prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ratio: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<u32>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub output: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub image_url: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub video_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub prompt_locked: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt_locked_source_id: Option<String>,
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub options: Map<String, Value>,
}

impl NodeData {
    /// Fresh data for a newly created block of the given kind.
    pub fn defaults_for(kind: NodeKind) -> Self {
        match kind {
            NodeKind::Text => Self {
                prompt: DEFAULT_TEXT_PROMPT.to_string(),
                model: Some("GPT-4o Mini".to_string()),
                ..Self::default()
            },
            NodeKind::Image => Self {
                prompt: DEFAULT_IMAGE_PROMPT.to_string(),
                model: Some("GPT Image".to_string()),
                ratio: Some("1:1".to_string()),
                ..Self::default()
            },
            NodeKind::Video => Self {
                prompt: DEFAULT_VIDEO_PROMPT.to_string(),
                model: Some("Kling 1.6".to_string()),
                ratio: Some("16:9".to_string()),
                duration_secs: Some(DEFAULT_VIDEO_DURATION_SECS),
                ..Self::default()
            },
        }
    }

    /// The generated artifact a downstream node would consume.
    pub fn result_for(&self, kind: NodeKind) -> &str {
        match kind {
            NodeKind::Text => &self.output,
            NodeKind::Image => &self.image_url,
            NodeKind::Video => &self.video_url,
        }
    }
}

/// Partial update applied by `Canvas::update_node_data`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NodePatch {
    pub prompt: Option<String>,
    pub model: Option<String>,
    pub ratio: Option<String>,
    pub duration_secs: Option<u32>,
    pub output: Option<String>,
    pub image_url: Option<String>,
    pub video_url: Option<String>,
    pub options: Option<Map<String, Value>>,
}

impl NodePatch {
    pub fn prompt(value: impl Into<String>) -> Self {
        Self {
            prompt: Some(value.into()),
            ..Self::default()
        }
    }

    pub fn model(value: impl Into<String>) -> Self {
        Self {
            model: Some(value.into()),
            ..Self::default()
        }
    }

    pub fn ratio(value: impl Into<String>) -> Self {
        Self {
            ratio: Some(value.into()),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub(crate) fn apply(self, data: &mut NodeData) {
        if let Some(prompt) = self.prompt {
            data.prompt = prompt;
        }
        if let Some(model) = self.model {
            data.model = Some(model);
        }
        if let Some(ratio) = self.ratio {
            data.ratio = Some(ratio);
        }
        if let Some(duration) = self.duration_secs {
            data.duration_secs = Some(duration);
        }
        if let Some(output) = self.output {
            data.output = output;
        }
        if let Some(image_url) = self.image_url {
            data.image_url = image_url;
        }
        if let Some(video_url) = self.video_url {
            data.video_url = video_url;
        }
        if let Some(options) = self.options {
            for (key, value) in options {
                if value.is_null() {
                    data.options.remove(&key);
                } else {
                    data.options.insert(key, value);
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: NodeKind,
    #[serde(default)]
    pub position: Position,
    #[serde(default)]
    pub data: NodeData,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub selected: bool,
}

impl Node {
    pub fn new(id: impl Into<String>, kind: NodeKind, position: Position) -> Self {
        Self {
            id: id.into(),
            kind,
            position,
            data: NodeData::defaults_for(kind),
            selected: false,
        }
    }

    pub fn result(&self) -> &str {
        self.data.result_for(self.kind)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{Node, NodeData, NodeKind, NodePatch, Position};

    #[test]
    fn node_kind_parses_short_and_long_names() -> anyhow::Result<()> {
        assert_eq!("Image".parse::<NodeKind>()?, NodeKind::Image);
        assert_eq!("videoGenerate".parse::<NodeKind>()?, NodeKind::Video);
        assert!("audio".parse::<NodeKind>().is_err());
        Ok(())
    }

    #[test]
    fn node_serializes_kind_as_type() -> anyhow::Result<()> {
        let node = Node::new("4", NodeKind::Video, Position::new(10.0, 20.0));
        let value = serde_json::to_value(&node)?;
        assert_eq!(value["type"], json!("video"));
        assert_eq!(value["data"]["model"], json!("Kling 1.6"));
        assert_eq!(value["data"]["duration_secs"], json!(5));
        assert!(value.get("selected").is_none());

        let parsed: Node = serde_json::from_value(json!({"id": "9", "type": "text"}))?;
        assert_eq!(parsed.kind, NodeKind::Text);
        assert_eq!(parsed.data, NodeData::default());
        Ok(())
    }

    #[test]
    fn patch_merges_options_and_removes_nulls() {
        let mut data = NodeData::defaults_for(NodeKind::Image);
        data.options.insert("seed".to_string(), json!(7));

        let mut options = serde_json::Map::new();
        options.insert("seed".to_string(), serde_json::Value::Null);
        options.insert("quality".to_string(), json!("high"));
        NodePatch {
            ratio: Some("3:2".to_string()),
            options: Some(options),
            ..NodePatch::default()
        }
        .apply(&mut data);

        assert_eq!(data.ratio.as_deref(), Some("3:2"));
        assert!(data.options.get("seed").is_none());
        assert_eq!(data.options["quality"], json!("high"));
        assert_eq!(data.prompt, super::DEFAULT_IMAGE_PROMPT);
    }
}
