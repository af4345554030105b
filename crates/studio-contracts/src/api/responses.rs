use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::graph::{CanvasSnapshot, NodeKind};
use crate::models::{GateOutcome, ModelSpec};
use crate::runs::FlowReport;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextResponse {
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ImageResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub b64: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime: Option<String>,
}

impl ImageResponse {
    /// Something a node can display: the URL, or the bytes as a data URL.
    pub fn display_url(&self) -> Option<String> {
        if let Some(url) = self.url.as_deref().filter(|url| !url.is_empty()) {
            return Some(url.to_string());
        }
        let b64 = self.b64.as_deref().filter(|b64| !b64.is_empty())?;
        let mime = self.mime.as_deref().unwrap_or("image/png");
        Some(format!("data:{mime};base64,{b64}"))
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct VideoResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(rename = "jobId", skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
}

/// Body of the job status endpoints. Always served with status 200.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct JobStatusResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub done: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl JobStatusResponse {
    pub fn ready(url: impl Into<String>) -> Self {
        Self {
            done: Some(true),
            url: Some(url.into()),
            ..Self::default()
        }
    }

    pub fn pending(state: Option<String>) -> Self {
        Self {
            done: Some(false),
            state,
            ..Self::default()
        }
    }

    pub fn failed(state: Option<String>, error: Option<String>, details: Option<Value>) -> Self {
        Self {
            failed: Some(true),
            state,
            error,
            details,
            ..Self::default()
        }
    }

    pub fn is_done(&self) -> bool {
        self.done == Some(true)
    }

    pub fn is_failed(&self) -> bool {
        self.failed == Some(true)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelsResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<NodeKind>,
    pub models: Vec<ModelSpec>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gate: Option<GateOutcome>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowRunResponse {
    pub canvas: CanvasSnapshot,
    pub report: FlowReport,
}
