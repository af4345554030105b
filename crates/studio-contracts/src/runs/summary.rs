use std::path::Path;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::report::{FlowReport, NodeStatus};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowSummary {
    pub run_id: String,
    pub started_at: String,
    pub finished_at: String,
    pub total_nodes: u64,
    pub completed: u64,
    pub skipped: u64,
    pub failed: u64,
    pub failures: Vec<Map<String, Value>>,
}

impl FlowSummary {
    pub fn from_report(report: &FlowReport, started_at: String, finished_at: String) -> Self {
        let failures = report
            .outcomes
            .iter()
            .filter(|outcome| outcome.status == NodeStatus::Failed)
            .map(|outcome| {
                let mut entry = Map::new();
                entry.insert("node_id".to_string(), Value::String(outcome.node_id.clone()));
                entry.insert(
                    "error".to_string(),
                    Value::String(outcome.error.clone().unwrap_or_default()),
                );
                entry
            })
            .collect();
        Self {
            run_id: report.run_id.clone(),
            started_at,
            finished_at,
            total_nodes: report.outcomes.len() as u64,
            completed: report.count(NodeStatus::Completed) as u64,
            skipped: report.count(NodeStatus::Skipped) as u64,
            failed: report.count(NodeStatus::Failed) as u64,
            failures,
        }
    }
}

pub fn write_summary(
    path: &Path,
    summary: &FlowSummary,
    extra: Option<&Map<String, Value>>,
) -> anyhow::Result<()> {
    let mut payload = match serde_json::to_value(summary)? {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    payload.insert("ts".to_string(), Value::String(now_utc_iso()));
    if let Some(extra) = extra {
        for (key, value) in extra {
            payload.insert(key.clone(), value.clone());
        }
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(&Value::Object(payload))?)?;
    Ok(())
}

pub fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}
