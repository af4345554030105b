use serde::{Deserialize, Serialize};

use crate::graph::{ExecutionOrder, NodeKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Completed,
    Skipped,
    Failed,
}

/// What happened to one node during a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeOutcome {
    pub node_id: String,
    pub kind: NodeKind,
    pub status: NodeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub gate_reasons: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub elapsed_ms: u64,
}

impl NodeOutcome {
    pub fn new(node_id: impl Into<String>, kind: NodeKind, status: NodeStatus) -> Self {
        Self {
            node_id: node_id.into(),
            kind,
            status,
            model: None,
            gate_reasons: Vec::new(),
            result: None,
            error: None,
            elapsed_ms: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowReport {
    pub run_id: String,
    pub order: ExecutionOrder,
    pub propagated: usize,
    pub outcomes: Vec<NodeOutcome>,
}

impl FlowReport {
    pub fn new(run_id: impl Into<String>, order: ExecutionOrder) -> Self {
        Self {
            run_id: run_id.into(),
            order,
            propagated: 0,
            outcomes: Vec::new(),
        }
    }

    pub fn count(&self, status: NodeStatus) -> usize {
        self.outcomes
            .iter()
            .filter(|outcome| outcome.status == status)
            .count()
    }

    pub fn has_failures(&self) -> bool {
        self.count(NodeStatus::Failed) > 0
    }
}
