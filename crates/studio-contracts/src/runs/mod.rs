mod report;
mod summary;

pub use report::{FlowReport, NodeOutcome, NodeStatus};
pub use summary::{now_utc_iso, write_summary, FlowSummary};
