mod registry;
mod selectors;

pub use registry::{InputLimits, JobStyle, ModelRegistry, ModelSpec};
pub use selectors::{default_model_name, GateOutcome, MediaCounts, ModelSelector};
