pub mod api;
pub mod commands;
pub mod error;
pub mod events;
pub mod graph;
pub mod models;
pub mod providers;
pub mod runs;

pub use error::{StudioError, StudioResult};
