mod canvas;
mod edge;
mod node;

pub use canvas::{Canvas, CanvasSnapshot, ExecutionOrder, HandleType, BASE_POSITION};
pub use edge::{edge_id, Edge};
pub use node::{
    Node, NodeData, NodeKind, NodePatch, Position, DEFAULT_IMAGE_PROMPT, DEFAULT_TEXT_PROMPT,
    DEFAULT_VIDEO_DURATION_SECS, DEFAULT_VIDEO_PROMPT,
};
