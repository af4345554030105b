use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

use petgraph::algo::toposort;
use petgraph::graph::DiGraph;
use serde::{Deserialize, Serialize};

use super::edge::Edge;
use super::node::{Node, NodeData, NodeKind, NodePatch, Position};
use crate::error::{StudioError, StudioResult};
use crate::models::{GateOutcome, MediaCounts, ModelSelector};

/// Where `add_node` places a block when the caller gives no position.
pub const BASE_POSITION: Position = Position { x: 200.0, y: 100.0 };
const DUPLICATE_X_SHIFT: f64 = 380.0;

/// Which end of the anchor the "turn into" drag started from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HandleType {
    Source,
    Target,
}

impl FromStr for HandleType {
    type Err = StudioError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "source" | "out" | "downstream" => Ok(Self::Source),
            "target" | "in" | "upstream" => Ok(Self::Target),
            other => Err(StudioError::validation(format!(
                "Unknown handle '{other}'. Expected source or target."
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionOrder {
    /// Node array order.
    #[default]
    Insertion,
    Topological,
}

impl fmt::Display for ExecutionOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Insertion => f.write_str("insertion"),
            Self::Topological => f.write_str("topological"),
        }
    }
}

impl FromStr for ExecutionOrder {
    type Err = StudioError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "" | "insertion" => Ok(Self::Insertion),
            "topological" | "topo" => Ok(Self::Topological),
            other => Err(StudioError::validation(format!(
                "Unknown execution order '{other}'. Expected insertion or topological."
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CanvasSnapshot {
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub edges: Vec<Edge>,
}

#[derive(Debug, Clone, PartialEq)]
struct ClipboardEntry {
    kind: NodeKind,
    data: NodeData,
}

/// In-memory pipeline graph for one session.
#[derive(Debug, Clone)]
pub struct Canvas {
    nodes: Vec<Node>,
    edges: Vec<Edge>,
    next_id: u64,
    spawn_counter: u64,
    clipboard: Option<ClipboardEntry>,
}

impl Default for Canvas {
    fn default() -> Self {
        Self::new()
    }
}

impl Canvas {
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            edges: Vec::new(),
            next_id: 1,
            spawn_counter: 0,
            clipboard: None,
        }
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|node| node.id == id)
    }

    pub fn node_mut(&mut self, id: &str) -> Option<&mut Node> {
        self.nodes.iter_mut().find(|node| node.id == id)
    }

    pub fn require(&self, id: &str) -> StudioResult<&Node> {
        self.node(id)
            .ok_or_else(|| StudioError::not_found(format!("Node '{id}' not found")))
    }

    fn require_mut(&mut self, id: &str) -> StudioResult<&mut Node> {
        self.node_mut(id)
            .ok_or_else(|| StudioError::not_found(format!("Node '{id}' not found")))
    }

    pub fn selected(&self) -> Option<&Node> {
        self.nodes.iter().find(|node| node.selected)
    }

    fn allocate_id(&mut self) -> String {
        let id = self.next_id.to_string();
        self.next_id += 1;
        id
    }

    /// Cycling offset so repeated spawns do not stack on one spot.
    pub fn spawn_offset(&mut self) -> (f64, f64) {
        let c = self.spawn_counter;
        self.spawn_counter += 1;
        let dx = 24 + (c % 4) * 12;
        let dy = 16 + ((c / 4) % 4) * 10;
        (dx as f64, dy as f64)
    }

    fn push_node(&mut self, kind: NodeKind, position: Position, data: NodeData) -> String {
        let id = self.allocate_id();
        let mut node = Node::new(id.clone(), kind, position);
        node.data = data;
        self.nodes.push(node);
        id
    }

    pub fn add_node(&mut self, kind: NodeKind, position: Option<Position>) -> String {
        let position = match position {
            Some(position) => position,
            None => {
                let (dx, dy) = self.spawn_offset();
                BASE_POSITION.offset(dx, dy)
            }
        };
        self.push_node(kind, position, NodeData::defaults_for(kind))
    }

    pub fn add_node_at_menu(&mut self, kind: NodeKind, position: Position) -> String {
        let (dx, dy) = self.spawn_offset();
        self.push_node(kind, position.offset(dx, dy), NodeData::defaults_for(kind))
    }

    pub fn update_node_data(&mut self, id: &str, patch: NodePatch) -> StudioResult<()> {
        let node = self.require_mut(id)?;
        if let Some(prompt) = patch.prompt.as_deref() {
            if node.data.prompt_locked && prompt != node.data.prompt {
                let source = node
                    .data
                    .prompt_locked_source_id
                    .clone()
                    .unwrap_or_default();
                return Err(StudioError::validation(format!(
                    "Prompt of node '{id}' is locked to text node '{source}'"
                )));
            }
        }
        patch.apply(&mut node.data);
        self.apply_prompt_locks();
        Ok(())
    }

    pub fn select_node(&mut self, id: &str) -> StudioResult<()> {
        self.require(id)?;
        for node in &mut self.nodes {
            node.selected = node.id == id;
        }
        Ok(())
    }

    pub fn delete_node(&mut self, id: &str) -> StudioResult<Node> {
        let index = self
            .nodes
            .iter()
            .position(|node| node.id == id)
            .ok_or_else(|| StudioError::not_found(format!("Node '{id}' not found")))?;
        let removed = self.nodes.remove(index);
        self.edges.retain(|edge| !edge.touches(id));
        self.apply_prompt_locks();
        Ok(removed)
    }

    pub fn connect(&mut self, source: &str, target: &str) -> StudioResult<String> {
        self.check_edge(source, target)?;
        let edge = Edge::new(source, target);
        let id = edge.id.clone();
        self.edges.push(edge);
        self.apply_prompt_locks();
        Ok(id)
    }

    /// Rules every edge obeys, whether drawn by `connect` or loaded.
    fn check_edge(&self, source: &str, target: &str) -> StudioResult<()> {
        if source == target {
            return Err(StudioError::validation("A node cannot connect to itself"));
        }
        let source_kind = self.require(source)?.kind;
        let target_kind = self.require(target)?.kind;
        if self
            .edges
            .iter()
            .any(|edge| edge.source == source && edge.target == target)
        {
            return Err(StudioError::validation(format!(
                "Nodes '{source}' and '{target}' are already connected"
            )));
        }
        if source_kind == NodeKind::Text && target_kind.is_media() {
            if let Some(existing) = self.prompt_source_of(target) {
                return Err(StudioError::validation(format!(
                    "Node '{target}' already takes its prompt from text node '{existing}'"
                )));
            }
        }
        Ok(())
    }

    pub fn disconnect(&mut self, edge_id: &str) -> StudioResult<Edge> {
        let index = self
            .edges
            .iter()
            .position(|edge| edge.id == edge_id)
            .ok_or_else(|| StudioError::not_found(format!("Edge '{edge_id}' not found")))?;
        let removed = self.edges.remove(index);
        self.apply_prompt_locks();
        Ok(removed)
    }

    pub fn duplicate_node(&mut self, id: &str) -> StudioResult<String> {
        let (kind, position, data) = {
            let node = self.require(id)?;
            (node.kind, node.position, node.data.clone())
        };
        let (dx, dy) = self.spawn_offset();
        let new_id = self.push_node(kind, position.offset(DUPLICATE_X_SHIFT + dx, dy), data);
        self.apply_prompt_locks();
        Ok(new_id)
    }

    pub fn copy_node(&mut self, id: &str) -> StudioResult<()> {
        let node = self.require(id)?;
        self.clipboard = Some(ClipboardEntry {
            kind: node.kind,
            data: node.data.clone(),
        });
        Ok(())
    }

    pub fn paste_node(&mut self, position: Position) -> StudioResult<String> {
        let entry = self
            .clipboard
            .clone()
            .ok_or_else(|| StudioError::validation("Clipboard is empty"))?;
        let id = self.push_node(entry.kind, position, entry.data);
        self.apply_prompt_locks();
        Ok(id)
    }

    /// Creates a block next to `anchor` and wires it downstream (source
    /// handle) or upstream (target handle) of the anchor.
    pub fn create_from_connect(
        &mut self,
        anchor: &str,
        handle: HandleType,
        kind: NodeKind,
        position: Position,
    ) -> StudioResult<String> {
        self.require(anchor)?;
        let new_id = self.add_node_at_menu(kind, position);
        let wired = match handle {
            HandleType::Source => self.connect(anchor, &new_id),
            HandleType::Target => self.connect(&new_id, anchor),
        };
        if let Err(err) = wired {
            self.nodes.retain(|node| node.id != new_id);
            return Err(err);
        }
        Ok(new_id)
    }

    fn incoming(&self, id: &str) -> impl Iterator<Item = &Node> + '_ {
        let id = id.to_string();
        self.edges
            .iter()
            .filter(move |edge| edge.target == id)
            .filter_map(|edge| self.node(&edge.source))
    }

    fn incoming_results(&self, id: &str, kind: NodeKind) -> Vec<String> {
        self.incoming(id)
            .filter(|node| node.kind == kind)
            .map(|node| node.result().to_string())
            .filter(|value| !value.is_empty())
            .collect()
    }

    /// Non-empty upstream text outputs in edge order, joined by a blank line.
    pub fn resolve_context_text(&self, id: &str) -> String {
        self.incoming_results(id, NodeKind::Text).join("\n\n")
    }

    pub fn resolve_context_images(&self, id: &str) -> Vec<String> {
        self.incoming_results(id, NodeKind::Image)
    }

    pub fn resolve_context_videos(&self, id: &str) -> Vec<String> {
        self.incoming_results(id, NodeKind::Video)
    }

    pub fn upstream_media_counts(&self, id: &str) -> MediaCounts {
        let mut counts = MediaCounts::default();
        for node in self.incoming(id) {
            match node.kind {
                NodeKind::Image => counts.images += 1,
                NodeKind::Video => counts.videos += 1,
                NodeKind::Text => {}
            }
        }
        counts
    }

    /// First text node (edge order) feeding `target`.
    pub fn prompt_source_of(&self, target: &str) -> Option<String> {
        self.incoming(target)
            .find(|node| node.kind == NodeKind::Text)
            .map(|node| node.id.clone())
    }

    /// Locks every media prompt fed by a text node to that node's output and
    /// unlocks the rest. Returns how many nodes changed.
    pub fn apply_prompt_locks(&mut self) -> usize {
        let mut updates = Vec::new();
        for node in self.nodes.iter().filter(|node| node.kind.is_media()) {
            match self.prompt_source_of(&node.id) {
                Some(source_id) => {
                    let output = self
                        .node(&source_id)
                        .map(|source| source.data.output.clone())
                        .unwrap_or_default();
                    let data = &node.data;
                    if !data.prompt_locked
                        || data.prompt != output
                        || data.prompt_locked_source_id.as_deref() != Some(source_id.as_str())
                    {
                        updates.push((node.id.clone(), Some((source_id, output))));
                    }
                }
                None => {
                    if node.data.prompt_locked {
                        updates.push((node.id.clone(), None));
                    }
                }
            }
        }

        let changed = updates.len();
        for (id, lock) in updates {
            let Some(node) = self.node_mut(&id) else {
                continue;
            };
            match lock {
                Some((source_id, output)) => {
                    node.data.prompt = output;
                    node.data.prompt_locked = true;
                    node.data.prompt_locked_source_id = Some(source_id);
                }
                None => {
                    node.data.prompt_locked = false;
                    node.data.prompt_locked_source_id = None;
                }
            }
        }
        changed
    }

    /// Copies every non-empty source output into its target's prompt, in edge
    /// order. Returns how many prompts were written.
    pub fn propagate_prompts(&mut self) -> usize {
        let edges = self.edges.clone();
        edges
            .iter()
            .filter(|edge| self.propagate_edge(edge))
            .count()
    }

    /// Same as `propagate_prompts` restricted to the edges entering `id`.
    pub fn propagate_into(&mut self, id: &str) -> usize {
        let edges: Vec<Edge> = self
            .edges
            .iter()
            .filter(|edge| edge.target == id)
            .cloned()
            .collect();
        edges
            .iter()
            .filter(|edge| self.propagate_edge(edge))
            .count()
    }

    fn propagate_edge(&mut self, edge: &Edge) -> bool {
        let output = match self.node(&edge.source) {
            Some(source) if !source.data.output.is_empty() => source.data.output.clone(),
            _ => return false,
        };
        match self.node_mut(&edge.target) {
            Some(target) => {
                target.data.prompt = output;
                true
            }
            None => false,
        }
    }

    pub fn execution_order(&self, order: ExecutionOrder) -> StudioResult<Vec<String>> {
        match order {
            ExecutionOrder::Insertion => Ok(self.nodes.iter().map(|node| node.id.clone()).collect()),
            ExecutionOrder::Topological => {
                let mut graph: DiGraph<&str, ()> = DiGraph::new();
                let mut indices = HashMap::new();
                for node in &self.nodes {
                    indices.insert(node.id.as_str(), graph.add_node(node.id.as_str()));
                }
                for edge in &self.edges {
                    let (Some(from), Some(to)) = (
                        indices.get(edge.source.as_str()),
                        indices.get(edge.target.as_str()),
                    ) else {
                        continue;
                    };
                    graph.add_edge(*from, *to, ());
                }
                let sorted = toposort(&graph, None).map_err(|cycle| {
                    StudioError::validation(format!(
                        "Graph has a cycle through node '{}'",
                        graph[cycle.node_id()]
                    ))
                })?;
                Ok(sorted
                    .into_iter()
                    .map(|index| graph[index].to_string())
                    .collect())
            }
        }
    }

    /// Resolves the node's model/ratio against its current inputs and writes
    /// back any reset.
    pub fn apply_gating(&mut self, selector: &ModelSelector, id: &str) -> StudioResult<GateOutcome> {
        let counts = self.upstream_media_counts(id);
        let node = self.require_mut(id)?;
        let outcome = selector
            .gate(
                node.kind,
                node.data.model.as_deref(),
                node.data.ratio.as_deref(),
                counts,
            )
            .map_err(StudioError::Validation)?;
        node.data.model = Some(outcome.model.name.clone());
        if node.kind.is_media() {
            node.data.ratio = outcome.ratio.clone();
        }
        Ok(outcome)
    }

    pub fn snapshot(&self) -> CanvasSnapshot {
        CanvasSnapshot {
            nodes: self.nodes.clone(),
            edges: self.edges.clone(),
        }
    }

    pub fn from_snapshot(snapshot: CanvasSnapshot) -> StudioResult<Self> {
        let mut seen = HashSet::new();
        for node in &snapshot.nodes {
            if !seen.insert(node.id.as_str()) {
                return Err(StudioError::validation(format!(
                    "Duplicate node id '{}'",
                    node.id
                )));
            }
        }
        let mut canvas = Self::new();
        canvas.next_id = snapshot
            .nodes
            .iter()
            .filter_map(|node| node.id.parse::<u64>().ok())
            .max()
            .map_or(1, |max| max + 1);
        canvas.nodes = snapshot.nodes;

        for edge in snapshot.edges {
            if canvas.edges.iter().any(|existing| existing.id == edge.id) {
                return Err(StudioError::validation(format!(
                    "Duplicate edge '{}'",
                    edge.id
                )));
            }
            canvas.check_edge(&edge.source, &edge.target)?;
            canvas.edges.push(edge);
        }
        canvas.apply_prompt_locks();
        Ok(canvas)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::edge_id;
    use crate::graph::node::{DEFAULT_IMAGE_PROMPT, DEFAULT_TEXT_PROMPT, DEFAULT_VIDEO_PROMPT};

    fn text_with_output(canvas: &mut Canvas, output: &str) -> anyhow::Result<String> {
        let id = canvas.add_node(NodeKind::Text, None);
        canvas.update_node_data(
            &id,
            NodePatch {
                output: Some(output.to_string()),
                ..NodePatch::default()
            },
        )?;
        Ok(id)
    }

    #[test]
    fn ids_increase_and_spawn_offsets_cycle() {
        let mut canvas = Canvas::new();
        let offsets: Vec<(f64, f64)> = (0..6).map(|_| canvas.spawn_offset()).collect();
        assert_eq!(
            offsets,
            vec![
                (24.0, 16.0),
                (36.0, 16.0),
                (48.0, 16.0),
                (60.0, 16.0),
                (24.0, 26.0),
                (36.0, 26.0)
            ]
        );

        let first = canvas.add_node(NodeKind::Text, Some(Position::new(1.0, 2.0)));
        let second = canvas.add_node_at_menu(NodeKind::Image, Position::new(100.0, 100.0));
        assert_eq!(first, "1");
        assert_eq!(second, "2");
        assert_eq!(canvas.require("1").map(|n| n.position).ok(), Some(Position::new(1.0, 2.0)));
        assert_eq!(
            canvas.require("2").map(|n| n.position).ok(),
            Some(Position::new(148.0, 126.0))
        );
    }

    #[test]
    fn connecting_text_to_media_locks_prompt_to_source_output() -> anyhow::Result<()> {
        let mut canvas = Canvas::new();
        let text = text_with_output(&mut canvas, "a red fox")?;
        let image = canvas.add_node(NodeKind::Image, None);

        canvas.connect(&text, &image)?;
        let data = &canvas.require(&image)?.data;
        assert!(data.prompt_locked);
        assert_eq!(data.prompt_locked_source_id.as_deref(), Some(text.as_str()));
        assert_eq!(data.prompt, "a red fox");

        let err = canvas
            .update_node_data(&image, NodePatch::prompt("something else"))
            .err();
        assert!(matches!(err, Some(StudioError::Validation(_))));

        canvas.disconnect(&edge_id(&text, &image))?;
        let data = &canvas.require(&image)?.data;
        assert!(!data.prompt_locked);
        assert!(data.prompt_locked_source_id.is_none());
        canvas.update_node_data(&image, NodePatch::prompt("free again"))?;
        Ok(())
    }

    #[test]
    fn locked_prompt_follows_later_source_output_changes() -> anyhow::Result<()> {
        let mut canvas = Canvas::new();
        let text = text_with_output(&mut canvas, "")?;
        let image = canvas.add_node(NodeKind::Image, None);
        canvas.connect(&text, &image)?;
        assert_eq!(canvas.require(&image)?.data.prompt, "");

        canvas.update_node_data(
            &text,
            NodePatch {
                output: Some("new output".to_string()),
                ..NodePatch::default()
            },
        )?;
        let data = &canvas.require(&image)?.data;
        assert!(data.prompt_locked);
        assert_eq!(data.prompt, "new output");
        Ok(())
    }

    #[test]
    fn only_one_text_prompt_link_per_media_target() -> anyhow::Result<()> {
        let mut canvas = Canvas::new();
        let first = text_with_output(&mut canvas, "one")?;
        let second = text_with_output(&mut canvas, "two")?;
        let video = canvas.add_node(NodeKind::Video, None);

        canvas.connect(&first, &video)?;
        let err = canvas.connect(&second, &video).err();
        assert!(matches!(err, Some(StudioError::Validation(_))));
        assert_eq!(canvas.edges().len(), 1);

        // Text into text is context, not a prompt lock.
        let sink = canvas.add_node(NodeKind::Text, None);
        canvas.connect(&first, &sink)?;
        canvas.connect(&second, &sink)?;
        assert!(!canvas.require(&sink)?.data.prompt_locked);
        Ok(())
    }

    #[test]
    fn connect_rejects_self_loops_duplicates_and_unknown_nodes() {
        let mut canvas = Canvas::new();
        let a = canvas.add_node(NodeKind::Image, None);
        let b = canvas.add_node(NodeKind::Video, None);

        assert!(matches!(
            canvas.connect(&a, &a),
            Err(StudioError::Validation(_))
        ));
        assert!(canvas.connect(&a, &b).is_ok());
        assert!(matches!(
            canvas.connect(&a, &b),
            Err(StudioError::Validation(_))
        ));
        assert!(matches!(
            canvas.connect(&a, "missing"),
            Err(StudioError::NotFound(_))
        ));
    }

    #[test]
    fn deleting_a_node_drops_its_edges_and_unlocks_targets() -> anyhow::Result<()> {
        let mut canvas = Canvas::new();
        let text = text_with_output(&mut canvas, "prompt")?;
        let image = canvas.add_node(NodeKind::Image, None);
        let video = canvas.add_node(NodeKind::Video, None);
        canvas.connect(&text, &image)?;
        canvas.connect(&image, &video)?;

        canvas.delete_node(&text)?;
        assert_eq!(canvas.edges().len(), 1);
        assert!(!canvas.require(&image)?.data.prompt_locked);
        assert!(canvas.delete_node(&text).is_err());
        Ok(())
    }

    #[test]
    fn context_resolution_follows_edge_order() -> anyhow::Result<()> {
        let mut canvas = Canvas::new();
        let a = text_with_output(&mut canvas, "first")?;
        let empty = text_with_output(&mut canvas, "")?;
        let b = text_with_output(&mut canvas, "second")?;
        let image = canvas.add_node(NodeKind::Image, None);
        canvas.update_node_data(
            &image,
            NodePatch {
                image_url: Some("https://cdn.example/fern.png".to_string()),
                ..NodePatch::default()
            },
        )?;
        let target = canvas.add_node(NodeKind::Text, None);

        canvas.connect(&b, &target)?;
        canvas.connect(&empty, &target)?;
        canvas.connect(&a, &target)?;
        canvas.connect(&image, &target)?;

        assert_eq!(canvas.resolve_context_text(&target), "second\n\nfirst");
        assert_eq!(
            canvas.resolve_context_images(&target),
            vec!["https://cdn.example/fern.png".to_string()]
        );
        assert!(canvas.resolve_context_videos(&target).is_empty());
        assert_eq!(
            canvas.upstream_media_counts(&target),
            MediaCounts {
                images: 1,
                videos: 0
            }
        );
        Ok(())
    }

    #[test]
    fn propagation_copies_non_empty_outputs_in_edge_order() -> anyhow::Result<()> {
        let mut canvas = Canvas::new();
        let text = text_with_output(&mut canvas, "")?;
        let sink = canvas.add_node(NodeKind::Text, None);
        canvas.connect(&text, &sink)?;

        assert_eq!(canvas.propagate_prompts(), 0);

        canvas.update_node_data(
            &text,
            NodePatch {
                output: Some("moss on stone".to_string()),
                ..NodePatch::default()
            },
        )?;
        // Text targets are not locked; only propagation writes their prompt.
        assert_eq!(canvas.require(&sink)?.data.prompt, DEFAULT_TEXT_PROMPT);
        assert_eq!(canvas.propagate_into(&sink), 1);
        assert_eq!(canvas.require(&sink)?.data.prompt, "moss on stone");
        Ok(())
    }

    #[test]
    fn duplicate_and_paste_clone_kind_and_data() -> anyhow::Result<()> {
        let mut canvas = Canvas::new();
        assert!(matches!(
            canvas.paste_node(Position::default()),
            Err(StudioError::Validation(_))
        ));

        let image = canvas.add_node(NodeKind::Image, Some(Position::new(0.0, 0.0)));
        canvas.update_node_data(&image, NodePatch::ratio("3:2"))?;

        let copy = canvas.duplicate_node(&image)?;
        let node = canvas.require(&copy)?;
        assert_eq!(node.kind, NodeKind::Image);
        assert_eq!(node.data.ratio.as_deref(), Some("3:2"));
        assert_eq!(node.position, Position::new(404.0, 16.0));

        canvas.copy_node(&image)?;
        let pasted = canvas.paste_node(Position::new(7.0, 8.0))?;
        assert_eq!(canvas.require(&pasted)?.position, Position::new(7.0, 8.0));
        assert_eq!(canvas.require(&pasted)?.data.prompt, DEFAULT_IMAGE_PROMPT);
        Ok(())
    }

    #[test]
    fn create_from_connect_wires_by_handle() -> anyhow::Result<()> {
        let mut canvas = Canvas::new();
        let anchor = canvas.add_node(NodeKind::Image, None);

        let downstream =
            canvas.create_from_connect(&anchor, HandleType::Source, NodeKind::Video, Position::default())?;
        assert!(canvas
            .edges()
            .iter()
            .any(|edge| edge.source == anchor && edge.target == downstream));

        let upstream =
            canvas.create_from_connect(&anchor, HandleType::Target, NodeKind::Text, Position::default())?;
        assert!(canvas.require(&anchor)?.data.prompt_locked);
        assert_eq!(
            canvas.require(&anchor)?.data.prompt_locked_source_id.as_deref(),
            Some(upstream.as_str())
        );

        let before = canvas.nodes().len();
        let err = canvas
            .create_from_connect(&anchor, HandleType::Target, NodeKind::Text, Position::default())
            .err();
        assert!(matches!(err, Some(StudioError::Validation(_))));
        assert_eq!(canvas.nodes().len(), before);
        Ok(())
    }

    #[test]
    fn topological_order_differs_from_insertion_and_detects_cycles() -> anyhow::Result<()> {
        let mut canvas = Canvas::new();
        let video = canvas.add_node(NodeKind::Video, None);
        let text = canvas.add_node(NodeKind::Text, None);
        canvas.connect(&text, &video)?;

        assert_eq!(
            canvas.execution_order(ExecutionOrder::Insertion)?,
            vec![video.clone(), text.clone()]
        );
        assert_eq!(
            canvas.execution_order(ExecutionOrder::Topological)?,
            vec![text.clone(), video.clone()]
        );

        let image = canvas.add_node(NodeKind::Image, None);
        canvas.connect(&video, &image)?;
        canvas.connect(&image, &text)?;
        assert!(matches!(
            canvas.execution_order(ExecutionOrder::Topological),
            Err(StudioError::Validation(_))
        ));
        Ok(())
    }

    #[test]
    fn snapshot_round_trip_resumes_ids_and_reapplies_locks() -> anyhow::Result<()> {
        let mut canvas = Canvas::new();
        let text = text_with_output(&mut canvas, "ocean")?;
        let video = canvas.add_node(NodeKind::Video, None);
        canvas.connect(&text, &video)?;

        let json = serde_json::to_string(&canvas.snapshot())?;
        let mut snapshot: CanvasSnapshot = serde_json::from_str(&json)?;
        snapshot.nodes[1].data.prompt_locked = false;
        snapshot.nodes[1].data.prompt = DEFAULT_VIDEO_PROMPT.to_string();

        let mut restored = Canvas::from_snapshot(snapshot)?;
        assert!(restored.require(&video)?.data.prompt_locked);
        assert_eq!(restored.require(&video)?.data.prompt, "ocean");
        assert_eq!(restored.add_node(NodeKind::Image, None), "3");
        Ok(())
    }

    #[test]
    fn snapshot_with_dangling_edge_is_rejected() {
        let snapshot = CanvasSnapshot {
            nodes: vec![Node::new("1", NodeKind::Text, Position::default())],
            edges: vec![Edge::new("1", "2")],
        };
        assert!(matches!(
            Canvas::from_snapshot(snapshot),
            Err(StudioError::NotFound(_))
        ));
    }

    #[test]
    fn snapshot_edges_obey_connect_rules() {
        let nodes = vec![
            Node::new("1", NodeKind::Text, Position::default()),
            Node::new("2", NodeKind::Text, Position::default()),
            Node::new("3", NodeKind::Image, Position::default()),
        ];
        let two_prompt_links = CanvasSnapshot {
            nodes: nodes.clone(),
            edges: vec![Edge::new("1", "3"), Edge::new("2", "3")],
        };
        assert!(matches!(
            Canvas::from_snapshot(two_prompt_links),
            Err(StudioError::Validation(_))
        ));

        let self_loop = CanvasSnapshot {
            nodes: nodes.clone(),
            edges: vec![Edge::new("1", "3"), Edge::new("3", "3")],
        };
        assert!(matches!(
            Canvas::from_snapshot(self_loop),
            Err(StudioError::Validation(_))
        ));

        let duplicate_pair = CanvasSnapshot {
            nodes,
            edges: vec![
                Edge::new("1", "3"),
                Edge {
                    id: "again".to_string(),
                    source: "1".to_string(),
                    target: "3".to_string(),
                },
            ],
        };
        assert!(matches!(
            Canvas::from_snapshot(duplicate_pair),
            Err(StudioError::Validation(_))
        ));
    }

    #[test]
    fn select_is_exclusive() -> anyhow::Result<()> {
        let mut canvas = Canvas::new();
        let a = canvas.add_node(NodeKind::Text, None);
        let b = canvas.add_node(NodeKind::Image, None);
        canvas.select_node(&a)?;
        canvas.select_node(&b)?;
        assert_eq!(canvas.selected().map(|node| node.id.clone()), Some(b));
        assert_eq!(canvas.nodes().iter().filter(|node| node.selected).count(), 1);
        Ok(())
    }
}
