use std::fs;
use std::io::{self, BufRead, ErrorKind, Write};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use studio_contracts::api::DownloadQuery;
use studio_contracts::commands::{help_lines, parse_intent, Intent};
use studio_contracts::graph::{
    edge_id, Canvas, CanvasSnapshot, ExecutionOrder, HandleType, Node, NodeKind, NodePatch,
    Position, BASE_POSITION,
};
use studio_contracts::models::MediaCounts;
use studio_contracts::runs::{FlowReport, NodeOutcome, NodeStatus};
use studio_engine::media::extension_for_mime;
use studio_engine::StudioEngine;

const PREVIEW_CHARS: usize = 60;

/// Interactive canvas editing over slash commands.
pub struct ShellSession {
    engine: StudioEngine,
    canvas: Canvas,
    out_dir: PathBuf,
    order: ExecutionOrder,
}

impl ShellSession {
    pub fn new(engine: StudioEngine, out_dir: impl Into<PathBuf>) -> Self {
        let order = engine.config().execution_order;
        Self {
            engine,
            canvas: Canvas::new(),
            out_dir: out_dir.into(),
            order,
        }
    }

    pub fn with_canvas(mut self, canvas: Canvas) -> Self {
        self.canvas = canvas;
        self
    }

    pub fn canvas(&self) -> &Canvas {
        &self.canvas
    }

    /// Reads commands until EOF; a failing command prints its error and the loop goes on.
    pub fn run_stdio(&mut self) -> Result<()> {
        println!("Studio shell started. Type /help for commands.");
        let stdin = io::stdin();
        let mut line = String::new();
        loop {
            print!("> ");
            io::stdout().flush()?;
            line.clear();
            let read = match stdin.lock().read_line(&mut line) {
                Ok(read) => read,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(err.into()),
            };
            if read == 0 {
                break;
            }
            match self.execute(line.trim_end_matches(['\n', '\r'])) {
                Ok(output) => output.iter().for_each(|text| println!("{text}")),
                Err(err) => println!("Error: {err:#}"),
            }
        }
        Ok(())
    }

    /// Applies one input line and returns what to print.
    pub fn execute(&mut self, input: &str) -> Result<Vec<String>> {
        let intent = parse_intent(input);
        match intent.action.as_str() {
            "noop" => Ok(Vec::new()),
            "help" => Ok(help_lines().into_iter().map(str::to_string).collect()),
            "invalid" => bail!("{}", intent.arg("error").unwrap_or("Invalid command")),
            "unknown" => bail!(
                "Unknown command /{}. Type /help for commands.",
                intent.arg("command").unwrap_or_default()
            ),
            "add_node" => {
                let kind: NodeKind = required(&intent, "kind")?.parse()?;
                let id = self.canvas.add_node(kind, position_arg(&intent)?);
                Ok(vec![format!("Added {kind} node {id}")])
            }
            "connect" => {
                let edge = self
                    .canvas
                    .connect(required(&intent, "source")?, required(&intent, "target")?)?;
                Ok(vec![format!("Connected {edge}")])
            }
            "disconnect" => {
                let edge = match intent.arg("target") {
                    Some(target) => edge_id(required(&intent, "edge")?, target),
                    None => required(&intent, "edge")?.to_string(),
                };
                let removed = self.canvas.disconnect(&edge)?;
                Ok(vec![format!("Removed edge {}", removed.id)])
            }
            "delete_node" => {
                let removed = self.canvas.delete_node(required(&intent, "node")?)?;
                Ok(vec![format!("Deleted {} node {}", removed.kind, removed.id)])
            }
            "duplicate_node" => {
                let id = self.canvas.duplicate_node(required(&intent, "node")?)?;
                Ok(vec![format!("Duplicated into node {id}")])
            }
            "copy_node" => {
                let node = required(&intent, "node")?;
                self.canvas.copy_node(node)?;
                Ok(vec![format!("Copied node {node}")])
            }
            "paste_node" => {
                let position = position_arg(&intent)?.unwrap_or(BASE_POSITION);
                let id = self.canvas.paste_node(position)?;
                Ok(vec![format!("Pasted node {id}")])
            }
            "create_from_connect" => {
                let anchor = required(&intent, "node")?;
                let handle: HandleType = required(&intent, "handle")?.parse()?;
                let kind: NodeKind = required(&intent, "kind")?.parse()?;
                let position = self.canvas.require(anchor)?.position.offset(380.0, 0.0);
                let id = self
                    .canvas
                    .create_from_connect(anchor, handle, kind, position)?;
                Ok(vec![format!("Created {kind} node {id} from node {anchor}")])
            }
            "select_node" => {
                let node = required(&intent, "node")?;
                self.canvas.select_node(node)?;
                Ok(vec![format!("Selected node {node}")])
            }
            "set_prompt" => {
                let node = required(&intent, "node")?;
                self.canvas
                    .update_node_data(node, NodePatch::prompt(required(&intent, "text")?))?;
                Ok(vec![format!("Prompt of node {node} updated")])
            }
            "set_selected_prompt" => {
                let Some(node) = self.canvas.selected().map(|node| node.id.clone()) else {
                    bail!("No node selected. Use /select <node> or a slash command.");
                };
                let prompt = intent.prompt.clone().unwrap_or_default();
                self.canvas.update_node_data(&node, NodePatch::prompt(prompt))?;
                Ok(vec![format!("Prompt of node {node} updated")])
            }
            "set_model" => {
                let node = required(&intent, "node")?;
                let model = required(&intent, "model")?;
                let kind = self.canvas.require(node)?.kind;
                if self.engine.selector().registry.ensure(model, kind).is_none() {
                    bail!("Unknown {kind} model '{model}'");
                }
                let ratio = self.canvas.require(node)?.data.ratio.clone();
                self.engine
                    .selector()
                    .gate(kind, Some(model), ratio.as_deref(), self.canvas.upstream_media_counts(node))
                    .map_err(|reason| anyhow!(reason))?;
                self.canvas.update_node_data(node, NodePatch::model(model))?;
                let gate = self.canvas.apply_gating(self.engine.selector(), node)?;
                let mut lines = vec![format!("Model of node {node} set to {}", gate.model.name)];
                lines.extend(gate.reasons());
                Ok(lines)
            }
            "set_ratio" => {
                let node = required(&intent, "node")?;
                self.canvas
                    .update_node_data(node, NodePatch::ratio(required(&intent, "ratio")?))?;
                let gate = self.canvas.apply_gating(self.engine.selector(), node)?;
                let mut lines = vec![format!(
                    "Ratio of node {node} is {}",
                    gate.ratio.as_deref().unwrap_or("-")
                )];
                lines.extend(gate.reasons());
                Ok(lines)
            }
            "run_flow" => {
                let order = match intent.arg("order") {
                    Some(order) => order.parse()?,
                    None => self.order,
                };
                let report = self.engine.run_flow(&mut self.canvas, order)?;
                Ok(report_lines(&report))
            }
            "run_node" => {
                let outcome = self
                    .engine
                    .run_node(&mut self.canvas, required(&intent, "node")?)?;
                Ok(vec![outcome_line(&outcome)])
            }
            "show" => match intent.arg("node") {
                Some(node) => {
                    let node = self.canvas.require(node)?;
                    Ok(vec![serde_json::to_string_pretty(node)?])
                }
                None => Ok(self.overview()),
            },
            "list_models" => self.list_models(intent.arg("node")),
            "download" => {
                let node = required(&intent, "node")?;
                let path = self.download(node, intent.arg("path").map(PathBuf::from))?;
                Ok(vec![format!("Saved {}", path.display())])
            }
            "save" => {
                let path = PathBuf::from(required(&intent, "path")?);
                save_canvas(&path, &self.canvas)?;
                Ok(vec![format!("Saved canvas to {}", path.display())])
            }
            "load" => {
                let path = PathBuf::from(required(&intent, "path")?);
                self.canvas = load_canvas(&path)?;
                Ok(vec![format!(
                    "Loaded {} node(s) and {} edge(s)",
                    self.canvas.nodes().len(),
                    self.canvas.edges().len()
                )])
            }
            other => bail!("Unhandled action '{other}'"),
        }
    }

    fn overview(&self) -> Vec<String> {
        if self.canvas.nodes().is_empty() {
            return vec!["Canvas is empty. Try /add text".to_string()];
        }
        let mut lines: Vec<String> = self.canvas.nodes().iter().map(node_line).collect();
        lines.extend(
            self.canvas
                .edges()
                .iter()
                .map(|edge| format!("  {} -> {} ({})", edge.source, edge.target, edge.id)),
        );
        lines
    }

    fn list_models(&self, target: Option<&str>) -> Result<Vec<String>> {
        let selector = self.engine.selector();
        let (kinds, counts) = match target {
            None => (NodeKind::ALL.to_vec(), MediaCounts::default()),
            Some(target) => match target.parse::<NodeKind>() {
                Ok(kind) => (vec![kind], MediaCounts::default()),
                Err(_) => {
                    let kind = self.canvas.require(target)?.kind;
                    (vec![kind], self.canvas.upstream_media_counts(target))
                }
            },
        };
        let mut lines = Vec::new();
        for kind in kinds {
            let models = selector.available_models(kind, counts);
            let names: Vec<&str> = models.iter().map(|model| model.name.as_str()).collect();
            lines.push(format!("{kind}: {}", names.join(", ")));
        }
        Ok(lines)
    }

    fn download(&self, node: &str, path: Option<PathBuf>) -> Result<PathBuf> {
        let node = self.canvas.require(node)?;
        let source = node.result();
        if source.is_empty() {
            bail!("Node {} has no result yet", node.id);
        }
        let resource = self.engine.handle_download(&DownloadQuery {
            url: Some(source.to_string()),
            filename: None,
        })?;
        let path = path.unwrap_or_else(|| {
            self.out_dir.join(format!(
                "node-{}.{}",
                node.id,
                extension_for_mime(&resource.content_type)
            ))
        });
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, &resource.body)
            .with_context(|| format!("failed to write {}", path.display()))?;
        Ok(path)
    }
}

fn required<'a>(intent: &'a Intent, key: &str) -> Result<&'a str> {
    intent
        .arg(key)
        .with_context(|| format!("Missing <{key}>"))
}

fn position_arg(intent: &Intent) -> Result<Option<Position>> {
    match (intent.arg("x"), intent.arg("y")) {
        (Some(x), Some(y)) => {
            let x: f64 = x.parse().with_context(|| format!("Invalid x '{x}'"))?;
            let y: f64 = y.parse().with_context(|| format!("Invalid y '{y}'"))?;
            Ok(Some(Position::new(x, y)))
        }
        (None, None) => Ok(None),
        _ => bail!("Give both x and y, or neither"),
    }
}

fn preview(text: &str) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= PREVIEW_CHARS {
        return flat;
    }
    let cut: String = flat.chars().take(PREVIEW_CHARS).collect();
    format!("{cut}...")
}

fn node_line(node: &Node) -> String {
    let lock = if node.data.prompt_locked { " [locked]" } else { "" };
    let selected = if node.selected { "*" } else { " " };
    let result = if node.result().is_empty() {
        String::new()
    } else {
        format!(" => {}", preview(node.result()))
    };
    format!(
        "{selected}{} {} [{}] \"{}\"{lock}{result}",
        node.id,
        node.kind,
        node.data.model.as_deref().unwrap_or("-"),
        preview(&node.data.prompt)
    )
}

pub fn outcome_line(outcome: &NodeOutcome) -> String {
    let status = match outcome.status {
        NodeStatus::Completed => "completed",
        NodeStatus::Skipped => "skipped",
        NodeStatus::Failed => "failed",
    };
    let detail = match (&outcome.error, &outcome.result) {
        (Some(error), _) => format!(": {error}"),
        (None, Some(result)) => format!(" => {}", preview(result)),
        (None, None) => String::new(),
    };
    format!(
        "node {} ({}) {status} in {} ms{detail}",
        outcome.node_id, outcome.kind, outcome.elapsed_ms
    )
}

pub fn report_lines(report: &FlowReport) -> Vec<String> {
    let mut lines: Vec<String> = report.outcomes.iter().map(outcome_line).collect();
    lines.push(format!(
        "Run {}: {} completed, {} skipped, {} failed",
        report.run_id,
        report.count(NodeStatus::Completed),
        report.count(NodeStatus::Skipped),
        report.count(NodeStatus::Failed)
    ));
    lines
}

pub fn save_canvas(path: &Path, canvas: &Canvas) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, serde_json::to_string_pretty(&canvas.snapshot())?)
        .with_context(|| format!("failed to write {}", path.display()))
}

/// Reads a canvas snapshot, or the `canvas` field of a saved run result.
pub fn load_canvas(path: &Path) -> Result<Canvas> {
    let raw = fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    let mut value: serde_json::Value =
        serde_json::from_str(&raw).with_context(|| format!("invalid JSON in {}", path.display()))?;
    if let Some(canvas) = value.get_mut("canvas") {
        value = canvas.take();
    }
    let snapshot: CanvasSnapshot = serde_json::from_value(value)
        .with_context(|| format!("{} is not a canvas snapshot", path.display()))?;
    Ok(Canvas::from_snapshot(snapshot)?)
}
