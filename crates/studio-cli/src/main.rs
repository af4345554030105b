mod server;
mod shell;

use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::{json, Map, Value};
use studio_contracts::api::{FlowRunResponse, ModelsQuery};
use studio_contracts::graph::ExecutionOrder;
use studio_contracts::runs::{now_utc_iso, write_summary, FlowSummary};
use studio_engine::{StudioConfig, StudioEngine};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::server::AppState;
use crate::shell::{load_canvas, report_lines, ShellSession};

#[derive(Debug, Parser)]
#[command(name = "studio-rs", version, about = "Node-based generative studio")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Serve the HTTP API.
    Serve(ServeArgs),
    /// Execute a saved canvas once and write the results.
    Run(RunArgs),
    /// Edit and run a canvas interactively.
    Shell(ShellArgs),
    /// List catalog models, optionally gated by input counts.
    Models(ModelsArgs),
}

#[derive(Debug, Parser)]
struct ServeArgs {
    #[arg(long)]
    bind: Option<SocketAddr>,
    #[arg(long)]
    events: Option<PathBuf>,
    #[arg(long)]
    dryrun: bool,
}

#[derive(Debug, Parser)]
struct RunArgs {
    #[arg(long)]
    flow: PathBuf,
    #[arg(long)]
    out: PathBuf,
    #[arg(long)]
    order: Option<ExecutionOrder>,
    #[arg(long)]
    events: Option<PathBuf>,
    #[arg(long)]
    dryrun: bool,
}

#[derive(Debug, Parser)]
struct ShellArgs {
    #[arg(long)]
    out: PathBuf,
    #[arg(long)]
    flow: Option<PathBuf>,
    #[arg(long)]
    events: Option<PathBuf>,
    #[arg(long)]
    dryrun: bool,
}

#[derive(Debug, Parser)]
struct ModelsArgs {
    #[arg(long)]
    kind: Option<String>,
    #[arg(long, default_value_t = 0)]
    images: usize,
    #[arg(long, default_value_t = 0)]
    videos: usize,
    #[arg(long)]
    model: Option<String>,
    #[arg(long)]
    ratio: Option<String>,
}

fn main() {
    init_tracing();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("studio-rs error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Serve(args) => run_serve(args),
        Command::Run(args) => run_flow_file(args),
        Command::Shell(args) => run_shell(args),
        Command::Models(args) => run_models(args),
    }
}

fn load_config(events: Option<PathBuf>, dryrun: bool) -> Result<StudioConfig> {
    let mut config = StudioConfig::from_env().context("invalid STUDIO_* environment")?;
    if events.is_some() {
        config.events_path = events;
    }
    config.dryrun |= dryrun;
    Ok(config)
}

fn run_serve(args: ServeArgs) -> Result<i32> {
    let mut config = load_config(args.events, args.dryrun)?;
    if let Some(bind) = args.bind {
        config.bind = bind;
    }
    let bind = config.bind;
    // The blocking HTTP client has to be built outside the async runtime.
    let engine = StudioEngine::new(config)?;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start the async runtime")?;
    runtime.block_on(server::serve(AppState::new(engine), bind))?;
    Ok(0)
}

fn run_flow_file(args: RunArgs) -> Result<i32> {
    fs::create_dir_all(&args.out)
        .with_context(|| format!("failed to create {}", args.out.display()))?;
    let events_path = args
        .events
        .clone()
        .unwrap_or_else(|| args.out.join("events.jsonl"));
    let config = load_config(Some(events_path), args.dryrun)?;
    let order = args.order.unwrap_or(config.execution_order);
    let engine = StudioEngine::new(config)?;

    let mut canvas = load_canvas(&args.flow)?;
    let started_at = now_utc_iso();
    let report = engine.run_flow(&mut canvas, order)?;
    let finished_at = now_utc_iso();
    for line in report_lines(&report) {
        println!("{line}");
    }

    let result = FlowRunResponse {
        canvas: canvas.snapshot(),
        report,
    };
    write_json(&args.out.join("flow.json"), &serde_json::to_value(&result)?)?;
    let summary = FlowSummary::from_report(&result.report, started_at, finished_at);
    let mut extra = Map::new();
    extra.insert("order".to_string(), json!(order.to_string()));
    extra.insert(
        "flow".to_string(),
        Value::String(args.flow.to_string_lossy().to_string()),
    );
    write_summary(&args.out.join("summary.json"), &summary, Some(&extra))?;
    info!(run_id = %result.report.run_id, out = %args.out.display(), "run written");
    Ok(if result.report.has_failures() { 2 } else { 0 })
}

fn run_shell(args: ShellArgs) -> Result<i32> {
    let events_path = args
        .events
        .clone()
        .unwrap_or_else(|| args.out.join("events.jsonl"));
    let config = load_config(Some(events_path), args.dryrun)?;
    let mut session = ShellSession::new(StudioEngine::new(config)?, &args.out);
    if let Some(flow) = &args.flow {
        session = session.with_canvas(load_canvas(flow)?);
    }
    session.run_stdio()?;
    Ok(0)
}

fn run_models(args: ModelsArgs) -> Result<i32> {
    let engine = StudioEngine::new(load_config(None, false)?)?;
    let response = engine.handle_models(&ModelsQuery {
        kind: args.kind,
        images: args.images,
        videos: args.videos,
        model: args.model,
        ratio: args.ratio,
    })?;
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(0)
}

fn write_json(path: &Path, value: &Value) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, serde_json::to_string_pretty(value)?)
        .with_context(|| format!("failed to write {}", path.display()))
}

#[cfg(test)]
mod tests {
    use studio_contracts::graph::{Canvas, NodeKind, NodePatch};

    use super::*;
    use crate::shell::save_canvas;

    #[test]
    fn run_writes_flow_summary_and_events() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let flow = temp.path().join("canvas.json");
        let mut canvas = Canvas::new();
        let text = canvas.add_node(NodeKind::Text, None);
        let image = canvas.add_node(NodeKind::Image, None);
        canvas.connect(&text, &image)?;
        canvas.update_node_data(&text, NodePatch::prompt("lanterns"))?;
        save_canvas(&flow, &canvas)?;

        let out = temp.path().join("out");
        let code = run_flow_file(RunArgs {
            flow: flow.clone(),
            out: out.clone(),
            order: Some(ExecutionOrder::Topological),
            events: None,
            dryrun: true,
        })?;
        assert_eq!(code, 0);

        let result: FlowRunResponse =
            serde_json::from_str(&fs::read_to_string(out.join("flow.json"))?)?;
        assert_eq!(result.report.order, ExecutionOrder::Topological);
        assert_eq!(result.report.outcomes.len(), 2);

        let summary: Value = serde_json::from_str(&fs::read_to_string(out.join("summary.json"))?)?;
        assert_eq!(summary["completed"], json!(2));
        assert_eq!(summary["order"], json!("topological"));

        let events = fs::read_to_string(out.join("events.jsonl"))?;
        let types: Vec<String> = events
            .lines()
            .filter_map(|line| serde_json::from_str::<Value>(line).ok())
            .filter_map(|event| event["type"].as_str().map(str::to_string))
            .collect();
        assert_eq!(types.first().map(String::as_str), Some("flow_started"));
        assert_eq!(types.last().map(String::as_str), Some("flow_finished"));

        // A saved run result loads back as a canvas.
        let reloaded = load_canvas(&out.join("flow.json"))?;
        assert!(!reloaded.require(&image)?.data.image_url.is_empty());
        Ok(())
    }

    #[test]
    fn cli_parses_run_order() {
        let cli = Cli::try_parse_from([
            "studio-rs",
            "run",
            "--flow",
            "canvas.json",
            "--out",
            "out",
            "--order",
            "topological",
        ]);
        let Ok(Cli {
            command: Command::Run(args),
        }) = cli
        else {
            panic!("run subcommand did not parse");
        };
        assert_eq!(args.order, Some(ExecutionOrder::Topological));
        assert!(!args.dryrun);
    }
}
