use std::time::Instant;

use studio_contracts::events::EventWriter;
use studio_contracts::graph::{Canvas, ExecutionOrder, NodeKind};
use studio_contracts::models::ModelSpec;
use studio_contracts::payload;
use studio_contracts::runs::{FlowReport, NodeOutcome, NodeStatus};
use studio_contracts::{StudioError, StudioResult};
use tracing::{info, warn};
use uuid::Uuid;

use crate::polling::{poll_until, PollState};
use crate::providers::{
    ImageRequest, JobStatus, TextRequest, VideoOutput, VideoProvider, VideoRequest,
};
use crate::{emit, StudioEngine};

/// How a node's prompt is assembled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunMode {
    /// Part of a whole-canvas run; prompts were already propagated.
    Flow,
    /// A single node; text nodes prepend their upstream context.
    Single,
}

/// Polls a client-style job until it yields a URL, fails, or times out.
pub fn wait_for_job(provider: &dyn VideoProvider, job_id: &str) -> StudioResult<String> {
    poll_until(provider.name(), &provider.poll_policy(), |_| {
        match provider.poll(job_id)? {
            JobStatus::Ready(url) => Ok(PollState::Ready(url)),
            JobStatus::Pending(state) => Ok(PollState::Pending(
                state.unwrap_or_else(|| "pending".to_string()),
            )),
            JobStatus::Failed {
                state,
                error,
                details,
            } => {
                let message = error.unwrap_or_else(|| match state {
                    Some(state) => format!("Generation failed ({state})"),
                    None => "Generation failed".to_string(),
                });
                Err(StudioError::job_failed(message, details))
            }
        }
    })
}

/// GPT Image pixel size for a node ratio.
pub(crate) fn gpt_image_size(ratio: Option<&str>) -> &'static str {
    match ratio {
        Some("auto") => "auto",
        Some("3:2") => "1536x1024",
        Some("2:3") => "1024x1536",
        _ => "1024x1024",
    }
}

fn new_run_id() -> String {
    format!("run-{}", Uuid::new_v4().simple())
}

fn combine_context(context: &str, prompt: &str) -> String {
    if context.is_empty() {
        prompt.to_string()
    } else {
        format!("{context}\n\n{prompt}")
    }
}

impl StudioEngine {
    /// Runs every node once, sequentially, in the requested order.
    ///
    /// Prompts are propagated along all edges first and refreshed for each node
    /// right before it executes. A failing node records its error and the run
    /// moves on.
    pub fn run_flow(&self, canvas: &mut Canvas, order: ExecutionOrder) -> StudioResult<FlowReport> {
        let run_id = new_run_id();
        let events = self.events.for_run(run_id.clone());
        let ids = canvas.execution_order(order)?;
        let mut report = FlowReport::new(run_id.clone(), order);
        report.propagated = canvas.propagate_prompts();
        canvas.apply_prompt_locks();
        info!(run_id = %run_id, nodes = ids.len(), order = %order, "flow started");
        emit(
            &events,
            "flow_started",
            payload!(
                "nodes" => ids.len(),
                "edges" => canvas.edges().len(),
                "order" => order.to_string(),
                "propagated" => report.propagated,
            ),
        )?;

        for id in &ids {
            report.propagated += canvas.propagate_into(id);
            canvas.apply_prompt_locks();
            let outcome = self.execute_node(canvas, id, RunMode::Flow, &events)?;
            report.outcomes.push(outcome);
        }

        let completed = report.count(NodeStatus::Completed);
        let skipped = report.count(NodeStatus::Skipped);
        let failed = report.count(NodeStatus::Failed);
        info!(run_id = %run_id, completed, skipped, failed, "flow finished");
        emit(
            &events,
            "flow_finished",
            payload!("completed" => completed, "skipped" => skipped, "failed" => failed),
        )?;
        Ok(report)
    }

    /// Runs one node with whatever its inputs currently hold.
    pub fn run_node(&self, canvas: &mut Canvas, id: &str) -> StudioResult<NodeOutcome> {
        let mut report = self.run_single(canvas, id, ExecutionOrder::default())?;
        report
            .outcomes
            .pop()
            .ok_or_else(|| StudioError::internal(format!("Node '{id}' produced no outcome")))
    }

    pub(crate) fn run_single(
        &self,
        canvas: &mut Canvas,
        id: &str,
        order: ExecutionOrder,
    ) -> StudioResult<FlowReport> {
        canvas.require(id)?;
        let mut report = FlowReport::new(new_run_id(), order);
        let events = self.events.for_run(report.run_id.clone());
        canvas.apply_prompt_locks();
        let outcome = self.execute_node(canvas, id, RunMode::Single, &events)?;
        report.outcomes.push(outcome);
        Ok(report)
    }

    fn execute_node(
        &self,
        canvas: &mut Canvas,
        id: &str,
        mode: RunMode,
        events: &EventWriter,
    ) -> StudioResult<NodeOutcome> {
        let started = Instant::now();
        let kind = canvas.require(id)?.kind;
        let mut outcome = NodeOutcome::new(id, kind, NodeStatus::Completed);

        let gate = match canvas.apply_gating(&self.selector, id) {
            Ok(gate) => gate,
            Err(err) => return self.record_failure(canvas, outcome, err, started, events),
        };
        outcome.model = Some(gate.model.name.clone());
        outcome.gate_reasons = gate.reasons();
        if !outcome.gate_reasons.is_empty() {
            emit(
                events,
                "node_gated",
                payload!(
                    "node_id" => id,
                    "model" => gate.model.name,
                    "ratio" => gate.ratio,
                    "reasons" => outcome.gate_reasons,
                ),
            )?;
        }

        let node = canvas.require(id)?.clone();
        let images = canvas.resolve_context_images(id);
        let videos = match kind {
            NodeKind::Video => canvas.resolve_context_videos(id),
            _ => Vec::new(),
        };
        let prompt = match (mode, kind) {
            (RunMode::Single, NodeKind::Text) => {
                combine_context(&canvas.resolve_context_text(id), &node.data.prompt)
            }
            _ => node.data.prompt.clone(),
        };
        if prompt.trim().is_empty() && images.is_empty() && videos.is_empty() {
            outcome.status = NodeStatus::Skipped;
            outcome.elapsed_ms = started.elapsed().as_millis() as u64;
            emit(
                events,
                "node_skipped",
                payload!("node_id" => id, "reason" => "empty prompt and no inputs"),
            )?;
            return Ok(outcome);
        }

        emit(
            events,
            "node_started",
            payload!(
                "node_id" => id,
                "kind" => kind.as_str(),
                "model" => gate.model.name,
                "provider" => gate.model.provider,
                "images" => images.len(),
                "videos" => videos.len(),
            ),
        )?;

        let result = match kind {
            NodeKind::Text => self
                .text_provider(&gate.model.provider)
                .and_then(|provider| {
                    provider.generate(&TextRequest {
                        prompt,
                        model: gate.model.api_model.clone(),
                        images,
                    })
                })
                .map(|output| output.text),
            NodeKind::Image => {
                let request = image_request(&gate.model, gate.ratio.clone(), prompt, images, &node.data.options);
                self.image_provider(&gate.model.provider)
                    .and_then(|provider| provider.generate(&request))
                    .and_then(|output| {
                        output.into_response().display_url().ok_or_else(|| {
                            StudioError::upstream("Image provider returned no image")
                        })
                    })
            }
            NodeKind::Video => {
                let request = VideoRequest {
                    prompt,
                    model: gate.model.api_model.clone(),
                    ratio: gate.ratio.clone().filter(|ratio| ratio != "auto"),
                    duration_secs: node.data.duration_secs.unwrap_or(5),
                    images,
                    videos,
                    options: node.data.options.clone(),
                };
                self.generate_video_node(canvas, id, &gate.model, &request, events)
            }
        };

        match result {
            Ok(value) => {
                if let Some(node) = canvas.node_mut(id) {
                    match kind {
                        NodeKind::Text => node.data.output = value.clone(),
                        NodeKind::Image => node.data.image_url = value.clone(),
                        NodeKind::Video => node.data.video_url = value.clone(),
                    }
                    node.data.error = None;
                    node.data.job_id = None;
                }
                canvas.apply_prompt_locks();
                outcome.elapsed_ms = started.elapsed().as_millis() as u64;
                info!(node_id = id, kind = kind.as_str(), elapsed_ms = outcome.elapsed_ms, "node completed");
                emit(
                    events,
                    "node_completed",
                    payload!(
                        "node_id" => id,
                        "elapsed_ms" => outcome.elapsed_ms,
                        "result_chars" => value.len(),
                    ),
                )?;
                outcome.result = Some(value);
                Ok(outcome)
            }
            Err(err) => self.record_failure(canvas, outcome, err, started, events),
        }
    }

    fn generate_video_node(
        &self,
        canvas: &mut Canvas,
        id: &str,
        model: &ModelSpec,
        request: &VideoRequest,
        events: &EventWriter,
    ) -> StudioResult<String> {
        let provider = self.video_provider(&model.provider)?;
        match provider.generate(request)? {
            VideoOutput::Url(url) => Ok(url),
            VideoOutput::Job(job_id) => {
                if let Some(node) = canvas.node_mut(id) {
                    node.data.job_id = Some(job_id.clone());
                }
                emit(
                    events,
                    "job_submitted",
                    payload!("node_id" => id, "provider" => provider.name(), "job_id" => job_id),
                )?;
                wait_for_job(provider, &job_id)
            }
        }
    }

    fn record_failure(
        &self,
        canvas: &mut Canvas,
        mut outcome: NodeOutcome,
        err: StudioError,
        started: Instant,
        events: &EventWriter,
    ) -> StudioResult<NodeOutcome> {
        let message = err.to_string();
        if let Some(node) = canvas.node_mut(&outcome.node_id) {
            node.data.error = Some(message.clone());
            node.data.job_id = None;
        }
        outcome.status = NodeStatus::Failed;
        outcome.elapsed_ms = started.elapsed().as_millis() as u64;
        warn!(node_id = %outcome.node_id, error = %message, "node failed");
        emit(
            events,
            "node_failed",
            payload!(
                "node_id" => outcome.node_id,
                "error" => message,
                "status" => err.http_status(),
                "details" => err.details().cloned(),
            ),
        )?;
        outcome.error = Some(message);
        Ok(outcome)
    }
}

fn image_request(
    model: &ModelSpec,
    ratio: Option<String>,
    prompt: String,
    images: Vec<String>,
    options: &serde_json::Map<String, serde_json::Value>,
) -> ImageRequest {
    let size = (model.provider == "openai").then(|| gpt_image_size(ratio.as_deref()).to_string());
    ImageRequest {
        prompt,
        model: model.api_model.clone(),
        ratio,
        size,
        images,
        options: options.clone(),
    }
}
