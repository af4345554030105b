use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde_json::{Map, Value};

use crate::runs::now_utc_iso;

pub type EventPayload = Map<String, Value>;

#[derive(Debug)]
enum EventSink {
    File(PathBuf),
    Memory(Vec<Value>),
    Discard,
}

/// Append-only run event log.
///
/// - default fields are `type`, `run_id`, `ts`
/// - caller payload is merged last and can override defaults
/// - file sinks get one compact JSON object per line
#[derive(Debug, Clone)]
pub struct EventWriter {
    inner: Arc<EventWriterInner>,
}

#[derive(Debug)]
struct EventWriterInner {
    run_id: String,
    sink: Arc<Mutex<EventSink>>,
}

impl EventWriter {
    pub fn new(path: impl Into<PathBuf>, run_id: impl Into<String>) -> Self {
        Self::with_sink(EventSink::File(path.into()), run_id)
    }

    /// Keeps events in memory; read them back with `events()`.
    pub fn in_memory(run_id: impl Into<String>) -> Self {
        Self::with_sink(EventSink::Memory(Vec::new()), run_id)
    }

    pub fn discard(run_id: impl Into<String>) -> Self {
        Self::with_sink(EventSink::Discard, run_id)
    }

    fn with_sink(sink: EventSink, run_id: impl Into<String>) -> Self {
        Self::sharing(Arc::new(Mutex::new(sink)), run_id)
    }

    fn sharing(sink: Arc<Mutex<EventSink>>, run_id: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(EventWriterInner {
                run_id: run_id.into(),
                sink,
            }),
        }
    }

    pub fn path(&self) -> Option<PathBuf> {
        let sink = self.inner.sink.lock().ok()?;
        match &*sink {
            EventSink::File(path) => Some(path.clone()),
            _ => None,
        }
    }

    pub fn run_id(&self) -> &str {
        &self.inner.run_id
    }

    /// Same sink, different run id.
    pub fn for_run(&self, run_id: impl Into<String>) -> Self {
        Self::sharing(Arc::clone(&self.inner.sink), run_id)
    }

    pub fn events(&self) -> Vec<Value> {
        match self.inner.sink.lock() {
            Ok(sink) => match &*sink {
                EventSink::Memory(events) => events.clone(),
                _ => Vec::new(),
            },
            Err(_) => Vec::new(),
        }
    }

    pub fn emit(&self, event_type: &str, payload: EventPayload) -> anyhow::Result<Value> {
        let mut event = Map::new();
        event.insert("type".to_string(), Value::String(event_type.to_string()));
        event.insert(
            "run_id".to_string(),
            Value::String(self.inner.run_id.clone()),
        );
        event.insert("ts".to_string(), Value::String(now_utc_iso()));
        for (key, value) in payload {
            event.insert(key, value);
        }
        let event = Value::Object(event);

        let mut sink = self
            .inner
            .sink
            .lock()
            .map_err(|_| anyhow::anyhow!("event writer lock poisoned"))?;
        match &mut *sink {
            EventSink::File(path) => append_line(path, &event)?,
            EventSink::Memory(events) => events.push(event.clone()),
            EventSink::Discard => {}
        }
        Ok(event)
    }
}

fn append_line(path: &Path, event: &Value) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let line = serde_json::to_string(event)?;
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(line.as_bytes())?;
    file.write_all(b"\n")?;
    Ok(())
}

/// Builds an `EventPayload` from `key => value` pairs.
#[macro_export]
macro_rules! payload {
    ($($key:expr => $value:expr),* $(,)?) => {{
        let mut map = $crate::events::EventPayload::new();
        $(map.insert($key.to_string(), ::serde_json::json!($value));)*
        map
    }};
}

#[cfg(test)]
mod tests {
    use std::fs;

    use chrono::DateTime;

    use super::*;

    #[test]
    fn emit_writes_compact_jsonl_line() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("events.jsonl");
        let writer = EventWriter::new(&path, "run-123");

        let emitted = writer.emit("flow_started", crate::payload!("nodes" => 3))?;

        let content = fs::read_to_string(&path)?;
        let line = content.lines().next().unwrap_or("");
        let parsed: Value = serde_json::from_str(line)?;

        assert_eq!(parsed, emitted);
        assert_eq!(parsed["type"], Value::String("flow_started".to_string()));
        assert_eq!(parsed["run_id"], Value::String("run-123".to_string()));
        assert_eq!(parsed["nodes"], serde_json::json!(3));

        let ts = parsed["ts"].as_str().unwrap_or("");
        DateTime::parse_from_rfc3339(ts)?;
        Ok(())
    }

    #[test]
    fn payload_can_override_default_keys() -> anyhow::Result<()> {
        let writer = EventWriter::in_memory("run-123");
        let emitted = writer.emit(
            "flow_started",
            crate::payload!("type" => "override", "run_id" => "override-run"),
        )?;

        assert_eq!(emitted["type"], Value::String("override".to_string()));
        assert_eq!(emitted["run_id"], Value::String("override-run".to_string()));
        Ok(())
    }

    #[test]
    fn emit_appends_lines() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("nested").join("events.jsonl");
        let writer = EventWriter::new(&path, "run-123");

        writer.emit("one", EventPayload::new())?;
        writer.for_run("run-456").emit("two", EventPayload::new())?;

        let content = fs::read_to_string(&path)?;
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: Value = serde_json::from_str(lines[0])?;
        let second: Value = serde_json::from_str(lines[1])?;
        assert_eq!(first["type"], Value::String("one".to_string()));
        assert_eq!(second["run_id"], Value::String("run-456".to_string()));
        Ok(())
    }

    #[test]
    fn memory_sink_collects_events() -> anyhow::Result<()> {
        let writer = EventWriter::in_memory("run-1");
        writer.emit("node_started", crate::payload!("node_id" => "4"))?;
        writer.emit("node_completed", crate::payload!("node_id" => "4"))?;
        let types: Vec<String> = writer
            .events()
            .iter()
            .filter_map(|event| event["type"].as_str().map(str::to_string))
            .collect();
        assert_eq!(types, vec!["node_started", "node_completed"]);
        assert!(writer.path().is_none());

        writer.for_run("run-2").emit("flow_started", EventPayload::new())?;
        let events = writer.events();
        assert_eq!(events.len(), 3);
        assert_eq!(events[2]["run_id"], Value::String("run-2".to_string()));
        Ok(())
    }
}
