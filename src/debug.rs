use serde::Serialize;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

/// JSON-lines diagnostics trace of an export: one line per event, counters summarized on
/// demand. Cheap to clone; clones share the same file.
#[derive(Clone)]
pub struct TraceLogger {
    inner: Arc<Mutex<TraceState>>,
}

struct TraceState {
    writer: Box<dyn Write + Send>,
    counters: BTreeMap<String, u64>,
}

impl TraceLogger {
    pub fn new(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = File::create(path)?;
        Ok(Self::from_writer(BufWriter::new(file)))
    }

    pub fn from_writer(writer: impl Write + Send + 'static) -> Self {
        Self {
            inner: Arc::new(Mutex::new(TraceState {
                writer: Box::new(writer),
                counters: BTreeMap::new(),
            })),
        }
    }

    pub fn event(&self, kind: &str, fields: impl Serialize) {
        let mut line = json!({ "type": kind });
        if let (Value::Object(target), Ok(Value::Object(extra))) =
            (&mut line, serde_json::to_value(fields))
        {
            target.extend(extra);
        }
        if let Ok(mut state) = self.inner.lock() {
            let _ = writeln!(state.writer, "{line}");
        }
    }

    pub fn increment(&self, key: &str, amount: u64) {
        if let Ok(mut state) = self.inner.lock() {
            let entry = state.counters.entry(key.to_string()).or_insert(0);
            *entry = entry.saturating_add(amount);
        }
    }

    pub fn emit_summary(&self, context: &str) {
        if let Ok(mut state) = self.inner.lock() {
            let counts = std::mem::take(&mut state.counters);
            let line = json!({
                "type": "trace.summary",
                "context": context,
                "counts": counts,
            });
            let _ = writeln!(state.writer, "{line}");
        }
    }

    pub fn flush(&self) {
        if let Ok(mut state) = self.inner.lock() {
            let _ = state.writer.flush();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_events_and_summary_as_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trace.jsonl");
        let logger = TraceLogger::new(&path).unwrap();
        logger.event("capture.state", json!({ "state": "activating", "slide": 2 }));
        logger.increment("capture.ok", 1);
        logger.increment("capture.ok", 2);
        logger.emit_summary("export \"deck\"");
        logger.flush();

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<Value> = text
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["type"], "capture.state");
        assert_eq!(lines[0]["slide"], 2);
        assert_eq!(lines[1]["context"], "export \"deck\"");
        assert_eq!(lines[1]["counts"]["capture.ok"], 3);
    }

    #[test]
    fn summary_drains_counters() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trace.jsonl");
        let logger = TraceLogger::new(&path).unwrap();
        logger.increment("pages", 4);
        logger.emit_summary("first");
        logger.emit_summary("second");
        logger.flush();

        let text = std::fs::read_to_string(&path).unwrap();
        let last: Value = serde_json::from_str(text.lines().last().unwrap()).unwrap();
        assert_eq!(last["counts"], json!({}));
    }
}
