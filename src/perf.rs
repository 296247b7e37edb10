use serde_json::{Map, Value, json};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::error::Stage;

// JSONL stage timings. Shared between clones; the hot summary is written next
// to the log when the last clone drops.
#[derive(Clone)]
pub struct PerfLogger {
    inner: Arc<Mutex<PerfState>>,
}

struct PerfState {
    writer: BufWriter<File>,
    path: PathBuf,
    span_totals: BTreeMap<String, f64>,
    span_counts: BTreeMap<String, u64>,
    count_totals: BTreeMap<String, u64>,
}

impl std::fmt::Debug for PerfLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let path = self
            .inner
            .lock()
            .map(|state| state.path.display().to_string())
            .unwrap_or_default();
        f.debug_struct("PerfLogger").field("path", &path).finish()
    }
}

impl PerfLogger {
    pub fn new(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path)?;
        Ok(Self {
            inner: Arc::new(Mutex::new(PerfState {
                writer: BufWriter::new(file),
                path,
                span_totals: BTreeMap::new(),
                span_counts: BTreeMap::new(),
                count_totals: BTreeMap::new(),
            })),
        })
    }

    pub fn log_span_ms(&self, stage: Stage, doc_id: Option<&str>, ms: f64) {
        let line = json!({
            "type": "perf.span",
            "name": stage.as_str(),
            "doc_id": doc_id,
            "unit": "ms",
            "ms": (ms * 1000.0).round() / 1000.0,
        });
        if let Ok(mut state) = self.inner.lock() {
            *state.span_totals.entry(stage.as_str().to_string()).or_insert(0.0) += ms;
            let entry = state
                .span_counts
                .entry(stage.as_str().to_string())
                .or_insert(0);
            *entry = entry.saturating_add(1);
            let _ = writeln!(state.writer, "{line}");
        }
    }

    pub fn log_counts(&self, name: &str, doc_id: Option<&str>, counts: &[(&str, u64)]) {
        let values: Map<String, Value> = counts
            .iter()
            .map(|(key, value)| (key.to_string(), Value::from(*value)))
            .collect();
        let line = json!({
            "type": "perf.counts",
            "name": name,
            "doc_id": doc_id,
            "counts": values,
        });
        if let Ok(mut state) = self.inner.lock() {
            for (key, value) in counts {
                let entry = state.count_totals.entry(format!("{name}.{key}")).or_insert(0);
                *entry = entry.saturating_add(*value);
            }
            let _ = writeln!(state.writer, "{line}");
        }
    }

    pub fn flush(&self) {
        if let Ok(mut state) = self.inner.lock() {
            let _ = state.writer.flush();
        }
    }
}

impl Drop for PerfState {
    fn drop(&mut self) {
        let _ = self.writer.flush();
        let Ok(file) = File::create(hot_path_for(&self.path)) else {
            return;
        };
        let mut writer = BufWriter::new(file);

        let mut spans: Vec<(&String, &f64)> = self.span_totals.iter().collect();
        spans.sort_by(|a, b| b.1.partial_cmp(a.1).unwrap_or(std::cmp::Ordering::Equal));
        for (rank, (name, ms)) in spans.into_iter().enumerate() {
            let count = self.span_counts.get(name).copied().unwrap_or(1).max(1);
            let line = json!({
                "type": "perf.hot.span",
                "rank": rank + 1,
                "name": name,
                "unit": "ms",
                "ms": (ms * 1000.0).round() / 1000.0,
                "count": count,
                "avg_ms": ((ms / count as f64) * 1000.0).round() / 1000.0,
            });
            let _ = writeln!(writer, "{line}");
        }

        let mut counts: Vec<(&String, &u64)> = self.count_totals.iter().collect();
        counts.sort_by(|a, b| b.1.cmp(a.1));
        for (rank, (name, value)) in counts.into_iter().enumerate() {
            let line = json!({
                "type": "perf.hot.count",
                "rank": rank + 1,
                "name": name,
                "value": value,
            });
            let _ = writeln!(writer, "{line}");
        }
        let _ = writer.flush();
    }
}

fn hot_path_for(path: &Path) -> PathBuf {
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("docseal_perf.log");
    let stem = file_name
        .rsplit_once('.')
        .map(|(s, _)| s)
        .unwrap_or(file_name);
    path.with_file_name(format!("{stem}_hot.log"))
}
