//! Batch ingestion of JSONL record sources into one trace.

use std::fs;
use std::io;
use std::path::Path;

use rayon::prelude::*;
use tracing::{info, warn};
use trace_schema::CanonicalAction;

use crate::normalize::{NormalizeOptions, NormalizeReport, Normalizer};
use crate::records::LogRecord;
use crate::trace::ActionTrace;

/// One named stream of JSONL text. The name's file stem decides the
/// source kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordSource {
    pub name: String,
    pub text: String,
}

impl RecordSource {
    pub fn new(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            text: text.into(),
        }
    }

    pub fn from_path(path: &Path) -> io::Result<Self> {
        let text = fs::read_to_string(path)?;
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Ok(Self { name, text })
    }

    /// Parses every non-blank line; invalid lines are logged and counted.
    pub fn records(&self) -> (Vec<LogRecord>, usize) {
        let mut records = Vec::new();
        let mut invalid = 0;
        for (index, line) in self.text.lines().enumerate() {
            match LogRecord::parse_line(&self.name, index + 1, line) {
                Ok(Some(record)) => records.push(record),
                Ok(None) => {}
                Err(err) => {
                    invalid += 1;
                    warn!(
                        target: "replay::normalize",
                        source = %self.name,
                        error = %err,
                        "record.skipped=invalid_line"
                    );
                }
            }
        }
        (records, invalid)
    }
}

/// Result of normalizing a set of sources.
#[derive(Debug, Clone, Default)]
pub struct Extraction {
    pub trace: ActionTrace,
    pub report: NormalizeReport,
}

fn normalize_source(
    source: &RecordSource,
    options: &NormalizeOptions,
) -> (Vec<CanonicalAction>, NormalizeReport) {
    let (records, invalid) = source.records();
    let mut normalizer = Normalizer::new(options.clone());
    for _ in 0..invalid {
        normalizer.note_invalid_line();
    }
    let mut actions = Vec::new();
    for record in &records {
        actions.extend(normalizer.push(record));
    }
    (actions, normalizer.into_report())
}

/// Normalizes sources in parallel; the merge order is the order of
/// `sources`, so ties between sources break the same way on every run.
pub fn normalize_sources(sources: &[RecordSource], options: &NormalizeOptions) -> Extraction {
    let per_source: Vec<(Vec<CanonicalAction>, NormalizeReport)> = sources
        .par_iter()
        .map(|source| normalize_source(source, options))
        .collect();

    let mut report = NormalizeReport::default();
    let mut batches = Vec::with_capacity(per_source.len());
    for (actions, source_report) in per_source {
        report.merge(&source_report);
        batches.push(actions);
    }
    let trace = ActionTrace::merge(batches);

    info!(
        target: "replay::normalize",
        sources = sources.len(),
        records = report.records,
        emitted = report.emitted,
        skipped = report.skipped(),
        missing_time = report.missing_time,
        filtered = report.filtered,
        invalid_lines = report.invalid_lines,
        "normalize.completed"
    );
    Extraction { trace, report }
}
