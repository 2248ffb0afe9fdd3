//! Trace runtime utilities.
//!
//! This crate re-exports the data contracts from `trace_schema` and adds the
//! batch transforms that turn structured telemetry into a canonical action
//! trace: record classification, normalization, move decomposition, the
//! call-text codec and ingestion helpers.

pub mod call_text;
pub mod decompose;
pub mod ingest;
pub mod normalize;
pub mod records;
pub mod resources;
pub mod task_script;
pub mod trace;

pub use call_text::{parse_call, parse_items_literal, render_call, CallParseError};
pub use decompose::{
    decompose, segment_action, ARRIVAL_TOLERANCE, SEGMENT_DISTANCE, TICKS_PER_SEGMENT,
};
pub use ingest::{normalize_sources, Extraction, RecordSource};
pub use normalize::{
    normalize, normalize_all, NormalizeError, NormalizeOptions, NormalizeReport, Normalized,
    Normalizer, SkipReason, DEFAULT_EXCLUDE_MARKER,
};
pub use records::{LogRecord, RecordParseError, RecordShape, SourceKind, Unrecognized};
pub use resources::is_standard_resource;
pub use task_script::{parse_task_line, parse_task_script, TaskAttributes, TaskRecord};
pub use trace::{ActionTrace, TraceIoError};
pub use trace_schema::*;
