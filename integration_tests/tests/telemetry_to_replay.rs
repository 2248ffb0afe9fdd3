mod common;

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::sync::Arc;

use anyhow::Result;
use replay_core::{
    CallValue, DiagnosticsSink, DryRunSurface, ExecutionSurface, Position, ReplayConfig,
    ReplayRunner,
};
use trace_runtime::{normalize_sources, ActionTrace, NormalizeOptions};

#[test]
fn session_normalizes_into_the_expected_order() {
    let extraction = normalize_sources(&common::session_sources(), &NormalizeOptions::default());
    let ticks: Vec<(i64, &str)> = extraction
        .trace
        .iter()
        .map(|action| (action.sort_tick, action.name.as_str()))
        .collect();
    assert_eq!(
        ticks,
        vec![
            (0, "move_to"),
            (30, "move_to"),
            (60, "move_to"),
            (90, "move_to"),
            (120, "move_to"),
            (150, "craft_item"),
            (320, "place_entity"),
            (340, "insert_item"),
            (380, "harvest_resource"),
        ]
    );

    let report = extraction.report;
    assert_eq!(report.records, 8);
    assert_eq!(report.metadata_dropped, 1);
    assert_eq!(report.missing_time, 1);
    assert_eq!(report.filtered, 1);
    assert_eq!(report.emitted, 9);
}

#[test]
fn crash_site_records_survive_without_markers() {
    let options = NormalizeOptions::default().with_exclude_markers(Vec::new());
    let extraction = normalize_sources(&common::session_sources(), &options);
    let pickup = extraction
        .trace
        .iter()
        .find(|action| action.name == "pickup_entity")
        .expect("wreck becomes a pickup");
    assert_eq!(pickup.sort_tick, 510);
    assert_eq!(pickup.args.str("entity"), Some("crash-site-spaceship-wreck"));
}

#[test]
fn written_trace_replays_against_a_dry_run_surface() -> Result<()> {
    let dir = common::scratch_dir("dry_run_replay");
    let trace_path = dir.join("trace.jsonl");
    let diagnostics_path = dir.join("diagnostics.jsonl");

    let extraction = normalize_sources(&common::session_sources(), &NormalizeOptions::default());
    extraction
        .trace
        .write_jsonl(BufWriter::new(File::create(&trace_path)?))?;
    let trace = ActionTrace::read_jsonl(BufReader::new(File::open(&trace_path)?))?;
    assert_eq!(trace.fingerprint(), extraction.trace.fingerprint());

    let surface = Arc::new(DryRunSurface::new());
    let config = ReplayConfig::default()
        .with_speed(3000.0)
        .with_capture_state(true);
    let sink = DiagnosticsSink::create(&diagnostics_path)?;
    let report = ReplayRunner::new(Arc::new(config)).run(&trace, surface.clone(), Some(&sink))?;
    let written = sink.close()?;

    assert!(report.is_clean(), "{report:?}");
    assert_eq!(report.dispatched, 9);
    assert_eq!(report.completed, 9);
    assert!(written >= 27);
    assert_eq!(surface.release_count(), 1);

    let calls = surface.calls();
    let last_move = calls
        .iter()
        .filter(|call| call.name == "move_to")
        .last()
        .expect("moves were replayed");
    assert_eq!(
        last_move.arg("position"),
        Some(&CallValue::Position(Position::new(20.0, 0.0)))
    );
    let insert = calls
        .iter()
        .find(|call| call.name == "insert_item")
        .expect("insert was replayed");
    assert!(matches!(insert.arg("target"), Some(CallValue::Entity(_))));
    assert_eq!(insert.arg("quantity"), Some(&CallValue::Int(5)));

    let state = surface.observe_state().expect("dry run observes state");
    assert_eq!(state["entities"].as_array().map(Vec::len), Some(1));
    Ok(())
}
