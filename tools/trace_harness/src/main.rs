use std::{
    fs::{self, File},
    io::{BufReader, BufWriter},
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use replay_core::{
    load_replay_config_from_env, DiagnosticsSink, DispatchMode, DryRunSurface, ItemsMode,
    ReplayRunner,
};
use trace_proto::{inflate_container, walk_frames, FrameStats};
use trace_runtime::{
    normalize_sources, parse_task_script, ActionTrace, NormalizeOptions, RecordSource,
    DEFAULT_EXCLUDE_MARKER,
};
use tracing::info;

#[derive(Parser, Debug)]
#[command(author, version, about = "Extract, inspect and rehearse action traces", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Normalize every *.jsonl log under a directory into trace files
    Extract {
        /// Directory holding the per-stream JSONL logs
        dir: PathBuf,

        /// Output directory (defaults to <dir>/_runnable_actions)
        #[arg(long)]
        out: Option<PathBuf>,

        /// Drop records whose time is later than this tick
        #[arg(long)]
        max_tick: Option<i64>,

        /// Drop records containing this marker (repeatable; defaults to crash-site)
        #[arg(long = "exclude")]
        exclude: Vec<String>,

        /// Keep every record regardless of markers
        #[arg(long, conflicts_with = "exclude")]
        no_exclude: bool,

        /// Also write a binary cache of the decomposed trace
        #[arg(long)]
        cache: bool,
    },
    /// Decode a binary replay container and walk its frames
    Frames {
        file: PathBuf,

        /// Number of frames to print
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Parse a task script and print one JSON object per task
    Tasks { script: PathBuf },
    /// Rehearse a trace against the dry-run surface
    Replay {
        trace: PathBuf,

        /// Speed multiplier (overrides the config file)
        #[arg(long)]
        speed: Option<f64>,

        #[arg(long, value_enum)]
        dispatch: Option<DispatchArg>,

        #[arg(long, value_enum)]
        items: Option<ItemsArg>,

        /// JSONL diagnostics output (overrides the config file)
        #[arg(long)]
        diagnostics: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum DispatchArg {
    Sync,
    Async,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ItemsArg {
    First,
    All,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    match args.command {
        Command::Extract {
            dir,
            out,
            max_tick,
            exclude,
            no_exclude,
            cache,
        } => {
            let markers = if no_exclude {
                Vec::new()
            } else if exclude.is_empty() {
                vec![DEFAULT_EXCLUDE_MARKER.to_string()]
            } else {
                exclude
            };
            let options = NormalizeOptions::default()
                .with_max_tick(max_tick)
                .with_exclude_markers(markers);
            let out = out.unwrap_or_else(|| dir.join("_runnable_actions"));
            extract(&dir, &out, &options, cache)
        }
        Command::Frames { file, limit } => frames(&file, limit),
        Command::Tasks { script } => tasks(&script),
        Command::Replay {
            trace,
            speed,
            dispatch,
            items,
            diagnostics,
        } => replay(&trace, speed, dispatch, items, diagnostics),
    }
}

fn load_sources(dir: &Path) -> Result<Vec<RecordSource>> {
    let pattern = dir.join("*.jsonl");
    let pattern = pattern
        .to_str()
        .with_context(|| format!("Non UTF-8 path {}", dir.display()))?;
    let mut paths: Vec<PathBuf> = glob::glob(pattern)
        .with_context(|| format!("Invalid glob pattern {pattern}"))?
        .collect::<Result<_, _>>()?;
    paths.sort();
    if paths.is_empty() {
        bail!("No *.jsonl sources found in {}", dir.display());
    }
    paths
        .iter()
        .map(|path| {
            RecordSource::from_path(path)
                .with_context(|| format!("Failed to read source {}", path.display()))
        })
        .collect()
}

fn write_trace(trace: &ActionTrace, path: &Path) -> Result<()> {
    let file =
        File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    trace
        .write_jsonl(BufWriter::new(file))
        .with_context(|| format!("Failed to write trace to {}", path.display()))?;
    info!(target: "replay::normalize", path = %path.display(), actions = trace.len(), "trace.written");
    Ok(())
}

fn suffix(options: &NormalizeOptions) -> String {
    options
        .max_tick
        .map(|tick| format!("_{tick}"))
        .unwrap_or_default()
}

fn extract(dir: &Path, out: &Path, options: &NormalizeOptions, cache: bool) -> Result<()> {
    let sources = load_sources(dir)?;
    fs::create_dir_all(out).with_context(|| format!("Failed to create {}", out.display()))?;

    let decomposed = normalize_sources(&sources, options);
    let undecomposed = normalize_sources(
        &sources,
        &NormalizeOptions {
            decompose_moves: false,
            ..options.clone()
        },
    );

    let suffix = suffix(options);
    write_trace(&decomposed.trace, &out.join(format!("combined_events{suffix}.jsonl")))?;
    write_trace(
        &undecomposed.trace,
        &out.join(format!("combined_events_undecomposed{suffix}.jsonl")),
    )?;
    if cache {
        let path = out.join(format!("combined_events{suffix}.bin"));
        fs::write(&path, decomposed.trace.to_bytes()?)
            .with_context(|| format!("Failed to write cache {}", path.display()))?;
    }

    let report = &decomposed.report;
    println!("sources: {}", sources.len());
    println!("records: {}", report.records);
    println!("actions: {} ({} undecomposed)", decomposed.trace.len(), undecomposed.trace.len());
    println!("skipped: {}", report.skipped());
    println!("  metadata: {}", report.metadata_dropped);
    println!("  unrecognized: {}", report.unrecognized);
    println!("  missing time: {}", report.missing_time);
    println!("  filtered: {}", report.filtered);
    println!("  invalid lines: {}", report.invalid_lines);
    match report.time_range {
        Some((low, high)) => println!("time range: {low}..={high}"),
        None => println!("time range: none"),
    }
    println!("fingerprint: {:016x}", decomposed.trace.fingerprint());
    Ok(())
}

fn frames(file: &Path, limit: usize) -> Result<()> {
    let raw = fs::read(file).with_context(|| format!("Failed to read {}", file.display()))?;
    let inflated = inflate_container(&raw);
    for failure in &inflated.failures {
        eprintln!("skipped block: {failure}");
    }

    let mut stats = FrameStats::default();
    for (index, frame) in walk_frames(&inflated.bytes).enumerate() {
        if index < limit {
            println!(
                "action={:>3} tick={:>8} originator={}",
                frame.action_id, frame.tick, frame.originator
            );
        }
        stats.record(&frame);
    }

    println!("=== container ===");
    println!(
        "blocks: {} decoded, {} skipped, truncated: {}",
        inflated.blocks_decoded,
        inflated.failures.len(),
        inflated.truncated
    );
    println!("bytes: {}", inflated.bytes.len());
    println!("=== frames ===");
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}

fn tasks(script: &Path) -> Result<()> {
    let text = fs::read_to_string(script)
        .with_context(|| format!("Failed to read task script {}", script.display()))?;
    for task in parse_task_script(&text) {
        println!("{}", serde_json::to_string(&task)?);
    }
    Ok(())
}

fn replay(
    trace_path: &Path,
    speed: Option<f64>,
    dispatch: Option<DispatchArg>,
    items: Option<ItemsArg>,
    diagnostics: Option<PathBuf>,
) -> Result<()> {
    let (config, metadata) = load_replay_config_from_env();
    let mut config = (*config).clone();
    if let Some(speed) = speed {
        config = config.with_speed(speed);
    }
    if let Some(dispatch) = dispatch {
        config = config.with_dispatch(match dispatch {
            DispatchArg::Sync => DispatchMode::Sync,
            DispatchArg::Async => DispatchMode::Async,
        });
    }
    if let Some(items) = items {
        config = config.with_items_mode(match items {
            ItemsArg::First => ItemsMode::First,
            ItemsArg::All => ItemsMode::All,
        });
    }
    if diagnostics.is_some() {
        config = config.with_diagnostics_path(diagnostics);
    }

    let file = File::open(trace_path)
        .with_context(|| format!("Failed to open trace {}", trace_path.display()))?;
    let trace = ActionTrace::read_jsonl(BufReader::new(file))
        .with_context(|| format!("Failed to parse trace {}", trace_path.display()))?;
    println!(
        "Loaded {} actions from {} (config: {})",
        trace.len(),
        trace_path.display(),
        metadata
            .path()
            .map(|path| path.display().to_string())
            .unwrap_or_else(|| "builtin".to_string())
    );

    let sink = config
        .diagnostics_path()
        .map(DiagnosticsSink::create)
        .transpose()
        .context("Failed to open diagnostics output")?;
    let runner = ReplayRunner::new(Arc::new(config));
    let report = runner.run(&trace, Arc::new(DryRunSurface::new()), sink.as_ref())?;
    if let Some(sink) = sink {
        let written = sink.close().context("Failed to flush diagnostics")?;
        println!("Diagnostics: {written} entries");
    }

    println!("{}", serde_json::to_string_pretty(&report)?);
    println!(
        "Total duration: {:.2}s (equivalent to {} ticks)",
        report.elapsed_ms / 1000.0,
        report.equivalent_ticks
    );
    Ok(())
}
