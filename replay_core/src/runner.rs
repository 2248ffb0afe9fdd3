//! Drives an [`ActionTrace`] against a surface at wall-clock pace.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use serde_json::json;
use thiserror::Error;
use tracing::{info, warn};
use trace_runtime::ActionTrace;

use crate::config::ReplayConfig;
use crate::diagnostics::DiagnosticsSink;
use crate::dispatch::{CallResult, Dispatcher};
use crate::executor::{ExecutionError, ExecutionOutcome, Executor};
use crate::marshal::Marshaller;
use crate::scheduler::{SchedulerError, TickScheduler, WaitOutcome};
use crate::session::SessionGuard;
use crate::surface::ExecutionSurface;

#[derive(Debug, Error)]
pub enum ReplayError {
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
}

/// Cooperative stop flag, checked around every wait.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailedCall {
    pub tick: i64,
    pub call: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ReplayReport {
    /// Trace actions reached before the end or a cancel.
    pub actions: usize,
    pub dispatched: usize,
    pub completed: usize,
    pub tolerated: usize,
    pub unknown_actions: usize,
    pub marshal_errors: usize,
    pub skipped_empty: usize,
    pub abandoned: usize,
    pub failures: Vec<FailedCall>,
    pub unresolved_names: BTreeSet<String>,
    /// Waits whose deadline had already passed.
    pub behind: usize,
    pub max_lag_ms: f64,
    pub cancelled: bool,
    pub elapsed_ms: f64,
    /// Logical ticks covered by `elapsed_ms` at the configured speed.
    pub equivalent_ticks: u64,
}

impl ReplayReport {
    fn note_wait(&mut self, outcome: WaitOutcome) {
        if let WaitOutcome::Behind { lag } = outcome {
            self.behind += 1;
            self.max_lag_ms = self.max_lag_ms.max(lag.as_secs_f64() * 1000.0);
        }
    }

    fn note_result(&mut self, result: &CallResult) {
        match &result.result {
            Ok(ExecutionOutcome::Completed(_)) => self.completed += 1,
            Ok(ExecutionOutcome::Tolerated(_)) => self.tolerated += 1,
            Err(ExecutionError::UnknownAction(_)) => self.unknown_actions += 1,
            Err(ExecutionError::Failed { call, message }) => self.failures.push(FailedCall {
                tick: result.tick,
                call: call.clone(),
                message: message.clone(),
            }),
        }
    }

    /// True when nothing failed outright; tolerated failures do not count.
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
            && self.marshal_errors == 0
            && self.unknown_actions == 0
            && self.abandoned == 0
    }
}

pub struct ReplayRunner {
    config: Arc<ReplayConfig>,
    cancel: CancelToken,
}

impl ReplayRunner {
    pub fn new(config: Arc<ReplayConfig>) -> Self {
        Self {
            config,
            cancel: CancelToken::new(),
        }
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn config(&self) -> &ReplayConfig {
        &self.config
    }

    /// Replays `trace` in order. Per-call failures are collected in the
    /// report; the surface is released on every exit path.
    pub fn run(
        &self,
        trace: &ActionTrace,
        surface: Arc<dyn ExecutionSurface>,
        diagnostics: Option<&DiagnosticsSink>,
    ) -> Result<ReplayReport, ReplayError> {
        let session = SessionGuard::new(Arc::clone(&surface));
        let marshaller = Marshaller::from_config(Arc::clone(&surface), &self.config);
        let executor = Arc::new(Executor::from_config(Arc::clone(&surface), &self.config));
        let mut dispatcher = Dispatcher::new(executor, self.config.dispatch());
        let mut scheduler = TickScheduler::new(self.config.speed());
        let mut report = ReplayReport::default();
        let total = trace.len();

        let started = Instant::now();
        scheduler.start();
        info!(
            target: "replay::executor",
            actions = total,
            speed = scheduler.speed(),
            dispatch = ?dispatcher.mode(),
            "replay.started"
        );

        for (index, action) in trace.iter().enumerate() {
            if self.cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }
            let tick = u64::try_from(action.sort_tick).unwrap_or(0);
            let waited = scheduler.wait_for_tick(tick)?;
            report.note_wait(waited);
            if self.cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }
            report.actions += 1;

            info!(
                target: "replay::executor",
                event = index + 1,
                total,
                tick = action.sort_tick,
                actual_tick = scheduler.current_tick()?,
                lag_ms = waited.lag().as_secs_f64() * 1000.0,
                action = %action.name,
                "replay.dispatch"
            );

            let marshalled = match marshaller.marshal(action) {
                Ok(marshalled) => marshalled,
                Err(err) => {
                    report.marshal_errors += 1;
                    warn!(
                        target: "replay::executor",
                        tick = action.sort_tick,
                        error = %err,
                        "replay.skipped=marshal_error"
                    );
                    if let Some(sink) = diagnostics {
                        sink.record(action.sort_tick, "error", json!({ "error": err.to_string() }));
                    }
                    continue;
                }
            };
            report
                .unresolved_names
                .extend(marshalled.unresolved.iter().cloned());
            if marshalled.is_empty() {
                report.skipped_empty += 1;
                continue;
            }

            for call in marshalled.calls {
                if let Some(sink) = diagnostics {
                    sink.record(
                        action.sort_tick,
                        "dispatch",
                        json!({ "call": call.to_string(), "args": call.args }),
                    );
                }
                report.dispatched += 1;
                if let Some(result) = dispatcher.dispatch(action.sort_tick, call) {
                    absorb(&mut report, &result, diagnostics);
                }
            }
            for result in dispatcher.poll() {
                absorb(&mut report, &result, diagnostics);
            }

            if self.config.capture_state() {
                if let (Some(sink), Some(state)) = (diagnostics, surface.observe_state()) {
                    sink.record(action.sort_tick, "state", state);
                }
            }
        }

        let drained = dispatcher.drain(self.config.drain_timeout());
        for result in &drained.results {
            absorb(&mut report, result, diagnostics);
        }
        report.abandoned = drained.abandoned;
        report.elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        report.equivalent_ticks = scheduler.current_tick()?;
        if report.abandoned > 0 {
            // Abandoned calls keep running against the surface after release.
            warn!(
                target: "replay::executor",
                abandoned = report.abandoned,
                drain_timeout_ms = self.config.drain_timeout().as_millis() as u64,
                "session.released_with_pending_calls"
            );
            if let Some(sink) = diagnostics {
                sink.record(
                    report.equivalent_ticks as i64,
                    "error",
                    json!({ "abandoned": report.abandoned }),
                );
            }
        }
        drop(session);

        info!(
            target: "replay::executor",
            actions = report.actions,
            dispatched = report.dispatched,
            completed = report.completed,
            tolerated = report.tolerated,
            failures = report.failures.len(),
            abandoned = report.abandoned,
            cancelled = report.cancelled,
            elapsed_ms = report.elapsed_ms,
            equivalent_ticks = report.equivalent_ticks,
            "replay.completed"
        );
        Ok(report)
    }
}

fn absorb(report: &mut ReplayReport, result: &CallResult, diagnostics: Option<&DiagnosticsSink>) {
    report.note_result(result);
    if let Some(sink) = diagnostics {
        let data = match &result.result {
            Ok(ExecutionOutcome::Completed(value)) => json!({ "call": result.call, "result": value }),
            Ok(ExecutionOutcome::Tolerated(message)) => {
                json!({ "call": result.call, "tolerated": message })
            }
            Err(err) => json!({ "call": result.call, "error": err.to_string() }),
        };
        sink.record(result.tick, "result", data);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::tests::SharedBuffer;
    use crate::dispatch::DispatchMode;
    use crate::dry_run::DryRunSurface;
    use std::time::Duration;
    use trace_runtime::{ActionArgs, CanonicalAction, ItemStack};

    fn fast_config() -> ReplayConfig {
        ReplayConfig::default().with_speed(600.0)
    }

    fn trace() -> ActionTrace {
        ActionTrace::from_actions(vec![
            CanonicalAction::new(
                0,
                "move_to",
                ActionArgs::new()
                    .with("start_tick", 0)
                    .with("end_tick", 30)
                    .with("start_x", 0.0)
                    .with("start_y", 0.0)
                    .with("end_x", 4.45)
                    .with("end_y", 0.0),
            ),
            CanonicalAction::new(
                30,
                "harvest_resource",
                ActionArgs::new().with("tick", 30).with("x", 5.0).with("y", 0.0),
            ),
            CanonicalAction::new(
                40,
                "extract_item",
                ActionArgs::new()
                    .with("tick", 40)
                    .with("entity", "stone-furnace")
                    .with("entity_x", 1.0)
                    .with("entity_y", 1.0)
                    .with("items", Vec::<ItemStack>::new()),
            ),
            CanonicalAction::new(60, "teleport", ActionArgs::new().with("tick", 60)),
        ])
    }

    #[test]
    fn replay_counts_every_outcome_and_releases_the_session() {
        let surface = Arc::new(
            DryRunSurface::new().fail_on("harvest_resource", "Could not harvest. LuaEntity gone"),
        );
        let runner = ReplayRunner::new(Arc::new(fast_config()));
        let report = runner.run(&trace(), surface.clone(), None).unwrap();

        assert_eq!(report.actions, 4);
        assert_eq!(report.dispatched, 3);
        assert_eq!(report.completed, 1);
        assert_eq!(report.tolerated, 1);
        assert_eq!(report.unknown_actions, 1);
        assert_eq!(report.skipped_empty, 1);
        assert!(report.failures.is_empty());
        assert!(!report.is_clean());
        assert_eq!(surface.release_count(), 1);
    }

    #[test]
    fn pacing_follows_the_trace_ticks() {
        // Tick 60 at 6x speed is 1/6 s after start.
        let runner = ReplayRunner::new(Arc::new(ReplayConfig::default().with_speed(6.0)));
        let report = runner
            .run(&trace(), Arc::new(DryRunSurface::new()), None)
            .unwrap();
        assert!(report.elapsed_ms >= 160.0);
        assert!(report.equivalent_ticks >= 59);
    }

    #[test]
    fn cancelled_runs_stop_and_still_release() {
        let surface = Arc::new(DryRunSurface::new());
        let runner = ReplayRunner::new(Arc::new(fast_config()));
        runner.cancel_token().cancel();
        let report = runner.run(&trace(), surface.clone(), None).unwrap();
        assert!(report.cancelled);
        assert_eq!(report.actions, 0);
        assert!(surface.calls().is_empty());
        assert_eq!(surface.release_count(), 1);
    }

    #[test]
    fn async_dispatch_drains_before_reporting() {
        let surface = Arc::new(DryRunSurface::new().with_latency(Duration::from_millis(20)));
        let config = fast_config().with_dispatch(DispatchMode::Async);
        let report = ReplayRunner::new(Arc::new(config))
            .run(&trace(), surface.clone(), None)
            .unwrap();
        assert_eq!(report.dispatched, 3);
        assert_eq!(
            report.completed + report.tolerated + report.unknown_actions + report.failures.len(),
            3
        );
        assert_eq!(report.abandoned, 0);
    }

    #[test]
    fn calls_outliving_the_drain_are_reported() {
        let buffer = SharedBuffer::default();
        let sink = DiagnosticsSink::from_writer(buffer.clone());
        let surface = Arc::new(DryRunSurface::new().with_latency(Duration::from_millis(300)));
        let config = fast_config()
            .with_dispatch(DispatchMode::Async)
            .with_drain_timeout(Duration::from_millis(10));
        let single = ActionTrace::from_actions(vec![trace().into_actions().remove(0)]);
        let report = ReplayRunner::new(Arc::new(config))
            .run(&single, surface.clone(), Some(&sink))
            .unwrap();
        sink.close().unwrap();

        assert_eq!(report.abandoned, 1);
        assert!(!report.is_clean());
        assert_eq!(surface.release_count(), 1);
        let lines = buffer.lines();
        let abandoned = lines
            .iter()
            .find(|line| line["channel"] == "error")
            .expect("abandoned calls are recorded");
        assert_eq!(abandoned["data"]["abandoned"], 1);
    }

    #[test]
    fn diagnostics_are_keyed_by_tick() {
        let buffer = SharedBuffer::default();
        let sink = DiagnosticsSink::from_writer(buffer.clone());
        let config = fast_config().with_capture_state(true);
        ReplayRunner::new(Arc::new(config))
            .run(&trace(), Arc::new(DryRunSurface::new()), Some(&sink))
            .unwrap();
        sink.close().unwrap();

        let lines = buffer.lines();
        let channels: Vec<(i64, String)> = lines
            .iter()
            .map(|line| {
                (
                    line["tick"].as_i64().unwrap(),
                    line["channel"].as_str().unwrap().to_string(),
                )
            })
            .collect();
        assert_eq!(channels[0], (0, "dispatch".to_string()));
        assert_eq!(channels[1], (0, "result".to_string()));
        assert_eq!(channels[2], (0, "state".to_string()));
        assert!(channels.contains(&(60, "result".to_string())));
    }
}
