//! Synchronous or fire-and-forget dispatch of marshalled calls.
//!
//! Asynchronous calls each run on their own thread with no barrier between
//! them; only the dispatch order is fixed. Outcomes come back over a channel.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::executor::{ExecutionError, ExecutionOutcome, Executor};
use crate::surface::MarshalledCall;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchMode {
    #[default]
    Sync,
    Async,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CallResult {
    /// Dispatch sequence number, starting at 0.
    pub sequence: u64,
    pub tick: i64,
    pub call: String,
    pub result: Result<ExecutionOutcome, ExecutionError>,
}

#[derive(Debug, Default)]
pub struct Drained {
    pub results: Vec<CallResult>,
    /// Calls still running when the timeout elapsed.
    pub abandoned: usize,
}

pub struct Dispatcher {
    executor: Arc<Executor>,
    mode: DispatchMode,
    sender: Sender<CallResult>,
    receiver: Receiver<CallResult>,
    next_sequence: u64,
    in_flight: usize,
}

impl Dispatcher {
    pub fn new(executor: Arc<Executor>, mode: DispatchMode) -> Self {
        let (sender, receiver) = unbounded();
        Self {
            executor,
            mode,
            sender,
            receiver,
            next_sequence: 0,
            in_flight: 0,
        }
    }

    pub fn mode(&self) -> DispatchMode {
        self.mode
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    /// Sync mode returns the result; async mode returns `None` and the result
    /// arrives through [`Dispatcher::poll`] or [`Dispatcher::drain`].
    pub fn dispatch(&mut self, tick: i64, call: MarshalledCall) -> Option<CallResult> {
        let sequence = self.next_sequence;
        self.next_sequence += 1;

        match self.mode {
            DispatchMode::Sync => Some(run_call(&self.executor, sequence, tick, &call)),
            DispatchMode::Async => {
                let label = call.name.clone();
                let executor = Arc::clone(&self.executor);
                let sender = self.sender.clone();
                let spawned = thread::Builder::new()
                    .name(format!("replay-call-{sequence}"))
                    .spawn(move || {
                        let _ = sender.send(run_call(&executor, sequence, tick, &call));
                    });
                match spawned {
                    Ok(_) => {
                        self.in_flight += 1;
                        None
                    }
                    Err(err) => {
                        warn!(target: "replay::executor", error = %err, "dispatch.spawn_failed");
                        Some(CallResult {
                            sequence,
                            tick,
                            call: label.clone(),
                            result: Err(ExecutionError::Failed {
                                call: label,
                                message: err.to_string(),
                            }),
                        })
                    }
                }
            }
        }
    }

    /// Results that have already arrived.
    pub fn poll(&mut self) -> Vec<CallResult> {
        let results: Vec<_> = self.receiver.try_iter().collect();
        self.in_flight = self.in_flight.saturating_sub(results.len());
        results
    }

    /// Waits up to `timeout` for outstanding calls.
    pub fn drain(&mut self, timeout: Duration) -> Drained {
        let deadline = Instant::now() + timeout;
        let mut drained = Drained::default();
        while self.in_flight > 0 {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.receiver.recv_timeout(remaining) {
                Ok(result) => {
                    self.in_flight -= 1;
                    drained.results.push(result);
                }
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        drained.abandoned = self.in_flight;
        if drained.abandoned > 0 {
            warn!(
                target: "replay::executor",
                abandoned = drained.abandoned,
                timeout_ms = timeout.as_millis() as u64,
                "dispatch.drain=timed_out"
            );
        }
        drained
    }
}

fn run_call(executor: &Executor, sequence: u64, tick: i64, call: &MarshalledCall) -> CallResult {
    CallResult {
        sequence,
        tick,
        call: call.to_string(),
        result: executor.execute(call),
    }
}
