//! Runs marshalled calls against the surface and classifies the outcome.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, warn};

use crate::config::ReplayConfig;
use crate::surface::{ExecutionSurface, MarshalledCall};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecutionError {
    #[error("surface has no action named '{0}'")]
    UnknownAction(String),
    #[error("{call} failed: {message}")]
    Failed { call: String, message: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    /// The surface's result, uninterpreted.
    Completed(serde_json::Value),
    /// A failure matching a benign signature; counts as done.
    Tolerated(String),
}

pub struct Executor {
    surface: Arc<dyn ExecutionSurface>,
    benign_failures: Vec<String>,
}

impl Executor {
    pub fn new(surface: Arc<dyn ExecutionSurface>) -> Self {
        Self {
            surface,
            benign_failures: Vec::new(),
        }
    }

    pub fn from_config(surface: Arc<dyn ExecutionSurface>, config: &ReplayConfig) -> Self {
        Self::new(surface).with_benign_failures(config.benign_failures().iter().cloned())
    }

    pub fn with_benign_failures<I, S>(mut self, signatures: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.benign_failures = signatures.into_iter().map(Into::into).collect();
        self
    }

    pub fn is_benign(&self, message: &str) -> bool {
        self.benign_failures
            .iter()
            .any(|signature| message.contains(signature.as_str()))
    }

    pub fn execute(&self, call: &MarshalledCall) -> Result<ExecutionOutcome, ExecutionError> {
        if !self.surface.has_action(&call.name) {
            warn!(target: "replay::executor", action = %call.name, "call.skipped=unknown_action");
            return Err(ExecutionError::UnknownAction(call.name.clone()));
        }

        match self.surface.invoke(call) {
            Ok(value) => {
                debug!(target: "replay::executor", call = %call, "call.completed");
                Ok(ExecutionOutcome::Completed(value))
            }
            Err(err) if self.is_benign(&err.message) => {
                debug!(
                    target: "replay::executor",
                    call = %call,
                    error = %err,
                    "call.tolerated"
                );
                Ok(ExecutionOutcome::Tolerated(err.message))
            }
            Err(err) => {
                warn!(target: "replay::executor", call = %call, error = %err, "call.failed");
                Err(ExecutionError::Failed {
                    call: call.to_string(),
                    message: err.message,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dry_run::DryRunSurface;
    use crate::surface::{CallValue, Position};

    fn harvest() -> MarshalledCall {
        MarshalledCall::new("harvest_resource")
            .with("position", CallValue::Position(Position::new(3.0, 4.0)))
    }

    #[test]
    fn unknown_actions_are_reported_not_invoked() {
        let surface = Arc::new(DryRunSurface::new());
        let executor = Executor::new(surface.clone());
        let result = executor.execute(&MarshalledCall::new("teleport"));
        assert_eq!(result, Err(ExecutionError::UnknownAction("teleport".into())));
        assert!(surface.calls().is_empty());
    }

    #[test]
    fn benign_failures_are_tolerated() {
        let surface = Arc::new(
            DryRunSurface::new()
                .fail_on("harvest_resource", "Could not harvest. LuaEntity (tree) is gone"),
        );
        let config = ReplayConfig::default();
        let executor = Executor::from_config(surface, &config);
        assert!(matches!(
            executor.execute(&harvest()),
            Ok(ExecutionOutcome::Tolerated(message)) if message.starts_with("Could not harvest")
        ));
    }

    #[test]
    fn other_failures_surface_as_errors() {
        let surface = Arc::new(DryRunSurface::new().fail_on("harvest_resource", "out of reach"));
        let executor = Executor::from_config(surface, &ReplayConfig::default());
        match executor.execute(&harvest()) {
            Err(ExecutionError::Failed { call, message }) => {
                assert_eq!(message, "out of reach");
                assert!(call.starts_with("harvest_resource("));
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[test]
    fn success_returns_the_surface_result() {
        let surface = Arc::new(DryRunSurface::new());
        let executor = Executor::new(surface.clone());
        assert!(matches!(
            executor.execute(&harvest()),
            Ok(ExecutionOutcome::Completed(_))
        ));
        assert_eq!(surface.calls().len(), 1);
    }
}
