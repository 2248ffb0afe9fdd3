use std::{
    env, fs, io,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use serde::Deserialize;
use thiserror::Error;

use crate::dispatch::DispatchMode;
use crate::marshal::ItemsMode;

pub const BUILTIN_REPLAY_CONFIG: &str = include_str!("data/replay_config.json");
pub const REPLAY_CONFIG_PATH_ENV: &str = "REPLAY_CONFIG_PATH";

#[derive(Debug, Error)]
pub enum ReplayConfigError {
    #[error("failed to parse replay config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("failed to read replay config from {path:?}: {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Replay knobs. Missing keys take the builtin defaults.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ReplayConfig {
    speed: f64,
    dispatch: DispatchMode,
    items_mode: ItemsMode,
    target_search_radius: f64,
    benign_failures: Vec<String>,
    drain_timeout_ms: u64,
    diagnostics_path: Option<PathBuf>,
    capture_state: bool,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            speed: 1.0,
            dispatch: DispatchMode::Sync,
            items_mode: ItemsMode::First,
            target_search_radius: 0.5,
            benign_failures: vec!["Could not harvest. LuaEntity".to_string()],
            drain_timeout_ms: 2000,
            diagnostics_path: None,
            capture_state: false,
        }
    }
}

impl ReplayConfig {
    pub fn builtin() -> Arc<Self> {
        Arc::new(
            serde_json::from_str(BUILTIN_REPLAY_CONFIG).expect("builtin replay config should parse"),
        )
    }

    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn from_file(path: &Path) -> Result<Self, ReplayConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ReplayConfigError::ReadFailed {
            path: path.to_path_buf(),
            source,
        })?;
        let config = ReplayConfig::from_json_str(&contents)?;
        Ok(config)
    }

    pub fn speed(&self) -> f64 {
        self.speed
    }

    pub fn dispatch(&self) -> DispatchMode {
        self.dispatch
    }

    pub fn items_mode(&self) -> ItemsMode {
        self.items_mode
    }

    pub fn target_search_radius(&self) -> f64 {
        self.target_search_radius
    }

    pub fn benign_failures(&self) -> &[String] {
        &self.benign_failures
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }

    pub fn diagnostics_path(&self) -> Option<&Path> {
        self.diagnostics_path.as_deref()
    }

    pub fn capture_state(&self) -> bool {
        self.capture_state
    }

    pub fn with_speed(mut self, speed: f64) -> Self {
        self.speed = speed;
        self
    }

    pub fn with_dispatch(mut self, dispatch: DispatchMode) -> Self {
        self.dispatch = dispatch;
        self
    }

    pub fn with_items_mode(mut self, items_mode: ItemsMode) -> Self {
        self.items_mode = items_mode;
        self
    }

    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout_ms = timeout.as_millis().min(u64::MAX as u128) as u64;
        self
    }

    pub fn with_diagnostics_path(mut self, path: Option<PathBuf>) -> Self {
        self.diagnostics_path = path;
        self
    }

    pub fn with_capture_state(mut self, capture_state: bool) -> Self {
        self.capture_state = capture_state;
        self
    }
}

#[derive(Debug, Clone)]
pub struct ReplayConfigMetadata {
    path: Option<PathBuf>,
}

impl ReplayConfigMetadata {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self { path }
    }

    pub fn path(&self) -> Option<&PathBuf> {
        self.path.as_ref()
    }
}

/// Loads the file named by `REPLAY_CONFIG_PATH`, else the crate's data file,
/// else the embedded builtin.
pub fn load_replay_config_from_env() -> (Arc<ReplayConfig>, ReplayConfigMetadata) {
    let override_path = env::var(REPLAY_CONFIG_PATH_ENV).ok().map(PathBuf::from);
    let default_path =
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("src/data/replay_config.json");

    let candidates: Vec<PathBuf> = match override_path {
        Some(ref path) => vec![path.clone()],
        None => vec![default_path],
    };

    for path in candidates {
        match ReplayConfig::from_file(&path) {
            Ok(config) => {
                tracing::info!(
                    target: "replay::config",
                    path = %path.display(),
                    "replay_config.loaded=file"
                );
                return (Arc::new(config), ReplayConfigMetadata::new(Some(path)));
            }
            Err(err) => {
                tracing::warn!(
                    target: "replay::config",
                    path = %path.display(),
                    error = %err,
                    "replay_config.load_failed"
                );
            }
        }
    }

    let config = ReplayConfig::builtin();
    tracing::info!(target: "replay::config", "replay_config.loaded=builtin");
    (config, ReplayConfigMetadata::new(None))
}
