//! Application-level configuration loading, including the stage budget table.

use std::{collections::HashMap, env, fs, io::ErrorKind, path::PathBuf, time::Duration};

use serde::Deserialize;
use tracing::{info, warn};

use crate::engine::EngineSettings;
use crate::state::stages::{Stage, StageSchedule, builtin_budgets};

/// Default location on disk where the service looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/app.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "INK_SPRINT_BACK_CONFIG_PATH";

#[derive(Debug, Clone)]
/// Immutable runtime configuration shared across the application.
pub struct AppConfig {
    /// Tick cadence and inactivity eviction tunables.
    pub engine: EngineSettings,
    /// Per-stage time budgets.
    pub schedule: StageSchedule,
    /// Idea summarization debounce tunables.
    pub debounce: DebounceSettings,
}

/// Delay and ceiling applied to the idea summarization debouncer.
#[derive(Debug, Clone)]
pub struct DebounceSettings {
    /// Quiet period after the last trigger before the job runs.
    pub delay: Duration,
    /// Hard ceiling from the first trigger of a window to its run.
    pub max_wait: Duration,
}

impl Default for DebounceSettings {
    fn default() -> Self {
        Self {
            delay: Duration::from_secs(10),
            max_wait: Duration::from_secs(30),
        }
    }
}

impl AppConfig {
    /// Load the application configuration from disk, falling back to the
    /// baked-in defaults.
    pub fn load() -> Self {
        let path = resolve_config_path();
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<RawConfig>(&contents) {
                Ok(raw) => {
                    let app_config: Self = raw.into();
                    info!(path = %path.display(), "loaded configuration from file");
                    app_config
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse config; falling back to defaults"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                Self::default()
            }
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            engine: EngineSettings::default(),
            schedule: StageSchedule::default(),
            debounce: DebounceSettings::default(),
        }
    }
}

#[derive(Debug, Deserialize)]
/// JSON representation of the configuration file located at [`DEFAULT_CONFIG_PATH`].
struct RawConfig {
    tick_interval_secs: Option<u64>,
    inactivity_window_secs: Option<u64>,
    debounce_delay_secs: Option<u64>,
    debounce_max_wait_secs: Option<u64>,
    default_stage_budget_secs: Option<u64>,
    /// Stage name to budget in seconds; entries override the built-in table.
    #[serde(default)]
    stage_budget_secs: HashMap<String, u64>,
}

impl From<RawConfig> for AppConfig {
    fn from(raw: RawConfig) -> Self {
        let defaults = Self::default();

        let mut engine = defaults.engine;
        if let Some(secs) = raw.tick_interval_secs {
            engine.tick_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = raw.inactivity_window_secs {
            engine.inactivity_window = Duration::from_secs(secs);
        }

        let mut debounce = defaults.debounce;
        if let Some(secs) = raw.debounce_delay_secs {
            debounce.delay = Duration::from_secs(secs);
        }
        if let Some(secs) = raw.debounce_max_wait_secs {
            debounce.max_wait = Duration::from_secs(secs);
        }

        let mut budgets = builtin_budgets();
        for (name, secs) in raw.stage_budget_secs {
            match Stage::parse(&name) {
                Some(stage) => {
                    budgets.insert(stage, Duration::from_secs(secs));
                }
                None => warn!(stage = %name, "ignoring budget for unknown stage name"),
            }
        }
        let default_budget = raw
            .default_stage_budget_secs
            .map(Duration::from_secs)
            .unwrap_or_else(|| defaults.schedule.budget_for("UNKNOWN"));

        Self {
            engine,
            schedule: StageSchedule::new(budgets, default_budget),
            debounce,
        }
    }
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}
