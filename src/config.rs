//! TOML configuration for flowwatch.
//!
//! Resolution order:
//! an explicit `--config` path wins, then the `FLOWWATCH_CONFIG` environment
//! variable, then `/etc/flowwatch/flowwatch.toml`, then compiled-in defaults.
//! Every section is optional; missing keys fall back to their defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::detect::Parameter;

/// Environment variable naming the config file.
pub const CONFIG_ENV: &str = "FLOWWATCH_CONFIG";

/// Standard system location of the config file.
pub const SYSTEM_CONFIG_PATH: &str = "/etc/flowwatch/flowwatch.toml";

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Root configuration for the flowwatch process.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlowwatchConfig {
    #[serde(default)]
    pub detection: DetectionConfig,
    #[serde(default)]
    pub window: WindowConfig,
    #[serde(default)]
    pub summarizer: SummarizerConfig,
    #[serde(default)]
    pub bus: BusConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl FlowwatchConfig {
    /// Load configuration from a TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        config
            .validate()
            .with_context(|| format!("invalid config file: {}", path.display()))?;
        info!(path = %path.display(), "loaded flowwatch configuration");
        Ok(config)
    }

    /// Resolve the configuration the process should run with.
    ///
    /// An explicit path must load; the environment and system locations are
    /// best-effort and fall through to defaults with a warning.
    pub fn load_or_default(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }

        if let Ok(env_path) = std::env::var(CONFIG_ENV) {
            let path = PathBuf::from(env_path);
            match Self::load(&path) {
                Ok(cfg) => return Ok(cfg),
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "FLOWWATCH_CONFIG set but file could not be loaded, trying fallback"
                    );
                }
            }
        }

        let system_path = Path::new(SYSTEM_CONFIG_PATH);
        if system_path.exists() {
            match Self::load(system_path) {
                Ok(cfg) => return Ok(cfg),
                Err(e) => {
                    warn!(
                        path = %system_path.display(),
                        error = %e,
                        "system config file exists but could not be loaded, using defaults"
                    );
                }
            }
        }

        debug!("no config file found, using compiled-in defaults");
        Ok(Self::default())
    }

    /// Reject settings the detectors and window loop cannot run with.
    pub fn validate(&self) -> Result<()> {
        for param in Parameter::ALL {
            let spike = self.detection.spike.get(param);
            if spike.min > spike.max {
                bail!("spike threshold for {param} has min {} > max {}", spike.min, spike.max);
            }
            let drift = self.detection.drift.get(param);
            if drift.min > drift.max {
                bail!("drift threshold for {param} has min {} > max {}", drift.min, drift.max);
            }
            if drift.duration_secs < 0.0 {
                bail!("drift duration for {param} must not be negative");
            }
        }
        if self.detection.dropout_threshold_secs <= 0.0 {
            bail!("dropout_threshold_secs must be positive");
        }
        if self.window.interval_secs == 0 {
            bail!("window.interval_secs must be at least 1");
        }
        if self.bus.capacity == 0 {
            bail!("bus.capacity must be at least 1");
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Detection
// ---------------------------------------------------------------------------

/// How drift and dropout state is scoped inside one detection engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatePartition {
    /// One drift map and one dropout timer shared by every sensor.
    #[default]
    Global,
    /// Independent drift and dropout state per `sensor_id`.
    ///
    /// One entry is kept for every distinct `sensor_id` ever seen and is only
    /// dropped by `DetectionEngine::reset`, so memory grows with the number
    /// of sensors.
    PerSensor,
}

/// Static `{min, max}` range for one parameter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RangeThreshold {
    pub min: f64,
    pub max: f64,
}

impl RangeThreshold {
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    /// True when `value` lies strictly outside `[min, max]`.
    pub fn violated_by(&self, value: f64) -> bool {
        value < self.min || value > self.max
    }
}

/// Normal range plus how long a violation may last before it counts as drift.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DriftThreshold {
    pub min: f64,
    pub max: f64,
    pub duration_secs: f64,
}

impl DriftThreshold {
    pub fn range(&self) -> RangeThreshold {
        RangeThreshold::new(self.min, self.max)
    }
}

/// Spike thresholds for every monitored parameter.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpikeThresholds {
    pub temperature: RangeThreshold,
    pub pressure: RangeThreshold,
    pub flow: RangeThreshold,
}

impl Default for SpikeThresholds {
    fn default() -> Self {
        Self {
            temperature: RangeThreshold::new(5.0, 40.0),
            pressure: RangeThreshold::new(0.5, 4.0),
            flow: RangeThreshold::new(10.0, 120.0),
        }
    }
}

impl SpikeThresholds {
    pub fn get(&self, param: Parameter) -> &RangeThreshold {
        match param {
            Parameter::Temperature => &self.temperature,
            Parameter::Pressure => &self.pressure,
            Parameter::Flow => &self.flow,
        }
    }
}

/// Drift thresholds for every monitored parameter.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DriftThresholds {
    pub temperature: DriftThreshold,
    pub pressure: DriftThreshold,
    pub flow: DriftThreshold,
}

impl Default for DriftThresholds {
    fn default() -> Self {
        Self {
            temperature: DriftThreshold { min: 10.0, max: 35.0, duration_secs: 15.0 },
            pressure: DriftThreshold { min: 1.0, max: 3.0, duration_secs: 15.0 },
            flow: DriftThreshold { min: 20.0, max: 100.0, duration_secs: 15.0 },
        }
    }
}

impl DriftThresholds {
    pub fn get(&self, param: Parameter) -> &DriftThreshold {
        match param {
            Parameter::Temperature => &self.temperature,
            Parameter::Pressure => &self.pressure,
            Parameter::Flow => &self.flow,
        }
    }
}

/// Detector configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    pub partition: StatePartition,
    /// Largest gap between consecutive readings that is not a dropout.
    pub dropout_threshold_secs: f64,
    pub spike: SpikeThresholds,
    pub drift: DriftThresholds,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            partition: StatePartition::Global,
            dropout_threshold_secs: 10.0,
            spike: SpikeThresholds::default(),
            drift: DriftThresholds::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Window
// ---------------------------------------------------------------------------

/// Window aggregator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    /// Length of one aggregation window.
    pub interval_secs: u64,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self { interval_secs: 60 }
    }
}

impl WindowConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

// ---------------------------------------------------------------------------
// Summarizer
// ---------------------------------------------------------------------------

/// Which [`crate::summarize::Summarizer`] the daemon builds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SummarizerBackend {
    /// OpenAI-compatible `/completions` endpoint.
    #[default]
    Completion,
    /// Offline digest rendered from event counts.
    Template,
}

/// Window summarizer settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SummarizerConfig {
    pub backend: SummarizerBackend,
    /// Base URL including the API version prefix, e.g. `http://host:8008/v1`.
    pub base_url: String,
    pub model: String,
    pub temperature: f64,
    /// Sent as a bearer token. Local llama.cpp servers ignore it.
    pub api_key: String,
    pub timeout_secs: u64,
    pub max_tokens: u32,
}

impl Default for SummarizerConfig {
    fn default() -> Self {
        Self {
            backend: SummarizerBackend::Completion,
            base_url: "http://localhost:8008/v1".to_string(),
            model: "llama-2-7b-chat.Q4_0.gguf".to_string(),
            temperature: 0.1,
            api_key: "unknown".to_string(),
            timeout_secs: 60,
            max_tokens: 512,
        }
    }
}

// ---------------------------------------------------------------------------
// Bus / storage / api / logging
// ---------------------------------------------------------------------------

/// In-process publish/subscribe settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Messages buffered per subscriber before the oldest are dropped.
    pub capacity: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self { capacity: 1024 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub db_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("data/flowwatch.db"),
        }
    }
}

/// Read-only query service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub enabled: bool,
    pub bind: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind: "0.0.0.0:8000".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset.
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
