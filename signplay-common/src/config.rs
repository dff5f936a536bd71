//! Configuration loading and config file resolution
//!
//! Bootstrap configuration lives in a single TOML file. Every field carries a
//! built-in default, so a missing section (or a missing file at the default
//! location) never prevents startup.
//!
//! # Config file priority
//!
//! 1. Command-line argument (highest priority)
//! 2. `SIGNPLAY_CONFIG` environment variable
//! 3. `<os config dir>/signplay/config.toml`
//! 4. Built-in defaults (no file)

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "SIGNPLAY_CONFIG";

/// Top-level configuration loaded from TOML
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    /// Directory holding one clip per sign (`<video_root>/<sign>.<ext>`)
    pub video_root: Option<PathBuf>,

    /// Event bus capacity
    pub event_capacity: Option<usize>,

    pub logging: LoggingConfig,
    pub pool: PoolConfig,
    pub machine: MachineConfig,
    pub timing: TimingConfig,
    pub queue: QueueConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level or filter directive (trace, debug, info, warn, error)
    pub level: String,

    /// Log file path (logs to stderr if not specified)
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

/// Resource pool settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Concurrent in-flight loads before further requests wait for a slot
    pub max_concurrent_loads: usize,
    /// Per-load timeout
    pub load_timeout_ms: u64,
    /// Non-priority preload batch size
    pub batch_size: usize,
    /// Pause between non-priority batches
    pub batch_pause_ms: u64,
    pub muted: bool,
    pub plays_inline: bool,
    pub cross_origin: Option<String>,
    /// Clip file extension used by the default resolver
    pub file_extension: String,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_concurrent_loads: 3,
            load_timeout_ms: 5000,
            batch_size: 5,
            batch_pause_ms: 100,
            muted: true,
            plays_inline: true,
            cross_origin: Some("anonymous".to_string()),
            file_extension: "mp4".to_string(),
        }
    }
}

/// Avatar state machine settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MachineConfig {
    /// Accept any state change, skipping the transition table
    pub unchecked_transitions: bool,
    /// Run up to `parallel_batch_size` transitions concurrently
    pub parallel_mode: bool,
    pub parallel_batch_size: usize,
    /// Delay before ERROR heals back to NEUTRAL (0 disables the timer)
    pub error_recovery_ms: u64,
    /// Rolling sign history length used for prediction
    pub history_len: usize,
    /// Observed bigram count at which a pair counts as a common sequence
    pub common_sequence_min_count: u32,
    /// Batches larger than this default to instant mode
    pub instant_batch_threshold: usize,
    /// Batches larger than this default to ultra mode
    pub ultra_batch_threshold: usize,
    /// Built-in follow-up table used before any history is observed
    pub bigrams: BTreeMap<String, String>,
}

impl Default for MachineConfig {
    fn default() -> Self {
        let bigrams = [
            ("Hello", "My"),
            ("My", "Name"),
            ("Name", "Is"),
            ("Thank", "You"),
            ("Good", "Morning"),
            ("How", "Are"),
            ("Are", "You"),
            ("Nice", "Meet"),
            ("Meet", "You"),
        ]
        .into_iter()
        .map(|(a, b)| (a.to_string(), b.to_string()))
        .collect();

        Self {
            unchecked_transitions: false,
            parallel_mode: false,
            parallel_batch_size: 5,
            error_recovery_ms: 1000,
            history_len: 5,
            common_sequence_min_count: 2,
            instant_batch_threshold: 5,
            ultra_batch_threshold: 2,
            bigrams,
        }
    }
}

/// Duration policy settings
///
/// Speed-mode multipliers compress the base values; floors keep the clip
/// itself on screen long enough to read.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    pub transition_in_ms: u64,
    pub transition_out_ms: u64,
    /// Hold for a single letter or digit
    pub glyph_hold_ms: u64,
    /// Hold for a word sign
    pub word_hold_ms: u64,
    /// Floor for scaled transition durations
    pub min_transition_ms: u64,
    /// Floor for scaled hold durations
    pub min_hold_ms: u64,
    pub fast_multiplier: f64,
    pub ultra_multiplier: f64,
    pub instant_multiplier: f64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            transition_in_ms: 300,
            transition_out_ms: 250,
            glyph_hold_ms: 1800,
            word_hold_ms: 2300,
            min_transition_ms: 40,
            min_hold_ms: 1200,
            fast_multiplier: 0.85,
            ultra_multiplier: 0.7,
            instant_multiplier: 0.5,
        }
    }
}

/// Sequencing queue settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    /// Pause the whole queue once an item exhausts its retries
    pub pause_on_error: bool,
    /// Start draining as soon as signs are added to an idle queue
    pub auto_start: bool,
    /// Gap between consecutive distinct signs
    pub base_delay_ms: u64,
    /// Gap between items submitted together as a batch
    pub batch_delay_ms: u64,
    /// Gap inside a recognized fast sequence
    pub fast_sequence_delay_ms: u64,
    /// Per-item estimate used before any item has completed
    pub fallback_item_estimate_ms: u64,
    /// Dispatch batch items to the state machine concurrently
    pub parallel_batches: bool,
    /// Word pairs that read as one motion
    pub common_pairs: Vec<(String, String)>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        let common_pairs = [
            ("Thank", "You"),
            ("Good", "Morning"),
            ("Hello", "My"),
            ("My", "Name"),
            ("Nice", "Meet"),
            ("Meet", "You"),
        ]
        .into_iter()
        .map(|(a, b)| (a.to_string(), b.to_string()))
        .collect();

        Self {
            max_retries: 1,
            retry_delay_ms: 300,
            pause_on_error: true,
            auto_start: true,
            base_delay_ms: 250,
            batch_delay_ms: 120,
            fast_sequence_delay_ms: 20,
            fallback_item_estimate_ms: 800,
            parallel_batches: false,
            common_pairs,
        }
    }
}

impl TomlConfig {
    /// Parse configuration from a TOML string
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: TomlConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
    }

    /// Resolve and load configuration, falling back to built-in defaults
    ///
    /// An explicitly named file (CLI or environment) must exist. A missing
    /// file at the default location only logs and yields defaults.
    pub fn load_resolved(cli_path: Option<&Path>) -> Result<(Self, Option<PathBuf>)> {
        match resolve_config_path(cli_path, CONFIG_ENV_VAR) {
            ConfigSource::Explicit(path) => {
                if !path.exists() {
                    return Err(Error::NotFound(format!("config file {}", path.display())));
                }
                let config = Self::load(&path)?;
                info!("Loaded configuration from {}", path.display());
                Ok((config, Some(path)))
            }
            ConfigSource::Default(path) if path.exists() => {
                let config = Self::load(&path)?;
                info!("Loaded configuration from {}", path.display());
                Ok((config, Some(path)))
            }
            ConfigSource::Default(path) => {
                warn!(
                    "No config file at {}, using built-in defaults",
                    path.display()
                );
                Ok((Self::default(), None))
            }
            ConfigSource::None => {
                warn!("No config directory available, using built-in defaults");
                Ok((Self::default(), None))
            }
        }
    }

    /// Reject values that would stall or disable a component
    pub fn validate(&self) -> Result<()> {
        if self.pool.max_concurrent_loads == 0 {
            return Err(Error::Config("pool.max_concurrent_loads must be at least 1".to_string()));
        }
        if self.pool.batch_size == 0 {
            return Err(Error::Config("pool.batch_size must be at least 1".to_string()));
        }
        if self.machine.parallel_batch_size == 0 {
            return Err(Error::Config(
                "machine.parallel_batch_size must be at least 1".to_string(),
            ));
        }
        if self.machine.history_len == 0 {
            return Err(Error::Config("machine.history_len must be at least 1".to_string()));
        }
        for (name, value) in [
            ("timing.fast_multiplier", self.timing.fast_multiplier),
            ("timing.ultra_multiplier", self.timing.ultra_multiplier),
            ("timing.instant_multiplier", self.timing.instant_multiplier),
        ] {
            if !(value > 0.0 && value <= 1.0) {
                return Err(Error::Config(format!("{} must be in (0, 1], got {}", name, value)));
            }
        }
        for (name, value) in [
            ("timing.glyph_hold_ms", self.timing.glyph_hold_ms),
            ("timing.word_hold_ms", self.timing.word_hold_ms),
        ] {
            if value < self.timing.min_hold_ms {
                return Err(Error::Config(format!(
                    "{} ({}) is below timing.min_hold_ms ({})",
                    name, value, self.timing.min_hold_ms
                )));
            }
        }
        if self.event_capacity == Some(0) {
            return Err(Error::Config("event_capacity must be at least 1".to_string()));
        }
        Ok(())
    }
}

/// Where the configuration file was found
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    /// Named by CLI argument or environment variable
    Explicit(PathBuf),
    /// Platform default location (may not exist)
    Default(PathBuf),
    /// No usable location on this platform
    None,
}

/// Resolve the config file location following the documented priority order
pub fn resolve_config_path(cli_arg: Option<&Path>, env_var_name: &str) -> ConfigSource {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return ConfigSource::Explicit(path.to_path_buf());
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(env_var_name) {
        if !path.trim().is_empty() {
            return ConfigSource::Explicit(PathBuf::from(path));
        }
    }

    // Priority 3: Platform config directory
    match dirs::config_dir() {
        Some(dir) => ConfigSource::Default(dir.join("signplay").join("config.toml")),
        None => ConfigSource::None,
    }
}
