//! Runtime settings for the avatar playback core
//!
//! The TOML layer (`signplay_common::config::TomlConfig`) stores plain
//! millisecond integers so files stay readable. This module converts each
//! section into the `Duration`-typed settings the components consume.
//! Built-in defaults come from the TOML section defaults, so there is a
//! single source of truth for every constant.

use signplay_common::config::{
    MachineConfig, PoolConfig, QueueConfig, TimingConfig, TomlConfig,
};
use signplay_common::time::millis_to_duration;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::time::Duration;

/// Resource pool settings
#[derive(Debug, Clone)]
pub struct PoolSettings {
    pub max_concurrent_loads: usize,
    pub load_timeout: Duration,
    pub batch_size: usize,
    pub batch_pause: Duration,
    pub muted: bool,
    pub plays_inline: bool,
    pub cross_origin: Option<String>,
}

impl From<&PoolConfig> for PoolSettings {
    fn from(cfg: &PoolConfig) -> Self {
        Self {
            max_concurrent_loads: cfg.max_concurrent_loads.max(1),
            load_timeout: millis_to_duration(cfg.load_timeout_ms),
            batch_size: cfg.batch_size.max(1),
            batch_pause: millis_to_duration(cfg.batch_pause_ms),
            muted: cfg.muted,
            plays_inline: cfg.plays_inline,
            cross_origin: cfg.cross_origin.clone(),
        }
    }
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self::from(&PoolConfig::default())
    }
}

/// Avatar state machine settings
#[derive(Debug, Clone)]
pub struct MachineSettings {
    pub unchecked_transitions: bool,
    pub parallel_mode: bool,
    pub parallel_batch_size: usize,
    /// `None` disables the self-heal timer
    pub error_recovery: Option<Duration>,
    pub history_len: usize,
    pub common_sequence_min_count: u32,
    pub instant_batch_threshold: usize,
    pub ultra_batch_threshold: usize,
    pub bigrams: HashMap<String, String>,
}

impl From<&MachineConfig> for MachineSettings {
    fn from(cfg: &MachineConfig) -> Self {
        Self {
            unchecked_transitions: cfg.unchecked_transitions,
            parallel_mode: cfg.parallel_mode,
            parallel_batch_size: cfg.parallel_batch_size.max(1),
            error_recovery: (cfg.error_recovery_ms > 0)
                .then(|| millis_to_duration(cfg.error_recovery_ms)),
            history_len: cfg.history_len.max(1),
            common_sequence_min_count: cfg.common_sequence_min_count.max(1),
            instant_batch_threshold: cfg.instant_batch_threshold,
            ultra_batch_threshold: cfg.ultra_batch_threshold,
            bigrams: cfg.bigrams.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        }
    }
}

impl Default for MachineSettings {
    fn default() -> Self {
        Self::from(&MachineConfig::default())
    }
}

/// Duration policy settings
#[derive(Debug, Clone)]
pub struct TimingSettings {
    pub transition_in: Duration,
    pub transition_out: Duration,
    pub glyph_hold: Duration,
    pub word_hold: Duration,
    pub min_transition: Duration,
    pub min_hold: Duration,
    pub fast_multiplier: f64,
    pub ultra_multiplier: f64,
    pub instant_multiplier: f64,
}

impl From<&TimingConfig> for TimingSettings {
    fn from(cfg: &TimingConfig) -> Self {
        Self {
            transition_in: millis_to_duration(cfg.transition_in_ms),
            transition_out: millis_to_duration(cfg.transition_out_ms),
            glyph_hold: millis_to_duration(cfg.glyph_hold_ms),
            word_hold: millis_to_duration(cfg.word_hold_ms),
            min_transition: millis_to_duration(cfg.min_transition_ms),
            min_hold: millis_to_duration(cfg.min_hold_ms),
            fast_multiplier: cfg.fast_multiplier,
            ultra_multiplier: cfg.ultra_multiplier,
            instant_multiplier: cfg.instant_multiplier,
        }
    }
}

impl Default for TimingSettings {
    fn default() -> Self {
        Self::from(&TimingConfig::default())
    }
}

/// Sequencing queue settings
#[derive(Debug, Clone)]
pub struct QueueSettings {
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub pause_on_error: bool,
    pub auto_start: bool,
    pub base_delay: Duration,
    pub batch_delay: Duration,
    pub fast_sequence_delay: Duration,
    pub fallback_item_estimate: Duration,
    pub parallel_batches: bool,
    pub common_pairs: HashSet<(String, String)>,
}

impl From<&QueueConfig> for QueueSettings {
    fn from(cfg: &QueueConfig) -> Self {
        Self {
            max_retries: cfg.max_retries,
            retry_delay: millis_to_duration(cfg.retry_delay_ms),
            pause_on_error: cfg.pause_on_error,
            auto_start: cfg.auto_start,
            base_delay: millis_to_duration(cfg.base_delay_ms),
            batch_delay: millis_to_duration(cfg.batch_delay_ms),
            fast_sequence_delay: millis_to_duration(cfg.fast_sequence_delay_ms),
            fallback_item_estimate: millis_to_duration(cfg.fallback_item_estimate_ms),
            parallel_batches: cfg.parallel_batches,
            common_pairs: cfg.common_pairs.iter().cloned().collect(),
        }
    }
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self::from(&QueueConfig::default())
    }
}

/// All runtime settings
#[derive(Debug, Clone)]
pub struct RuntimeSettings {
    pub video_root: PathBuf,
    pub file_extension: String,
    pub event_capacity: usize,
    pub pool: PoolSettings,
    pub machine: MachineSettings,
    pub timing: TimingSettings,
    pub queue: QueueSettings,
}

impl RuntimeSettings {
    /// Build runtime settings from a loaded TOML configuration
    pub fn from_toml(config: &TomlConfig) -> Self {
        Self {
            video_root: config
                .video_root
                .clone()
                .unwrap_or_else(|| PathBuf::from("videos")),
            file_extension: config.pool.file_extension.clone(),
            event_capacity: config.event_capacity.unwrap_or(256),
            pool: PoolSettings::from(&config.pool),
            machine: MachineSettings::from(&config.machine),
            timing: TimingSettings::from(&config.timing),
            queue: QueueSettings::from(&config.queue),
        }
    }
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self::from_toml(&TomlConfig::default())
    }
}
