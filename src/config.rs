use crate::defaults;
use crate::error::{Result, TakepickError};
use crate::features::ExtractionConfig;
use crate::gates::ThresholdConfig;
use crate::rank::{ConfidenceCutoffs, WeightConfig};
use crate::selection::{LowConfidencePolicy, SelectionConfig};
use crate::session::manifest::CostConfig;
use crate::session::synth::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub paths: PathsConfig,
    pub audio: AudioConfig,
    pub extraction: ExtractionConfig,
    pub thresholds: ThresholdConfig,
    pub weights: WeightConfig,
    pub confidence: ConfidenceCutoffs,
    pub selection: SelectionConfig,
    pub topup: TopupConfig,
    pub cost: CostConfig,
}

/// Filesystem locations
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct PathsConfig {
    /// Sessions root; defaults to the platform data directory.
    pub root: Option<PathBuf>,
}

/// Candidate audio decoding
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AudioConfig {
    pub decoder: DecoderKind,
    pub ffmpeg_binary: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DecoderKind {
    /// WAV files only, decoded in-process.
    Wav,
    /// Any container ffmpeg understands.
    Ffmpeg,
}

/// Top-up and synthesis retry behaviour
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TopupConfig {
    /// Candidates requested per top-up round.
    pub batch_size: u32,
    /// Rounds per chunk before the chunk is declared exhausted.
    pub max_rounds: u32,
    /// Attempts per synthesis request (transient failures only).
    pub max_attempts: u32,
    pub initial_backoff: String,
    pub max_backoff: String,
    pub backoff_multiplier: f64,
    pub request_timeout: String,
    /// Synthesis endpoint; without one, top-up produces no candidates.
    pub synth_url: Option<String>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            decoder: DecoderKind::Wav,
            ffmpeg_binary: "ffmpeg".to_string(),
        }
    }
}

impl Default for TopupConfig {
    fn default() -> Self {
        Self {
            batch_size: defaults::TOPUP_BATCH_SIZE,
            max_rounds: defaults::TOPUP_MAX_ROUNDS,
            max_attempts: defaults::SYNTH_MAX_ATTEMPTS,
            initial_backoff: defaults::SYNTH_INITIAL_BACKOFF.to_string(),
            max_backoff: defaults::SYNTH_MAX_BACKOFF.to_string(),
            backoff_multiplier: 2.0,
            request_timeout: defaults::SYNTH_TIMEOUT.to_string(),
            synth_url: None,
        }
    }
}

fn parse_duration(key: &str, value: &str) -> Result<Duration> {
    humantime::parse_duration(value.trim())
        .map_err(|e| TakepickError::config(key, format!("'{}' is not a duration: {}", value, e)))
}

impl TopupConfig {
    /// Backoff schedule with durations parsed.
    pub fn retry_policy(&self) -> Result<RetryPolicy> {
        Ok(RetryPolicy {
            max_attempts: self.max_attempts,
            initial_backoff: parse_duration("topup.initial_backoff", &self.initial_backoff)?,
            max_backoff: parse_duration("topup.max_backoff", &self.max_backoff)?,
            multiplier: self.backoff_multiplier,
        })
    }

    pub fn timeout(&self) -> Result<Duration> {
        parse_duration("topup.request_timeout", &self.request_timeout)
    }

    fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(TakepickError::config("topup.batch_size", "must be at least 1"));
        }
        if self.max_attempts == 0 {
            return Err(TakepickError::config("topup.max_attempts", "must be at least 1"));
        }
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(TakepickError::config(
                "topup.backoff_multiplier",
                "must be a number no smaller than 1.0",
            ));
        }
        let policy = self.retry_policy()?;
        if policy.initial_backoff > policy.max_backoff {
            return Err(TakepickError::config(
                "topup.initial_backoff",
                "must not exceed topup.max_backoff",
            ));
        }
        if self.timeout()?.is_zero() {
            return Err(TakepickError::config("topup.request_timeout", "must be positive"));
        }
        Ok(())
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Returns an error if the file is missing or contains invalid TOML.
    /// Missing fields will use default values.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                TakepickError::ConfigFileNotFound {
                    path: path.display().to_string(),
                }
            } else {
                e.into()
            }
        })?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from a file or return defaults if file doesn't exist
    ///
    /// Only returns defaults if the file is missing.
    /// Returns errors for invalid TOML.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        match Self::load(path) {
            Err(TakepickError::ConfigFileNotFound { .. }) => Ok(Self::default()),
            other => other,
        }
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - TAKEPICK_ROOT → paths.root
    /// - TAKEPICK_SYNTH_URL → topup.synth_url
    /// - TAKEPICK_LOW_CONFIDENCE_POLICY → selection.low_confidence_policy
    pub fn with_env_overrides(mut self) -> Result<Self> {
        if let Ok(root) = std::env::var("TAKEPICK_ROOT")
            && !root.is_empty()
        {
            self.paths.root = Some(PathBuf::from(root));
        }

        if let Ok(url) = std::env::var("TAKEPICK_SYNTH_URL")
            && !url.is_empty()
        {
            self.topup.synth_url = Some(url);
        }

        if let Ok(policy) = std::env::var("TAKEPICK_LOW_CONFIDENCE_POLICY")
            && !policy.is_empty()
        {
            self.selection.low_confidence_policy = policy
                .parse::<LowConfidencePolicy>()
                .map_err(|e| TakepickError::config("TAKEPICK_LOW_CONFIDENCE_POLICY", e))?;
        }

        Ok(self)
    }

    /// Check every section. Called once at startup so that bad settings never
    /// surface mid-run.
    pub fn validate(&self) -> Result<()> {
        self.thresholds.validate()?;
        self.weights.validate()?;
        self.confidence.validate()?;
        self.topup.validate()?;

        let bar = self.selection.prefilter_quality_bar;
        if !bar.is_finite() || !(0.0..=1.0).contains(&bar) {
            return Err(TakepickError::config(
                "selection.prefilter_quality_bar",
                "must be between 0.0 and 1.0",
            ));
        }
        if !(self.cost.per_candidate_usd.is_finite() && self.cost.per_candidate_usd >= 0.0) {
            return Err(TakepickError::config("cost.per_candidate_usd", "must be non-negative"));
        }
        if !(self.cost.per_candidate_secs.is_finite() && self.cost.per_candidate_secs >= 0.0) {
            return Err(TakepickError::config("cost.per_candidate_secs", "must be non-negative"));
        }

        let e = &self.extraction;
        if e.min_analyzable_ms == 0 {
            return Err(TakepickError::config("extraction.min_analyzable_ms", "must be positive"));
        }
        if e.continuity_window_ms == 0 {
            return Err(TakepickError::config(
                "extraction.continuity_window_ms",
                "must be positive",
            ));
        }
        if !(e.pitch_min_hz > 0.0 && e.pitch_min_hz < e.pitch_max_hz) {
            return Err(TakepickError::config(
                "extraction.pitch_min_hz",
                "must be positive and below pitch_max_hz",
            ));
        }
        Ok(())
    }

    /// Sessions root: `paths.root`, else `<data dir>/takepick/sessions`.
    pub fn sessions_root(&self) -> PathBuf {
        self.paths.root.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("takepick")
                .join("sessions")
        })
    }

    /// Render as TOML (for `config show` / `config init`).
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| TakepickError::config("config", e.to_string()))
    }

    /// Get the default configuration file path
    ///
    /// Returns ~/.config/takepick/config.toml on Linux
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("takepick")
            .join("config.toml")
    }
}
