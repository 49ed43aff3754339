//! # Gate Configuration
//!
//! Defaults, environment loading, and bounds validation.
//!
//! ## Environment Variables
//!
//! | Variable | Default |
//! |----------|---------|
//! | `QG_MAX_SIGNAL_AGE_MS` | `30000` |
//! | `QG_SWEEP_INTERVAL_MS` | `2000` |
//! | `QG_COHERENCE_THRESHOLD` | `0.30` |
//! | `QG_FORCED_CONFIDENCE` | `0.5` |
//! | `QG_CHECKER_TIMEOUT_MS` | `10000` |
//! | `QG_FAN_OUT` | `concurrent` |
//! | `QG_SELF_SCHEDULED_SWEEP` | `true` |
//! | `QG_MAX_LIVE_SIGNALS` | `1000` |
//! | `QG_OUTCOME_HISTORY` | `256` |
//! | `QG_CHECKER_STALE_AFTER_MS` | `300000` |

use crate::domain::DEFAULT_COHERENCE_THRESHOLD;
use crate::error::{GateError, GateResult};
use std::str::FromStr;
use std::time::Duration;

/// Configuration bounds.
pub mod limits {
    use std::time::Duration;

    pub const MIN_SIGNAL_AGE: Duration = Duration::from_secs(1);
    pub const MAX_SIGNAL_AGE: Duration = Duration::from_secs(600);
    pub const MAX_LIVE_SIGNALS: usize = 100_000;
    pub const MAX_OUTCOME_HISTORY: usize = 10_000;
    pub const MAX_CHECKER_STALE_AFTER: Duration = Duration::from_secs(86_400);
}

/// How a proposal reaches its checkers
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum FanOutMode {
    /// One task per checker, joined before `propose` returns
    #[default]
    Concurrent,
    /// Checkers evaluated one after another on the caller's task
    Sequential,
}

impl FromStr for FanOutMode {
    type Err = GateError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "concurrent" => Ok(FanOutMode::Concurrent),
            "sequential" => Ok(FanOutMode::Sequential),
            other => Err(GateError::InvalidConfig {
                field: "fan_out",
                reason: format!("expected `concurrent` or `sequential`, got `{other}`"),
            }),
        }
    }
}

/// Quorum Gate configuration
#[derive(Clone, Debug)]
pub struct GateConfig {
    /// Signals older than this are swept as decoherent
    pub max_signal_age: Duration,
    /// Period of the self-scheduled stale sweep
    pub sweep_interval: Duration,
    /// Coherence must be strictly above this to collapse
    pub coherence_threshold: f64,
    /// Confidence attached to forced fallback votes
    pub forced_confidence: f64,
    /// Deadline for a single checker evaluation
    pub checker_timeout: Duration,
    pub fan_out: FanOutMode,
    /// Start the sweeper task when the gate is built
    pub self_scheduled_sweep: bool,
    /// Upper bound on simultaneously live signals
    pub max_live_signals: usize,
    /// Terminal outcomes retained for monitoring
    pub outcome_history: usize,
    /// A checker silent for longer than this is reported stale
    pub checker_stale_after: Duration,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            max_signal_age: Duration::from_secs(30),
            sweep_interval: Duration::from_secs(2),
            coherence_threshold: DEFAULT_COHERENCE_THRESHOLD,
            forced_confidence: 0.5,
            checker_timeout: Duration::from_secs(10),
            fan_out: FanOutMode::Concurrent,
            self_scheduled_sweep: true,
            max_live_signals: 1_000,
            outcome_history: 256,
            checker_stale_after: Duration::from_secs(300),
        }
    }
}

impl GateConfig {
    /// Load from `QG_*` environment variables, falling back to defaults.
    pub fn from_env() -> GateResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup. Values that are present but
    /// unparseable are errors.
    pub fn from_lookup<F>(lookup: F) -> GateResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let config = Self {
            max_signal_age: millis(&lookup, "QG_MAX_SIGNAL_AGE_MS", "max_signal_age")?
                .unwrap_or(defaults.max_signal_age),
            sweep_interval: millis(&lookup, "QG_SWEEP_INTERVAL_MS", "sweep_interval")?
                .unwrap_or(defaults.sweep_interval),
            coherence_threshold: parsed(&lookup, "QG_COHERENCE_THRESHOLD", "coherence_threshold")?
                .unwrap_or(defaults.coherence_threshold),
            forced_confidence: parsed(&lookup, "QG_FORCED_CONFIDENCE", "forced_confidence")?
                .unwrap_or(defaults.forced_confidence),
            checker_timeout: millis(&lookup, "QG_CHECKER_TIMEOUT_MS", "checker_timeout")?
                .unwrap_or(defaults.checker_timeout),
            fan_out: match lookup("QG_FAN_OUT") {
                Some(value) => value.parse()?,
                None => defaults.fan_out,
            },
            self_scheduled_sweep: flag(&lookup, "QG_SELF_SCHEDULED_SWEEP", "self_scheduled_sweep")?
                .unwrap_or(defaults.self_scheduled_sweep),
            max_live_signals: parsed(&lookup, "QG_MAX_LIVE_SIGNALS", "max_live_signals")?
                .unwrap_or(defaults.max_live_signals),
            outcome_history: parsed(&lookup, "QG_OUTCOME_HISTORY", "outcome_history")?
                .unwrap_or(defaults.outcome_history),
            checker_stale_after: millis(&lookup, "QG_CHECKER_STALE_AFTER_MS", "checker_stale_after")?
                .unwrap_or(defaults.checker_stale_after),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn max_signal_age_ms(&self) -> u64 {
        self.max_signal_age.as_millis() as u64
    }

    /// Validate against `limits`.
    pub fn validate(&self) -> GateResult<()> {
        if self.max_signal_age < limits::MIN_SIGNAL_AGE
            || self.max_signal_age > limits::MAX_SIGNAL_AGE
        {
            return invalid(
                "max_signal_age",
                format!(
                    "{:?} outside {:?}..={:?}",
                    self.max_signal_age,
                    limits::MIN_SIGNAL_AGE,
                    limits::MAX_SIGNAL_AGE
                ),
            );
        }

        // The sweep has to run several times per signal lifetime
        if self.sweep_interval.is_zero() || self.sweep_interval > self.max_signal_age / 2 {
            return invalid(
                "sweep_interval",
                format!(
                    "{:?} must be non-zero and at most half of max_signal_age ({:?})",
                    self.sweep_interval, self.max_signal_age
                ),
            );
        }

        if !(0.0..1.0).contains(&self.coherence_threshold) {
            return invalid(
                "coherence_threshold",
                format!("{} outside [0, 1)", self.coherence_threshold),
            );
        }

        if !(self.forced_confidence > 0.0 && self.forced_confidence <= 1.0) {
            return invalid(
                "forced_confidence",
                format!("{} outside (0, 1]", self.forced_confidence),
            );
        }

        if self.checker_timeout.is_zero() || self.checker_timeout >= self.max_signal_age {
            return invalid(
                "checker_timeout",
                format!(
                    "{:?} must be non-zero and below max_signal_age ({:?})",
                    self.checker_timeout, self.max_signal_age
                ),
            );
        }

        if self.max_live_signals == 0 || self.max_live_signals > limits::MAX_LIVE_SIGNALS {
            return invalid(
                "max_live_signals",
                format!(
                    "{} outside 1..={}",
                    self.max_live_signals,
                    limits::MAX_LIVE_SIGNALS
                ),
            );
        }

        if self.outcome_history > limits::MAX_OUTCOME_HISTORY {
            return invalid(
                "outcome_history",
                format!(
                    "{} exceeds {}",
                    self.outcome_history,
                    limits::MAX_OUTCOME_HISTORY
                ),
            );
        }

        if self.checker_stale_after.is_zero()
            || self.checker_stale_after > limits::MAX_CHECKER_STALE_AFTER
        {
            return invalid(
                "checker_stale_after",
                format!(
                    "{:?} must be in (0, {:?}]",
                    self.checker_stale_after,
                    limits::MAX_CHECKER_STALE_AFTER
                ),
            );
        }

        Ok(())
    }
}

fn invalid(field: &'static str, reason: String) -> GateResult<()> {
    Err(GateError::InvalidConfig { field, reason })
}

fn parsed<T, F>(lookup: &F, key: &str, field: &'static str) -> GateResult<Option<T>>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| GateError::InvalidConfig {
                field,
                reason: format!("cannot parse {key}={raw}"),
            }),
    }
}

fn millis<F>(lookup: &F, key: &str, field: &'static str) -> GateResult<Option<Duration>>
where
    F: Fn(&str) -> Option<String>,
{
    Ok(parsed::<u64, F>(lookup, key, field)?.map(Duration::from_millis))
}

fn flag<F>(lookup: &F, key: &str, field: &'static str) -> GateResult<Option<bool>>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" => Ok(Some(true)),
            "0" | "false" | "no" => Ok(Some(false)),
            _ => Err(GateError::InvalidConfig {
                field,
                reason: format!("cannot parse {key}={raw} as a boolean"),
            }),
        },
    }
}
