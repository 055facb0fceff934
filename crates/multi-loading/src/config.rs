#![forbid(unsafe_code)]

//! Tracker configuration with environment overrides.
//!
//! Environment variables:
//! - `MULTI_LOADING_LID_PREFIX` (string; no whitespace or control characters)
//! - `MULTI_LOADING_BUSY_WARN` (non-negative integer; `0` disables the warning)
//!
//! Parsing never fails outright: an invalid value keeps the default for that
//! field and is reported in [`TrackerConfigParse::errors`].

use std::env;
use std::fmt;

pub const ENV_LID_PREFIX: &str = "MULTI_LOADING_LID_PREFIX";
pub const ENV_BUSY_WARN: &str = "MULTI_LOADING_BUSY_WARN";

/// Default prefix for generated lids.
pub const DEFAULT_LID_PREFIX: &str = "lid-";

/// Configuration for a [`LoadingTracker`](crate::LoadingTracker).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackerConfig {
    /// Prefix of ids minted by the default generator.
    pub lid_prefix: String,
    /// Log a warning whenever more than this many lids are active
    /// (0 = never warn). Diagnostic only; lids are never expired.
    pub busy_warn_threshold: usize,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            lid_prefix: DEFAULT_LID_PREFIX.to_owned(),
            busy_warn_threshold: 0,
        }
    }
}

/// Configuration parse diagnostics (env + validation).
#[derive(Debug, Clone)]
pub struct TrackerConfigParse {
    pub config: TrackerConfig,
    pub errors: Vec<TrackerConfigError>,
}

/// Configuration error with field context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackerConfigError {
    pub field: &'static str,
    pub value: String,
    pub message: String,
}

impl TrackerConfigError {
    fn new(field: &'static str, value: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field,
            value: value.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for TrackerConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={} ({})", self.field, self.value, self.message)
    }
}

impl std::error::Error for TrackerConfigError {}

impl TrackerConfig {
    /// Set the prefix used by the default lid generator.
    #[must_use]
    pub fn with_lid_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.lid_prefix = prefix.into();
        self
    }

    /// Set the busy-warning threshold (0 disables it).
    #[must_use]
    pub fn with_busy_warn_threshold(mut self, threshold: usize) -> Self {
        self.busy_warn_threshold = threshold;
        self
    }

    /// Parse config from environment variables.
    #[must_use]
    pub fn from_env() -> TrackerConfig {
        Self::from_env_with_diagnostics().config
    }

    /// Parse config from environment variables and return diagnostics.
    #[must_use]
    pub fn from_env_with_diagnostics() -> TrackerConfigParse {
        from_env_with(|key| env::var(key).ok())
    }

    /// Validate config constraints and return all violations.
    pub fn validate(&self) -> Result<(), Vec<TrackerConfigError>> {
        let mut errors = Vec::new();
        if let Some(message) = prefix_violation(&self.lid_prefix) {
            errors.push(TrackerConfigError::new(
                "lid_prefix",
                self.lid_prefix.clone(),
                message,
            ));
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Whether `active` lids exceed the configured warning threshold.
    #[must_use]
    pub(crate) fn is_over_busy_threshold(&self, active: usize) -> bool {
        self.busy_warn_threshold > 0 && active > self.busy_warn_threshold
    }
}

pub(crate) fn from_env_with<F>(mut get: F) -> TrackerConfigParse
where
    F: FnMut(&str) -> Option<String>,
{
    let mut config = TrackerConfig::default();
    let mut errors = Vec::new();

    if let Some(value) = get(ENV_LID_PREFIX) {
        match prefix_violation(&value) {
            None => config.lid_prefix = value,
            Some(message) => errors.push(TrackerConfigError::new("lid_prefix", value, message)),
        }
    }

    if let Some(value) = get(ENV_BUSY_WARN) {
        match parse_usize(&value) {
            Some(parsed) => config.busy_warn_threshold = parsed,
            None => errors.push(TrackerConfigError::new(
                "busy_warn_threshold",
                value,
                "expected non-negative integer",
            )),
        }
    }

    TrackerConfigParse { config, errors }
}

fn prefix_violation(prefix: &str) -> Option<&'static str> {
    if prefix.chars().any(|c| c.is_whitespace() || c.is_control()) {
        Some("must not contain whitespace or control characters")
    } else {
        None
    }
}

#[inline]
fn parse_usize(value: &str) -> Option<usize> {
    value.trim().parse::<usize>().ok()
}
