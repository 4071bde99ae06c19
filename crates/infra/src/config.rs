//! Configuration of the commit path.

use std::str::FromStr;
use std::time::Duration;

use loadorder_labels::{DEFAULT_OFFSET_MINUTES, LabelIdGenerator};

use crate::retry::RetryPolicy;

/// Settings for committing orders and printing their labels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitConfig {
    /// Retry policy of the read-back that verifies the header write.
    pub verify_retry: RetryPolicy,
    /// How long after a session starts changes count as initial loading.
    pub dirty_grace: Duration,
    /// Timezone of label timestamps, in minutes east of UTC.
    pub label_utc_offset_minutes: i32,
}

impl Default for CommitConfig {
    fn default() -> Self {
        Self {
            verify_retry: RetryPolicy::default(),
            dirty_grace: Duration::from_millis(500),
            label_utc_offset_minutes: DEFAULT_OFFSET_MINUTES,
        }
    }
}

impl CommitConfig {
    /// Defaults overridden by `LOADORDER_*` environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let verify_retry = RetryPolicy {
            max_attempts: env_or("LOADORDER_VERIFY_MAX_ATTEMPTS", defaults.verify_retry.max_attempts),
            initial_delay: Duration::from_millis(env_or(
                "LOADORDER_VERIFY_INITIAL_DELAY_MS",
                defaults.verify_retry.initial_delay.as_millis() as u64,
            )),
            multiplier: defaults.verify_retry.multiplier,
            max_delay: Duration::from_millis(env_or(
                "LOADORDER_VERIFY_MAX_DELAY_MS",
                defaults.verify_retry.max_delay.as_millis() as u64,
            )),
        };
        Self {
            verify_retry,
            dirty_grace: Duration::from_millis(env_or(
                "LOADORDER_DIRTY_GRACE_MS",
                defaults.dirty_grace.as_millis() as u64,
            )),
            label_utc_offset_minutes: env_or(
                "LOADORDER_LABEL_UTC_OFFSET_MINUTES",
                defaults.label_utc_offset_minutes,
            ),
        }
    }

    pub fn with_verify_retry(mut self, policy: RetryPolicy) -> Self {
        self.verify_retry = policy;
        self
    }

    pub fn with_dirty_grace(mut self, grace: Duration) -> Self {
        self.dirty_grace = grace;
        self
    }

    pub fn with_label_utc_offset_minutes(mut self, minutes: i32) -> Self {
        self.label_utc_offset_minutes = minutes;
        self
    }

    /// Label generator for the configured timezone; falls back to the
    /// default zone when the offset is out of range.
    pub fn label_generator(&self) -> LabelIdGenerator {
        LabelIdGenerator::with_offset_minutes(self.label_utc_offset_minutes).unwrap_or_else(|| {
            tracing::warn!(
                offset = self.label_utc_offset_minutes,
                "label UTC offset out of range; using default"
            );
            LabelIdGenerator::default()
        })
    }
}

fn env_or<T>(name: &str, default: T) -> T
where
    T: FromStr + Copy + std::fmt::Debug,
{
    match std::env::var(name) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(var = name, value = %raw, ?default, "unparseable setting; using default");
            default
        }),
        Err(_) => default,
    }
}
