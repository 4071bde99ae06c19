//! Dirty-state tracking.
//!
//! Compares a structural fingerprint of the aggregate against the one taken at
//! the last successful commit. Changes are coalesced: mutations only mark the
//! tracker as needing a check, and the comparison runs once on the next read.

use std::time::{Duration, Instant};

use serde_json::Value as JsonValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Initial data is still loading; changes re-baseline instead of flagging.
    Loading { until: Instant },
    Tracking,
}

#[derive(Debug, Clone)]
pub struct DirtyStateTracker {
    phase: Phase,
    baseline: Option<JsonValue>,
    check_pending: bool,
    dirty: bool,
}

impl Default for DirtyStateTracker {
    fn default() -> Self {
        Self::tracking()
    }
}

impl DirtyStateTracker {
    /// Tracker that ignores changes for `grace` after creation.
    pub fn with_grace(grace: Duration, now: Instant) -> Self {
        let phase = if grace.is_zero() {
            Phase::Tracking
        } else {
            Phase::Loading { until: now + grace }
        };
        Self {
            phase,
            baseline: None,
            check_pending: false,
            dirty: false,
        }
    }

    /// Tracker that flags changes right away.
    pub fn tracking() -> Self {
        Self {
            phase: Phase::Tracking,
            baseline: None,
            check_pending: false,
            dirty: false,
        }
    }

    pub fn is_loading(&self, now: Instant) -> bool {
        matches!(self.phase, Phase::Loading { until } if now < until)
    }

    /// Record that something changed; the comparison is deferred.
    pub fn mark_changed(&mut self) {
        self.check_pending = true;
    }

    pub fn check_pending(&self) -> bool {
        self.check_pending
    }

    /// Last computed answer, without running a pending check.
    pub fn last_known(&self) -> bool {
        self.dirty
    }

    /// Run the pending check, if any, and report dirtiness.
    ///
    /// `snapshot` yields the current fingerprint and whether the aggregate
    /// holds significant data; it is only called when a check is pending.
    pub fn evaluate<F>(&mut self, now: Instant, snapshot: F) -> bool
    where
        F: FnOnce() -> (JsonValue, bool),
    {
        if !self.check_pending {
            return self.dirty;
        }
        self.check_pending = false;
        let (fingerprint, significant) = snapshot();

        if self.is_loading(now) {
            self.baseline = Some(fingerprint);
            self.dirty = false;
            return false;
        }
        self.phase = Phase::Tracking;

        let differs = self.baseline.as_ref() != Some(&fingerprint);
        self.dirty = differs && significant;
        self.dirty
    }

    /// Leave the loading phase early, taking `fingerprint` as the baseline.
    pub fn finish_loading(&mut self, fingerprint: JsonValue) {
        self.phase = Phase::Tracking;
        self.adopt_baseline(fingerprint);
    }

    /// Take `fingerprint` as the committed state and clear the flag.
    pub fn adopt_baseline(&mut self, fingerprint: JsonValue) {
        self.baseline = Some(fingerprint);
        self.check_pending = false;
        self.dirty = false;
    }

    /// Keep the flag raised regardless of the next comparison's inputs
    /// (used after a failed commit attempt).
    pub fn force_dirty(&mut self) {
        self.dirty = true;
        self.check_pending = false;
    }
}
