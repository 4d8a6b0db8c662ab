//! Settings structs controlling writes, evaluation, and waits.
//!
//! These are plain config values crossing the public boundary, with
//! defaults chosen so that `Settings::default()` gives the common embedded
//! behavior: signal waiters, increment the clock by one, propagate global
//! modifications immediately.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Controls applied to every write into the knowledge map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateSettings {
    /// Treat every key as local: nothing enters the outbound modified set.
    pub treat_globals_as_locals: bool,
    /// Wake threads blocked in `wait` after a successful write.
    pub signal_changes: bool,
    /// Skip the write-quality check and overwrite unconditionally.
    pub always_overwrite: bool,
    /// Record `.`-prefixed (local) keys in the local modified set, for
    /// checkpointing collaborators.
    pub track_local_changes: bool,
    /// How far the Lamport clock advances per write.
    pub clock_increment: u64,
}

impl Default for UpdateSettings {
    fn default() -> Self {
        Self {
            treat_globals_as_locals: false,
            signal_changes: true,
            always_overwrite: false,
            track_local_changes: false,
            clock_increment: 1,
        }
    }
}

/// Controls for a single `evaluate` call.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EvalSettings {
    /// Write behavior for assignments made during evaluation.
    pub update: UpdateSettings,
    /// Keep modified keys queued instead of handing them to the transport;
    /// a later `send_modifieds` flushes them.
    pub delay_sending_modifieds: bool,
    /// Statement logged before evaluation, with `{key}` interpolation.
    pub pre_print_statement: Option<String>,
    /// Statement logged after evaluation, with `{key}` interpolation.
    pub post_print_statement: Option<String>,
}

impl EvalSettings {
    /// Eval settings that queue modifications instead of sending them.
    #[must_use]
    pub fn delayed() -> Self {
        Self {
            delay_sending_modifieds: true,
            ..Self::default()
        }
    }
}

/// Controls for a single `wait` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaitSettings {
    /// Evaluation behavior for each re-check.
    pub eval: EvalSettings,
    /// Longest time to sleep between re-checks. Re-checks happen on timeout
    /// even without a wake signal, since remote deliveries may not signal.
    pub poll_frequency: Duration,
    /// Total time budget. `None` waits forever; `Some(Duration::ZERO)`
    /// evaluates exactly once.
    pub max_wait_time: Option<Duration>,
}

impl Default for WaitSettings {
    fn default() -> Self {
        Self {
            eval: EvalSettings::default(),
            poll_frequency: Duration::from_millis(100),
            max_wait_time: None,
        }
    }
}

impl WaitSettings {
    /// Wait settings bounded by a total time budget.
    #[must_use]
    pub fn with_max_wait(max_wait_time: Duration) -> Self {
        Self {
            max_wait_time: Some(max_wait_time),
            ..Self::default()
        }
    }
}
