//! Outcome of a single `JobProcessor::process` call.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What the processor did with a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ProcessOutcome {
    /// Nothing was claimed (not due, already taken, or gone).
    Skipped,

    Completed,

    /// Put back to `pending` for another try.
    Rescheduled {
        attempt: u32,
        next_run_at: DateTime<Utc>,
    },

    /// Terminal failure.
    Failed { reason: String },
}

impl ProcessOutcome {
    pub fn is_skipped(&self) -> bool {
        matches!(self, ProcessOutcome::Skipped)
    }
}
