use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// What started a reconciliation run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunTrigger {
    Scheduled,
    UserCreated,
    FollowCreated,
    UserDeleted,
}

/// Per-run context carried from the driver down to the applier
///
/// Log output of a run is attributed through its `run_id`; `started_at` is the single clock
/// reading every time-window computation of the run uses.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub run_id: Uuid,
    pub trigger: RunTrigger,
    pub started_at: DateTime<Utc>,
}

impl RunContext {
    pub fn new(trigger: RunTrigger) -> Self {
        Self::with_run_id(Uuid::new_v4(), trigger)
    }

    /// Reuses an existing correlation id (e.g. the HTTP request id)
    pub fn with_run_id(run_id: Uuid, trigger: RunTrigger) -> Self {
        Self {
            run_id,
            trigger,
            started_at: Utc::now(),
        }
    }

    /// Pins the run clock
    pub fn at(mut self, started_at: DateTime<Utc>) -> Self {
        self.started_at = started_at;
        self
    }

    pub fn span(&self) -> tracing::Span {
        tracing::info_span!(
            "reconciliation_run",
            run_id = %self.run_id,
            trigger = ?self.trigger,
        )
    }
}
