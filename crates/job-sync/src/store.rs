// crates/job-sync/src/store.rs
//! In-memory state of a single tracked job. Pure data + transition rules.
//!
//! The store has no I/O and no locking: the arbiter task is its single
//! owner, so applies are already serialized. Correctness against the
//! dual-transport race comes from `apply` being idempotent and rejecting
//! anything that would regress progress or thaw a terminal record.

use sentinelsync_types::{JobStatus, Progress};

use crate::event::JobEvent;

/// Outcome of applying one normalized event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ApplyOutcome {
    /// The event changed the record. `terminal` is true when this apply
    /// froze the record — the caller must stop both transports.
    Applied { terminal: bool },
    /// The event was dropped without touching the record.
    Rejected(RejectReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RejectReason {
    /// Record already terminal; late events are counted, never applied.
    Frozen,
    /// Event status ranks below the current status.
    StaleStatus,
    /// Event carries a lower progress percentage than already observed.
    StaleProgress,
    /// Event carries a percentage outside the 0..=100 contract.
    InvalidProgress,
}

/// Pure projection of the store, cloned out on every read.
#[derive(Debug, Clone, Default)]
pub(crate) struct StoreSnapshot {
    pub status: Option<JobStatus>,
    pub progress: Progress,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
}

pub(crate) struct JobStore {
    status: JobStatus,
    progress: Progress,
    result: Option<serde_json::Value>,
    error: Option<String>,
    rejected: u64,
}

impl JobStore {
    /// A record exists from the moment tracking begins, before any network
    /// confirmation, in state Pending.
    pub fn new() -> Self {
        Self {
            status: JobStatus::Pending,
            progress: Progress::default(),
            result: None,
            error: None,
            rejected: 0,
        }
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Count of events dropped by `apply`, for diagnostics.
    pub fn rejected_count(&self) -> u64 {
        self.rejected
    }

    pub fn read(&self) -> StoreSnapshot {
        StoreSnapshot {
            status: Some(self.status),
            progress: self.progress.clone(),
            result: self.result.clone(),
            error: self.error.clone(),
        }
    }

    /// Apply one normalized event. Idempotent: replaying an already-applied
    /// terminal event produces no further observable change.
    pub fn apply(&mut self, event: &JobEvent) -> ApplyOutcome {
        if self.status.is_terminal() {
            self.rejected += 1;
            tracing::debug!(
                origin = %event.origin,
                current = ?self.status,
                "event for frozen terminal record dropped"
            );
            return ApplyOutcome::Rejected(RejectReason::Frozen);
        }

        if let Some(status) = event.status {
            if status.rank() < self.status.rank() {
                self.rejected += 1;
                tracing::debug!(
                    origin = %event.origin,
                    current = ?self.status,
                    incoming = ?status,
                    "stale status event dropped"
                );
                return ApplyOutcome::Rejected(RejectReason::StaleStatus);
            }
        }

        if let Some(incoming) = event.progress.as_ref().and_then(|p| p.percentage) {
            // The wire contract bounds percentage to 0..=100. Accepting a
            // rogue value would also wedge the monotonicity watermark, so
            // it is dropped like any other bad frame. NaN lands here too.
            if !(0.0..=100.0).contains(&incoming) {
                self.rejected += 1;
                tracing::debug!(
                    origin = %event.origin,
                    incoming_pct = incoming,
                    "out-of-range progress dropped"
                );
                return ApplyOutcome::Rejected(RejectReason::InvalidProgress);
            }
            if let Some(current) = self.progress.percentage {
                if incoming < current {
                    self.rejected += 1;
                    tracing::debug!(
                        origin = %event.origin,
                        current_pct = current,
                        incoming_pct = incoming,
                        "progress regression dropped"
                    );
                    return ApplyOutcome::Rejected(RejectReason::StaleProgress);
                }
            }
        }

        if let Some(status) = event.status {
            self.status = status;
        }
        if let Some(progress) = &event.progress {
            // Merge field-wise: a progress frame without a percentage must
            // not wipe an already-observed percentage.
            if progress.percentage.is_some() {
                self.progress.percentage = progress.percentage;
            }
            if progress.current_step.is_some() {
                self.progress.current_step = progress.current_step.clone();
            }
            if progress.message.is_some() {
                self.progress.message = progress.message.clone();
            }
        }
        match self.status {
            JobStatus::Completed => {
                if self.result.is_none() {
                    self.result = event.result.clone();
                }
            }
            JobStatus::Failed => {
                if self.error.is_none() {
                    self.error = event.error.clone();
                }
            }
            _ => {}
        }

        ApplyOutcome::Applied {
            terminal: self.status.is_terminal(),
        }
    }
}
