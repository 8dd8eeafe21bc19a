// crates/job-sync/src/view.rs
//! Derived state handed to the presentation layer.

use serde::Serialize;

use sentinelsync_types::{JobId, JobStatus};

use crate::store::StoreSnapshot;

/// Health of the tracking machinery — independent of the job's own status.
/// A job can be Processing while connectivity is lost, in which case the
/// last known snapshot is still shown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackingHealth {
    /// At least one transport has recently heard from the server.
    Live,
    /// No successful server contact within the configured ceiling.
    /// Soft condition: clears on the next contact.
    ConnectivityLost,
    /// The server rejected the user id. Not retried; tracking halted.
    AuthRejected,
}

/// Snapshot of everything the presentation layer may render for one job.
///
/// This is the only thing that crosses the controller boundary; callers
/// never reach into the transports or the store.
#[derive(Debug, Clone, Serialize)]
pub struct JobView {
    pub job_id: JobId,
    pub status: JobStatus,
    pub percentage: Option<f64>,
    pub current_step: Option<String>,
    pub message: Option<String>,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub health: TrackingHealth,
}

impl JobView {
    /// Initial view published the moment tracking begins, before any
    /// network confirmation.
    pub(crate) fn pending(job_id: JobId) -> Self {
        Self {
            job_id,
            status: JobStatus::Pending,
            percentage: None,
            current_step: None,
            message: None,
            result: None,
            error: None,
            health: TrackingHealth::Live,
        }
    }

    pub(crate) fn from_snapshot(
        job_id: JobId,
        snapshot: StoreSnapshot,
        health: TrackingHealth,
    ) -> Self {
        Self {
            job_id,
            status: snapshot.status.unwrap_or(JobStatus::Pending),
            percentage: snapshot.progress.percentage,
            current_step: snapshot.progress.current_step,
            message: snapshot.progress.message,
            result: snapshot.result,
            error: snapshot.error,
            health,
        }
    }

    /// Still waiting on the server for an outcome.
    pub fn is_loading(&self) -> bool {
        !self.status.is_terminal() && self.health != TrackingHealth::AuthRejected
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn is_completed(&self) -> bool {
        self.status == JobStatus::Completed
    }

    pub fn is_failed(&self) -> bool {
        self.status == JobStatus::Failed
    }

    pub fn is_cancelled(&self) -> bool {
        self.status == JobStatus::Cancelled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pending_view_is_loading() {
        let view = JobView::pending("j1".into());
        assert!(view.is_loading());
        assert!(!view.is_terminal());
        assert_eq!(view.status, JobStatus::Pending);
        assert_eq!(view.health, TrackingHealth::Live);
    }

    #[test]
    fn test_terminal_flags() {
        let mut view = JobView::pending("j1".into());
        view.status = JobStatus::Cancelled;
        assert!(view.is_terminal());
        assert!(view.is_cancelled());
        assert!(!view.is_failed());
        assert!(!view.is_loading());
    }

    #[test]
    fn test_auth_rejected_stops_loading() {
        let mut view = JobView::pending("j1".into());
        view.health = TrackingHealth::AuthRejected;
        assert!(!view.is_loading());
        assert!(!view.is_terminal());
    }
}
