// crates/types/src/job.rs
//! Core job domain types shared between the sync client and its consumers.

use serde::{Deserialize, Serialize};

/// Opaque server-assigned identifier for a long-running job.
pub type JobId = String;

/// Status of a server-side job.
///
/// `Pending → Processing ⇄ Retrying → {Completed | Failed | Cancelled}`.
/// The three right-hand states are terminal: nothing transitions out of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Retrying,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    /// Completed, Failed and Cancelled are terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// Coarse ordering used to detect stale status events.
    ///
    /// Processing and Retrying share a rank because the server may bounce
    /// between them; everything else only moves forward.
    pub fn rank(&self) -> u8 {
        match self {
            JobStatus::Pending => 0,
            JobStatus::Processing | JobStatus::Retrying => 1,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled => 2,
        }
    }
}

/// Advisory progress data attached to a running job.
///
/// Every field is optional; absence of progress is valid and never an error.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    /// 0–100, monotonically non-decreasing within one job's lifetime.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub percentage: Option<f64>,
    /// Human-readable current-step label (e.g. "extracting frames").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_step: Option<String>,
    /// Free-text status message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}
