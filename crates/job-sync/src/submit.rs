// crates/job-sync/src/submit.rs
//! Job submission helper: posts a new job request and returns the id for
//! the tracker to follow. Boundary with the backend; deliberately thin.

use tracing::info;

use sentinelsync_types::JobId;

use crate::config::{SyncConfig, UserIdSource};
use crate::error::{SyncError, SyncResult};
use crate::http::ApiClient;

pub struct JobSubmitter {
    api: ApiClient,
    user_id: UserIdSource,
}

impl JobSubmitter {
    pub fn new(config: &SyncConfig, user_id: UserIdSource) -> Self {
        Self {
            api: ApiClient::new(config.api_base.clone()),
            user_id,
        }
    }

    /// Submit a job request to `submission_path` (e.g. `/analysis`).
    /// Returns the server-assigned job id; tracking it is the caller's
    /// next move via [`crate::JobTracker::track`].
    pub async fn submit(
        &self,
        submission_path: &str,
        payload: serde_json::Value,
    ) -> SyncResult<JobId> {
        let user_id = (self.user_id)().ok_or(SyncError::MissingUserId)?;
        let job_id = self.api.submit_job(submission_path, &payload, &user_id).await?;
        info!(%job_id, path = submission_path, "job submitted");
        Ok(job_id)
    }
}
