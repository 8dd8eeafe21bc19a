// crates/job-sync/src/http.rs
//! Thin reqwest wrapper for the backend job API.

use sentinelsync_types::{CancelResponse, JobStatusResponse, SubmitResponse};

use crate::error::{SyncError, SyncResult};

/// Shared HTTP client for the job endpoints. Cheap to clone.
#[derive(Debug, Clone)]
pub(crate) struct ApiClient {
    http: reqwest::Client,
    api_base: String,
}

impl ApiClient {
    pub fn new(api_base: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_base: api_base.into(),
        }
    }

    fn job_url(&self, job_id: &str, user_id: &str) -> String {
        format!(
            "{}/jobs/{}?user_id={}",
            self.api_base,
            urlencoding::encode(job_id),
            urlencoding::encode(user_id)
        )
    }

    /// `GET /jobs/{id}` — polling and initial-fetch shape.
    pub async fn job_status(&self, job_id: &str, user_id: &str) -> SyncResult<JobStatusResponse> {
        let url = self.job_url(job_id, user_id);
        let resp = self.http.get(&url).send().await?;
        let status = resp.status();
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(SyncError::AuthRejected {
                status: status.as_u16(),
            });
        }
        if !status.is_success() {
            return Err(SyncError::UnexpectedStatus {
                endpoint: url,
                status: status.as_u16(),
            });
        }
        resp.json::<JobStatusResponse>()
            .await
            .map_err(|e| SyncError::Decode {
                endpoint: url,
                message: e.to_string(),
            })
    }

    /// `DELETE /jobs/{id}` — cancellation request. Returns whether the
    /// server accepted it; the job stays tracked either way.
    pub async fn cancel_job(&self, job_id: &str, user_id: &str) -> SyncResult<bool> {
        let url = self.job_url(job_id, user_id);
        let resp = self.http.delete(&url).send().await?;
        let status = resp.status();
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(SyncError::AuthRejected {
                status: status.as_u16(),
            });
        }
        if !status.is_success() {
            return Err(SyncError::UnexpectedStatus {
                endpoint: url,
                status: status.as_u16(),
            });
        }
        let body = resp
            .json::<CancelResponse>()
            .await
            .map_err(|e| SyncError::Decode {
                endpoint: url,
                message: e.to_string(),
            })?;
        Ok(body.accepted)
    }

    /// `POST {submission_path}` — submits a new job, returns its id.
    pub async fn submit_job(
        &self,
        submission_path: &str,
        payload: &serde_json::Value,
        user_id: &str,
    ) -> SyncResult<String> {
        let url = format!(
            "{}{}?user_id={}",
            self.api_base,
            submission_path,
            urlencoding::encode(user_id)
        );
        let resp = self.http.post(&url).json(payload).send().await?;
        let status = resp.status();
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(SyncError::AuthRejected {
                status: status.as_u16(),
            });
        }
        if !status.is_success() {
            return Err(SyncError::UnexpectedStatus {
                endpoint: url,
                status: status.as_u16(),
            });
        }
        let body = resp
            .json::<SubmitResponse>()
            .await
            .map_err(|e| SyncError::Decode {
                endpoint: url,
                message: e.to_string(),
            })?;
        Ok(body.job_id)
    }
}
