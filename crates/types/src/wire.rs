// crates/types/src/wire.rs
//! Wire shapes for the backend job API and the status push stream.
//!
//! The HTTP side is owned by the backend; these types only mirror its
//! contract. Unknown fields are ignored so the backend can evolve freely.

use serde::{Deserialize, Serialize};

use crate::job::{JobStatus, Progress};

/// `GET /jobs/{id}` response — also the polling and initial-fetch shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatusResponse {
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<Progress>,
    /// Opaque payload, present only once the job completed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    /// Failure message, present only once the job failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// `DELETE /jobs/{id}` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelResponse {
    pub accepted: bool,
}

/// `POST {submission endpoint}` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub job_id: String,
}

/// Messages received on (and sent to) the status push stream.
///
/// Server → client: `connected`, `status_update`, `progress_update`,
/// `error`, `ping`. Client → server: `pong`, in the same turn as the ping.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamMessage {
    Connected,
    StatusUpdate {
        status: JobStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        progress: Option<Progress>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<serde_json::Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    ProgressUpdate {
        progress: Progress,
    },
    Error {
        message: String,
    },
    Ping,
    Pong,
}
