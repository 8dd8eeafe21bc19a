// crates/job-sync/src/event.rs
//! Normalized events flowing from both transports into the store.

use sentinelsync_types::{JobStatus, JobStatusResponse, Progress};

/// Where an event came from. Diagnostics only — the store treats all
/// origins identically, and the arbiter never trusts cross-origin order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EventOrigin {
    InitialFetch,
    Poll,
    Push,
}

impl std::fmt::Display for EventOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EventOrigin::InitialFetch => "initial_fetch",
            EventOrigin::Poll => "poll",
            EventOrigin::Push => "push",
        };
        f.write_str(s)
    }
}

/// A normalized status event. Both transports emit this same shape, so
/// downstream code cannot distinguish origin except by arrival order.
#[derive(Debug, Clone)]
pub(crate) struct JobEvent {
    pub origin: EventOrigin,
    /// Absent for pure progress updates (push `progress_update` frames).
    pub status: Option<JobStatus>,
    pub progress: Option<Progress>,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
}

impl JobEvent {
    pub fn from_status_response(origin: EventOrigin, resp: JobStatusResponse) -> Self {
        Self {
            origin,
            status: Some(resp.status),
            progress: resp.progress,
            result: resp.result,
            error: resp.error,
        }
    }

    pub fn progress_only(origin: EventOrigin, progress: Progress) -> Self {
        Self {
            origin,
            status: None,
            progress: Some(progress),
            result: None,
            error: None,
        }
    }
}

/// What a transport can tell the arbiter.
///
/// Authentication rejection is the one transport condition that must halt
/// tracking instead of being retried, so it travels out-of-band from the
/// normalized event stream.
#[derive(Debug)]
pub(crate) enum TransportSignal {
    Event(JobEvent),
    AuthRejected { status: u16 },
}
