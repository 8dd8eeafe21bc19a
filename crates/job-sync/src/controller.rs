// crates/job-sync/src/controller.rs
//! Public API of the sync layer: track, read, watch, cancel, unsubscribe,
//! retry. The presentation layer talks to this and nothing else.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, RwLock};

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use sentinelsync_types::JobId;

use crate::arbiter::spawn_arbiter;
use crate::config::{SyncConfig, UserIdSource};
use crate::error::{SyncError, SyncResult};
use crate::http::ApiClient;
use crate::view::JobView;

/// Handle returned by [`JobTracker::track`]. Cheap to clone; each handle
/// releases its reference at most once regardless of how many times
/// `unsubscribe` is called with it.
#[derive(Clone, Debug)]
pub struct JobHandle {
    job_id: JobId,
    view_rx: watch::Receiver<JobView>,
    poll_failures: Arc<AtomicU32>,
    released: Arc<AtomicBool>,
}

impl JobHandle {
    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Current derived state snapshot.
    pub fn view(&self) -> JobView {
        self.view_rx.borrow().clone()
    }

    /// Watch channel for async consumers; resolves on every accepted
    /// store transition and on connectivity changes.
    pub fn watch(&self) -> watch::Receiver<JobView> {
        self.view_rx.clone()
    }

    /// Consecutive failed polling requests, for diagnostics. Zero while
    /// the push stream is covering the job, and reset by any successful
    /// poll.
    pub fn poll_failures(&self) -> u32 {
        self.poll_failures.load(Ordering::Relaxed)
    }
}

struct TrackedJob {
    refcount: usize,
    user_id: String,
    view_rx: watch::Receiver<JobView>,
    poll_failures: Arc<AtomicU32>,
    shutdown: CancellationToken,
}

/// Tracks background jobs against the backend. One subscription (one
/// arbiter, one socket, one poll loop) exists per job id no matter how
/// many times `track` is called for it.
pub struct JobTracker {
    config: SyncConfig,
    api: ApiClient,
    user_id: UserIdSource,
    jobs: RwLock<HashMap<JobId, TrackedJob>>,
}

impl JobTracker {
    /// `user_id` is an injected accessor over the host app's session
    /// storage; it is consulted at subscribe time, never cached globally.
    pub fn new(config: SyncConfig, user_id: UserIdSource) -> Self {
        let api = ApiClient::new(config.api_base.clone());
        Self {
            config,
            api,
            user_id,
            jobs: RwLock::new(HashMap::new()),
        }
    }

    fn lock_jobs(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<JobId, TrackedJob>> {
        match self.jobs.write() {
            Ok(guard) => guard,
            Err(e) => {
                tracing::error!("jobs map lock poisoned: {e}");
                e.into_inner()
            }
        }
    }

    /// Begin tracking a job. Idempotent per id: a second `track` for the
    /// same id joins the existing subscription.
    pub fn track(&self, job_id: impl Into<JobId>) -> SyncResult<JobHandle> {
        let job_id: JobId = job_id.into();
        let user_id = (self.user_id)().ok_or(SyncError::MissingUserId)?;

        let mut jobs = self.lock_jobs();
        if let Some(entry) = jobs.get_mut(&job_id) {
            entry.refcount += 1;
            debug!(job_id = %job_id, refcount = entry.refcount, "joined existing subscription");
            return Ok(JobHandle {
                job_id,
                view_rx: entry.view_rx.clone(),
                poll_failures: Arc::clone(&entry.poll_failures),
                released: Arc::new(AtomicBool::new(false)),
            });
        }

        let (view_tx, view_rx) = watch::channel(JobView::pending(job_id.clone()));
        let poll_failures = Arc::new(AtomicU32::new(0));
        let shutdown = CancellationToken::new();
        spawn_arbiter(
            job_id.clone(),
            user_id.clone(),
            self.api.clone(),
            self.config.clone(),
            view_tx,
            Arc::clone(&poll_failures),
            shutdown.clone(),
        );
        info!(job_id = %job_id, "tracking started");

        jobs.insert(
            job_id.clone(),
            TrackedJob {
                refcount: 1,
                user_id,
                view_rx: view_rx.clone(),
                poll_failures: Arc::clone(&poll_failures),
                shutdown,
            },
        );
        Ok(JobHandle {
            job_id,
            view_rx,
            poll_failures,
            released: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Read the current derived state for a handle.
    pub fn read(&self, handle: &JobHandle) -> JobView {
        handle.view()
    }

    /// Ask the server to cancel the job. Returns whether the request was
    /// accepted. Never forces a local Cancelled state: the authoritative
    /// transition arrives through the transports, and a cancel answered
    /// after the job already finished is a no-op.
    pub async fn cancel(&self, handle: &JobHandle) -> SyncResult<bool> {
        if handle.view().is_terminal() {
            debug!(job_id = %handle.job_id, "cancel requested after terminal state; no-op");
            return Ok(false);
        }
        let user_id = {
            let jobs = self.lock_jobs();
            match jobs.get(&handle.job_id) {
                Some(entry) => entry.user_id.clone(),
                None => (self.user_id)().ok_or(SyncError::MissingUserId)?,
            }
        };
        self.api.cancel_job(&handle.job_id, &user_id).await
    }

    /// Stop tracking for this handle. At refcount zero the transports are
    /// stopped and memory released. Safe to call multiple times.
    pub fn unsubscribe(&self, handle: &JobHandle) {
        if handle.released.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut jobs = self.lock_jobs();
        let Some(entry) = jobs.get_mut(&handle.job_id) else {
            return;
        };
        entry.refcount = entry.refcount.saturating_sub(1);
        if entry.refcount == 0 {
            let entry = jobs.remove(&handle.job_id);
            if let Some(entry) = entry {
                entry.shutdown.cancel();
            }
            info!(job_id = %handle.job_id, "tracking released");
        }
    }

    /// Release this subscription so the caller can `track` a fresh job id
    /// after resubmitting. Does not resubmit anything itself.
    pub fn retry(&self, handle: &JobHandle) {
        debug!(job_id = %handle.job_id, "resetting subscription for retry");
        self.unsubscribe(handle);
    }

    /// Number of jobs currently tracked, for diagnostics and tests.
    pub fn tracked_count(&self) -> usize {
        match self.jobs.read() {
            Ok(jobs) => jobs.len(),
            Err(e) => {
                tracing::error!("jobs map lock poisoned: {e}");
                e.into_inner().len()
            }
        }
    }
}
