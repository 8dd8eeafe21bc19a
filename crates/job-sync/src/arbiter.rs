// crates/job-sync/src/arbiter.rs
//! Per-job task that owns both transports and the store, and guarantees
//! the watch channel carries one coherent merged stream.
//!
//! Single-ownership model: the store lives inside this task, transports
//! only reach it through the signal channel, so `apply` is serialized
//! without locks. Arrival order across transports is never trusted — only
//! store-accepted transitions matter.

use std::sync::atomic::AtomicU32;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use sentinelsync_types::JobId;

use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::event::{EventOrigin, JobEvent, TransportSignal};
use crate::http::ApiClient;
use crate::poll::PollingTransport;
use crate::push::{spawn_push, ConnState, ReconnectPolicy};
use crate::store::{ApplyOutcome, JobStore};
use crate::view::{JobView, TrackingHealth};

pub(crate) fn spawn_arbiter(
    job_id: JobId,
    user_id: String,
    api: ApiClient,
    config: SyncConfig,
    view_tx: watch::Sender<JobView>,
    poll_failures: Arc<AtomicU32>,
    shutdown: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(run_arbiter(
        job_id,
        user_id,
        api,
        config,
        view_tx,
        poll_failures,
        shutdown,
    ))
}

async fn run_arbiter(
    job_id: JobId,
    user_id: String,
    api: ApiClient,
    config: SyncConfig,
    view_tx: watch::Sender<JobView>,
    poll_failures: Arc<AtomicU32>,
    shutdown: CancellationToken,
) {
    let mut store = JobStore::new();
    let mut health = TrackingHealth::Live;
    let (signal_tx, mut signal_rx) = mpsc::channel::<TransportSignal>(64);

    let publish = |store: &JobStore, health: TrackingHealth| {
        let _ = view_tx.send(JobView::from_snapshot(job_id.clone(), store.read(), health));
    };

    // Start the push transport first; it is the primary channel.
    let stream_url = format!(
        "{}/jobs/{}/stream?user_id={}",
        config.stream_base,
        urlencoding::encode(&job_id),
        urlencoding::encode(&user_id)
    );
    let (conn_tx, mut conn_rx) = watch::channel(ConnState::Disconnected);
    let push_token = shutdown.child_token();
    let push_task = spawn_push(
        job_id.clone(),
        stream_url,
        signal_tx.clone(),
        conn_tx,
        ReconnectPolicy::new(config.backoff_base, config.backoff_cap),
        push_token.clone(),
    );

    // One immediate fetch covers the job that completed before we
    // subscribed — push alone would never tell us.
    let mut last_contact = tokio::time::Instant::now();
    match api.job_status(&job_id, &user_id).await {
        Ok(resp) => {
            last_contact = tokio::time::Instant::now();
            let event = JobEvent::from_status_response(EventOrigin::InitialFetch, resp);
            if let ApplyOutcome::Applied { terminal: true } = store.apply(&event) {
                info!(job_id = %job_id, status = ?store.status(), "job already terminal at subscribe");
                publish(&store, health);
                push_token.cancel();
                let _ = push_task.await;
                tokio::time::sleep(config.terminal_linger).await;
                return;
            }
            publish(&store, health);
        }
        Err(SyncError::AuthRejected { status }) => {
            error!(job_id = %job_id, status, "authentication rejected; tracking halted");
            health = TrackingHealth::AuthRejected;
            publish(&store, health);
            push_token.cancel();
            let _ = push_task.await;
            return;
        }
        Err(e) => {
            // Transient; the transports will keep trying.
            warn!(job_id = %job_id, "initial status fetch failed: {e}");
        }
    }

    let mut poll: Option<PollingTransport> = None;
    let mut conn_open = true;
    let mut grace_elapsed = false;
    let grace = tokio::time::sleep(config.push_grace);
    tokio::pin!(grace);

    let start_poll = |job_id: &JobId, user_id: &str| {
        PollingTransport::start(
            job_id.clone(),
            api.clone(),
            user_id.to_string(),
            config.poll_interval,
            signal_tx.clone(),
            Arc::clone(&poll_failures),
            &shutdown,
        )
    };

    loop {
        let connectivity_deadline = last_contact + config.connectivity_ceiling;

        tokio::select! {
            _ = shutdown.cancelled() => {
                debug!(job_id = %job_id, "unsubscribed; arbiter stopping");
                break;
            }

            _ = &mut grace, if !grace_elapsed => {
                grace_elapsed = true;
                if *conn_rx.borrow() != ConnState::Connected && poll.is_none() {
                    info!(job_id = %job_id, "push not connected within grace window; starting poll fallback");
                    poll = Some(start_poll(&job_id, &user_id));
                }
            }

            changed = conn_rx.changed(), if conn_open => {
                if changed.is_err() {
                    conn_open = false;
                    continue;
                }
                let conn = *conn_rx.borrow();
                match conn {
                    ConnState::Connected => {
                        last_contact = tokio::time::Instant::now();
                        // Redundant delivery would be harmless, but there
                        // is no reason to double the load.
                        if let Some(p) = poll.take() {
                            debug!(job_id = %job_id, "push connected; suppressing poll fallback");
                            p.stop();
                        }
                    }
                    ConnState::Backoff { .. } if grace_elapsed && poll.is_none() => {
                        debug!(job_id = %job_id, "push in backoff; resuming poll fallback");
                        poll = Some(start_poll(&job_id, &user_id));
                    }
                    _ => {}
                }
            }

            signal = signal_rx.recv() => {
                let Some(signal) = signal else { break };
                match signal {
                    TransportSignal::Event(event) => {
                        last_contact = tokio::time::Instant::now();
                        if health == TrackingHealth::ConnectivityLost {
                            info!(job_id = %job_id, "server contact restored");
                            health = TrackingHealth::Live;
                        }
                        match store.apply(&event) {
                            ApplyOutcome::Applied { terminal: true } => {
                                info!(job_id = %job_id, status = ?store.status(), "job reached terminal state");
                                publish(&store, health);
                                break;
                            }
                            ApplyOutcome::Applied { terminal: false } => {
                                publish(&store, health);
                            }
                            ApplyOutcome::Rejected(reason) => {
                                debug!(
                                    job_id = %job_id,
                                    ?reason,
                                    rejected_total = store.rejected_count(),
                                    "stale event suppressed"
                                );
                            }
                        }
                    }
                    TransportSignal::AuthRejected { status } => {
                        error!(job_id = %job_id, status, "authentication rejected; tracking halted");
                        health = TrackingHealth::AuthRejected;
                        publish(&store, health);
                        break;
                    }
                }
            }

            _ = tokio::time::sleep_until(connectivity_deadline),
                if health == TrackingHealth::Live =>
            {
                // Soft timeout: surface the condition without fabricating
                // a terminal state; the store stays intact.
                warn!(
                    job_id = %job_id,
                    ceiling_secs = config.connectivity_ceiling.as_secs(),
                    "no server contact within ceiling; reporting connectivity lost"
                );
                health = TrackingHealth::ConnectivityLost;
                publish(&store, health);
            }
        }
    }

    // Terminal, halted or unsubscribed: stop both transports and cancel
    // any pending reconnect timers before releasing references.
    push_token.cancel();
    if let Some(p) = poll.take() {
        p.stop();
    }
    // Closing the signal channel unblocks any transport mid-send.
    drop(signal_rx);
    let _ = push_task.await;

    if store.is_terminal() {
        // Brief linger so slow watch readers still see the final snapshot;
        // late duplicates are already frozen out by the store.
        tokio::time::sleep(config.terminal_linger).await;
    }
    debug!(job_id = %job_id, rejected = store.rejected_count(), "arbiter released");
}
