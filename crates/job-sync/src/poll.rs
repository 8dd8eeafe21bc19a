// crates/job-sync/src/poll.rs
//! Polling transport: fixed-interval status fetches against the query
//! endpoint. Fallback for when the push stream is down or slow to connect.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use sentinelsync_types::JobId;

use crate::error::SyncError;
use crate::event::{EventOrigin, JobEvent, TransportSignal};
use crate::http::ApiClient;

/// Handle to a running poll loop.
pub(crate) struct PollingTransport {
    shutdown: CancellationToken,
}

impl PollingTransport {
    /// Start polling. Each tick awaits exactly one request to completion
    /// before the next tick can fire, so requests for one job never
    /// overlap and the loop never runs faster than the interval.
    /// `failures` is the caller-owned consecutive-failure counter; it is
    /// reset on every successful request.
    pub fn start(
        job_id: JobId,
        api: ApiClient,
        user_id: String,
        interval: Duration,
        signals: mpsc::Sender<TransportSignal>,
        failures: Arc<AtomicU32>,
        parent: &CancellationToken,
    ) -> Self {
        let shutdown = parent.child_token();

        let token = shutdown.clone();
        let failure_count = failures;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // interval() fires immediately; the arbiter already did the
            // initial fetch, so consume that tick and wait a full period.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                match api.job_status(&job_id, &user_id).await {
                    Ok(resp) => {
                        failure_count.store(0, Ordering::Relaxed);
                        let terminal = resp.status.is_terminal();
                        let event = JobEvent::from_status_response(EventOrigin::Poll, resp);
                        if signals.send(TransportSignal::Event(event)).await.is_err() {
                            break;
                        }
                        if terminal {
                            debug!(job_id = %job_id, "terminal status observed; polling stops");
                            break;
                        }
                    }
                    Err(SyncError::AuthRejected { status }) => {
                        // Retrying cannot succeed without caller intervention.
                        let _ = signals.send(TransportSignal::AuthRejected { status }).await;
                        break;
                    }
                    Err(e) => {
                        // Transient blip: no event, keep the cadence.
                        let n = failure_count.fetch_add(1, Ordering::Relaxed) + 1;
                        warn!(
                            job_id = %job_id,
                            consecutive_failures = n,
                            "poll request failed: {e}"
                        );
                    }
                }
            }
        });

        Self { shutdown }
    }

    pub fn stop(&self) {
        self.shutdown.cancel();
    }
}

impl Drop for PollingTransport {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32 as Counter;

    fn sequenced_body(counter: &Arc<Counter>, bodies: &'static [&'static str]) -> Vec<u8> {
        let n = counter.fetch_add(1, Ordering::SeqCst) as usize;
        bodies[n.min(bodies.len() - 1)].as_bytes().to_vec()
    }

    #[tokio::test]
    async fn test_poll_emits_then_stops_on_terminal() {
        let mut server = mockito::Server::new_async().await;
        let counter = Arc::new(Counter::new(0));
        let c = Arc::clone(&counter);
        let mock = server
            .mock("GET", mockito::Matcher::Regex(r"^/jobs/j2".into()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body_from_request(move |_| {
                sequenced_body(
                    &c,
                    &[
                        r#"{"status":"processing","progress":{"percentage":10}}"#,
                        r#"{"status":"failed","error":"model timeout"}"#,
                    ],
                )
            })
            .expect(2)
            .create_async()
            .await;

        let (sig_tx, mut sig_rx) = mpsc::channel(8);
        let parent = CancellationToken::new();
        let failures = Arc::new(AtomicU32::new(0));
        let _poll = PollingTransport::start(
            "j2".into(),
            ApiClient::new(server.url()),
            "u".into(),
            Duration::from_millis(30),
            sig_tx,
            Arc::clone(&failures),
            &parent,
        );

        let first = tokio::time::timeout(Duration::from_secs(5), sig_rx.recv())
            .await
            .expect("timeout")
            .expect("channel closed");
        let TransportSignal::Event(event) = first else {
            panic!("expected event");
        };
        assert_eq!(event.progress.unwrap().percentage, Some(10.0));

        let second = tokio::time::timeout(Duration::from_secs(5), sig_rx.recv())
            .await
            .expect("timeout")
            .expect("channel closed");
        let TransportSignal::Event(event) = second else {
            panic!("expected event");
        };
        assert_eq!(event.error.as_deref(), Some("model timeout"));

        // Terminal response stops the loop: the channel closes with no
        // further requests issued.
        let end = tokio::time::timeout(Duration::from_secs(2), sig_rx.recv()).await;
        assert!(matches!(end, Ok(None)), "poll loop should have stopped");
        mock.assert_async().await;
        assert_eq!(failures.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn test_poll_failure_counts_without_events() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", mockito::Matcher::Regex(r"^/jobs/j-flaky".into()))
            .with_status(502)
            .expect_at_least(2)
            .create_async()
            .await;

        let (sig_tx, mut sig_rx) = mpsc::channel(8);
        let parent = CancellationToken::new();
        let failures = Arc::new(AtomicU32::new(0));
        let poll = PollingTransport::start(
            "j-flaky".into(),
            ApiClient::new(server.url()),
            "u".into(),
            Duration::from_millis(20),
            sig_tx,
            Arc::clone(&failures),
            &parent,
        );

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(sig_rx.try_recv().is_err(), "failures must not emit events");
        assert!(failures.load(Ordering::Relaxed) >= 2);

        poll.stop();
    }

    #[tokio::test]
    async fn test_poll_auth_rejection_halts() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", mockito::Matcher::Regex(r"^/jobs/j-auth".into()))
            .with_status(403)
            .create_async()
            .await;

        let (sig_tx, mut sig_rx) = mpsc::channel(8);
        let parent = CancellationToken::new();
        let _poll = PollingTransport::start(
            "j-auth".into(),
            ApiClient::new(server.url()),
            "u".into(),
            Duration::from_millis(20),
            sig_tx,
            Arc::new(AtomicU32::new(0)),
            &parent,
        );

        let signal = tokio::time::timeout(Duration::from_secs(5), sig_rx.recv())
            .await
            .expect("timeout")
            .expect("channel closed");
        assert!(matches!(
            signal,
            TransportSignal::AuthRejected { status: 403 }
        ));

        // Loop stopped after the rejection.
        let end = tokio::time::timeout(Duration::from_secs(1), sig_rx.recv()).await;
        assert!(matches!(end, Ok(None)));
    }

    #[tokio::test]
    async fn test_stop_halts_polling() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", mockito::Matcher::Regex(r"^/jobs/j-stop".into()))
            .with_status(200)
            .with_body(r#"{"status":"processing"}"#)
            .create_async()
            .await;

        let (sig_tx, mut sig_rx) = mpsc::channel(8);
        let parent = CancellationToken::new();
        let poll = PollingTransport::start(
            "j-stop".into(),
            ApiClient::new(server.url()),
            "u".into(),
            Duration::from_millis(20),
            sig_tx,
            Arc::new(AtomicU32::new(0)),
            &parent,
        );

        // Let at least one tick land, then stop.
        let _ = tokio::time::timeout(Duration::from_secs(5), sig_rx.recv()).await;
        poll.stop();

        // Channel drains and closes once the task exits.
        let end = tokio::time::timeout(Duration::from_secs(2), async {
            while let Some(_signal) = sig_rx.recv().await {}
        })
        .await;
        assert!(end.is_ok(), "poll task should exit after stop()");
    }
}
