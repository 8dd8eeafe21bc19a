// crates/job-sync/src/push.rs
//! WebSocket push transport for the job status stream.
//!
//! One task per tracked job: capped-exponential reconnect loop around a
//! single socket session. The reconnect policy is a pure state machine so
//! the backoff curve is testable without sockets or timers.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use sentinelsync_types::{JobId, StreamMessage};

use crate::event::{EventOrigin, JobEvent, TransportSignal};

/// Connection state of the push transport. Independent of job status: a
/// job can be Processing while this sits in Backoff, in which case the
/// polling fallback must be covering it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ConnState {
    Disconnected,
    Connecting { attempt: u32 },
    Connected,
    Backoff { attempt: u32, delay: Duration },
}

/// Capped exponential backoff: `base * 2^(attempt-1)`, clamped to `cap`.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ReconnectPolicy {
    base: Duration,
    cap: Duration,
}

impl ReconnectPolicy {
    pub fn new(base: Duration, cap: Duration) -> Self {
        Self { base, cap }
    }

    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        self.base.saturating_mul(1 << exp).min(self.cap)
    }
}

impl ConnState {
    /// Begin the next connect attempt.
    pub fn begin_connect(self) -> ConnState {
        let attempt = match self {
            ConnState::Backoff { attempt, .. } => attempt + 1,
            ConnState::Connecting { attempt } => attempt,
            ConnState::Disconnected | ConnState::Connected => 1,
        };
        ConnState::Connecting { attempt }
    }

    /// The socket reached the server.
    pub fn established(self) -> ConnState {
        ConnState::Connected
    }

    /// The connect attempt failed, or an established session dropped.
    /// A drop after a successful session resets the backoff curve.
    pub fn dropped(self, policy: &ReconnectPolicy) -> ConnState {
        let attempt = match self {
            ConnState::Connecting { attempt } => attempt,
            // Last session succeeded: restart the curve.
            ConnState::Connected => 1,
            ConnState::Backoff { attempt, .. } => attempt,
            ConnState::Disconnected => 1,
        };
        ConnState::Backoff {
            attempt,
            delay: policy.delay_for(attempt),
        }
    }
}

fn outcome_of_session(end: SessionEnd) -> &'static str {
    match end {
        SessionEnd::ServerClosed => "server closed",
        SessionEnd::SocketError => "socket error",
        SessionEnd::Shutdown => "shutdown",
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionEnd {
    ServerClosed,
    SocketError,
    Shutdown,
}

/// Spawn the push transport for one job. It publishes its `ConnState` on
/// `conn_tx` and normalized events on `signals`; it stops when `shutdown`
/// fires (the arbiter cancels it once the job is known terminal).
pub(crate) fn spawn_push(
    job_id: JobId,
    stream_url: String,
    signals: mpsc::Sender<TransportSignal>,
    conn_tx: watch::Sender<ConnState>,
    policy: ReconnectPolicy,
    shutdown: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut state = ConnState::Disconnected;

        loop {
            if shutdown.is_cancelled() {
                break;
            }

            state = state.begin_connect();
            let _ = conn_tx.send(state);

            let connect = tokio::select! {
                _ = shutdown.cancelled() => break,
                c = connect_async(stream_url.as_str()) => c,
            };

            match connect {
                Ok((ws_stream, _)) => {
                    state = state.established();
                    let _ = conn_tx.send(state);
                    debug!(job_id = %job_id, "push stream connected");

                    let end = run_session(ws_stream, &job_id, &signals, &shutdown).await;
                    if end == SessionEnd::Shutdown || shutdown.is_cancelled() {
                        break;
                    }
                    debug!(job_id = %job_id, reason = outcome_of_session(end), "push session ended");
                    state = state.dropped(&policy);
                }
                Err(e) => {
                    warn!(job_id = %job_id, "push connect failed: {e}");
                    state = state.dropped(&policy);
                }
            }

            let ConnState::Backoff { attempt, delay } = state else {
                break;
            };
            let _ = conn_tx.send(state);
            debug!(
                job_id = %job_id,
                attempt,
                delay_ms = delay.as_millis() as u64,
                "push transport backing off"
            );
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        let _ = conn_tx.send(ConnState::Disconnected);
    })
}

async fn run_session(
    ws_stream: tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >,
    job_id: &str,
    signals: &mpsc::Sender<TransportSignal>,
    shutdown: &CancellationToken,
) -> SessionEnd {
    let (mut sink, mut stream) = ws_stream.split();

    loop {
        let msg = tokio::select! {
            _ = shutdown.cancelled() => return SessionEnd::Shutdown,
            m = stream.next() => m,
        };

        match msg {
            Some(Ok(Message::Text(text))) => match serde_json::from_str::<StreamMessage>(&text) {
                // Hard liveness contract: the pong must go out in the same
                // turn as the ping, before anything else is processed.
                Ok(StreamMessage::Ping) => {
                    if sink
                        .send(Message::Text(r#"{"type":"pong"}"#.to_string().into()))
                        .await
                        .is_err()
                    {
                        return SessionEnd::SocketError;
                    }
                }
                Ok(StreamMessage::Connected) => {
                    debug!(job_id = %job_id, "server acknowledged stream subscription");
                }
                Ok(StreamMessage::StatusUpdate {
                    status,
                    progress,
                    result,
                    error,
                }) => {
                    let event = JobEvent {
                        origin: EventOrigin::Push,
                        status: Some(status),
                        progress,
                        result,
                        error,
                    };
                    if signals.send(TransportSignal::Event(event)).await.is_err() {
                        // Arbiter is gone; nothing left to feed.
                        return SessionEnd::Shutdown;
                    }
                }
                Ok(StreamMessage::ProgressUpdate { progress }) => {
                    let event = JobEvent::progress_only(EventOrigin::Push, progress);
                    if signals.send(TransportSignal::Event(event)).await.is_err() {
                        return SessionEnd::Shutdown;
                    }
                }
                Ok(StreamMessage::Error { message }) => {
                    // Stream-level error, not a job failure. The job fails
                    // only through a server-reported Failed status.
                    warn!(job_id = %job_id, "status stream reported error: {message}");
                }
                Ok(StreamMessage::Pong) => {}
                Err(e) => {
                    warn!(job_id = %job_id, "malformed stream frame dropped: {e}");
                }
            },
            Some(Ok(Message::Ping(payload))) => {
                if sink.send(Message::Pong(payload)).await.is_err() {
                    return SessionEnd::SocketError;
                }
            }
            Some(Ok(Message::Close(_))) | None => return SessionEnd::ServerClosed,
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                warn!(job_id = %job_id, "push socket error: {e}");
                return SessionEnd::SocketError;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> ReconnectPolicy {
        ReconnectPolicy::new(Duration::from_secs(1), Duration::from_secs(30))
    }

    #[test]
    fn test_backoff_curve_doubles_and_caps() {
        let p = policy();
        assert_eq!(p.delay_for(1), Duration::from_secs(1));
        assert_eq!(p.delay_for(2), Duration::from_secs(2));
        assert_eq!(p.delay_for(3), Duration::from_secs(4));
        assert_eq!(p.delay_for(5), Duration::from_secs(16));
        assert_eq!(p.delay_for(6), Duration::from_secs(30));
        assert_eq!(p.delay_for(60), Duration::from_secs(30));
    }

    #[test]
    fn test_connect_failure_walks_the_curve() {
        let p = policy();
        let mut state = ConnState::Disconnected;

        state = state.begin_connect();
        assert_eq!(state, ConnState::Connecting { attempt: 1 });

        state = state.dropped(&p);
        assert_eq!(
            state,
            ConnState::Backoff {
                attempt: 1,
                delay: Duration::from_secs(1)
            }
        );

        state = state.begin_connect();
        assert_eq!(state, ConnState::Connecting { attempt: 2 });

        state = state.dropped(&p);
        assert_eq!(
            state,
            ConnState::Backoff {
                attempt: 2,
                delay: Duration::from_secs(2)
            }
        );
    }

    #[test]
    fn test_successful_session_resets_backoff() {
        let p = policy();
        let mut state = ConnState::Disconnected;

        // Fail a few times to climb the curve.
        for _ in 0..4 {
            state = state.begin_connect().dropped(&p);
        }
        let ConnState::Backoff { attempt, .. } = state else {
            panic!("expected backoff, got {state:?}");
        };
        assert_eq!(attempt, 4);

        // Connect, then drop: the curve restarts at the base delay.
        state = state.begin_connect().established();
        assert_eq!(state, ConnState::Connected);
        state = state.dropped(&p);
        assert_eq!(
            state,
            ConnState::Backoff {
                attempt: 1,
                delay: Duration::from_secs(1)
            }
        );
    }

    #[tokio::test]
    async fn test_connect_refused_publishes_backoff() {
        // Nothing listens on port 9; the transport should go Connecting
        // then Backoff without emitting any events.
        let (sig_tx, mut sig_rx) = mpsc::channel(8);
        let (conn_tx, mut conn_rx) = watch::channel(ConnState::Disconnected);
        let shutdown = CancellationToken::new();

        let task = spawn_push(
            "j-refused".into(),
            "ws://127.0.0.1:9/jobs/j-refused/stream?user_id=u".into(),
            sig_tx,
            conn_tx,
            ReconnectPolicy::new(Duration::from_millis(20), Duration::from_millis(100)),
            shutdown.clone(),
        );

        let reached_backoff = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if conn_rx.changed().await.is_err() {
                    panic!("conn channel closed early");
                }
                if matches!(*conn_rx.borrow(), ConnState::Backoff { .. }) {
                    break;
                }
            }
        })
        .await;
        assert!(reached_backoff.is_ok(), "never reached backoff");

        assert!(sig_rx.try_recv().is_err(), "no events expected on failure");

        shutdown.cancel();
        let _ = task.await;
    }

    #[tokio::test]
    async fn test_ping_answered_with_pong() {
        use axum::extract::ws::{Message as WsMessage, WebSocketUpgrade};
        use axum::extract::State;
        use axum::response::IntoResponse;
        use axum::routing::get;
        use axum::Router;
        use tokio::sync::oneshot;

        #[derive(Clone)]
        struct PongProbe(std::sync::Arc<std::sync::Mutex<Option<oneshot::Sender<String>>>>);

        async fn handler(ws: WebSocketUpgrade, State(probe): State<PongProbe>) -> impl IntoResponse {
            ws.on_upgrade(move |mut socket| async move {
                let _ = socket
                    .send(WsMessage::Text(r#"{"type":"ping"}"#.into()))
                    .await;
                while let Some(Ok(msg)) = socket.recv().await {
                    if let WsMessage::Text(text) = msg {
                        if let Some(tx) = probe.0.lock().unwrap().take() {
                            let _ = tx.send(text.to_string());
                        }
                        break;
                    }
                }
                while let Some(Ok(_)) = socket.recv().await {}
            })
        }

        let (pong_tx, pong_rx) = oneshot::channel::<String>();
        let probe = PongProbe(std::sync::Arc::new(std::sync::Mutex::new(Some(pong_tx))));
        let app = Router::new()
            .route("/jobs/{job_id}/stream", get(handler))
            .with_state(probe);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let (sig_tx, _sig_rx) = mpsc::channel(8);
        let (conn_tx, _conn_rx) = watch::channel(ConnState::Disconnected);
        let shutdown = CancellationToken::new();
        let task = spawn_push(
            "jp".into(),
            format!("ws://{addr}/jobs/jp/stream?user_id=u"),
            sig_tx,
            conn_tx,
            policy(),
            shutdown.clone(),
        );

        let reply = tokio::time::timeout(Duration::from_secs(5), pong_rx)
            .await
            .expect("no pong before timeout")
            .expect("probe dropped");
        let msg: StreamMessage = serde_json::from_str(&reply).unwrap();
        assert!(matches!(msg, StreamMessage::Pong));

        shutdown.cancel();
        let _ = task.await;
    }

    #[tokio::test]
    async fn test_bad_frames_do_not_kill_the_session() {
        use axum::extract::ws::{Message as WsMessage, WebSocketUpgrade};
        use axum::response::IntoResponse;
        use axum::routing::get;
        use axum::Router;

        // Unknown type, then raw garbage, then a real update: the first
        // two must be dropped and the session must still deliver the
        // third.
        async fn handler(ws: WebSocketUpgrade) -> impl IntoResponse {
            ws.on_upgrade(|mut socket| async move {
                for frame in [
                    r#"{"type":"mystery","detail":42}"#,
                    "definitely not json",
                    r#"{"type":"status_update","status":"processing","progress":{"percentage":55}}"#,
                ] {
                    if socket.send(WsMessage::Text(frame.into())).await.is_err() {
                        return;
                    }
                }
                while let Some(Ok(_)) = socket.recv().await {}
            })
        }

        let app = Router::new().route("/jobs/{job_id}/stream", get(handler));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let (sig_tx, mut sig_rx) = mpsc::channel(8);
        let (conn_tx, _conn_rx) = watch::channel(ConnState::Disconnected);
        let shutdown = CancellationToken::new();
        let task = spawn_push(
            "jb".into(),
            format!("ws://{addr}/jobs/jb/stream?user_id=u"),
            sig_tx,
            conn_tx,
            policy(),
            shutdown.clone(),
        );

        let signal = tokio::time::timeout(Duration::from_secs(5), sig_rx.recv())
            .await
            .expect("no event before timeout")
            .expect("channel closed");
        let TransportSignal::Event(event) = signal else {
            panic!("expected event");
        };
        assert_eq!(event.status, Some(sentinelsync_types::JobStatus::Processing));
        assert_eq!(event.progress.unwrap().percentage, Some(55.0));
        // The bad frames produced no events of their own.
        assert!(sig_rx.try_recv().is_err());

        shutdown.cancel();
        let _ = task.await;
    }
}
