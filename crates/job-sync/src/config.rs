// crates/job-sync/src/config.rs
//! Configuration for the job sync client.

use std::sync::Arc;
use std::time::Duration;

/// Injected accessor for the current user id.
///
/// The id lives in client-side session storage owned by the host app;
/// the tracker re-derives it at subscribe time through this closure so
/// tests can supply a fake and nothing here becomes a global singleton.
pub type UserIdSource = Arc<dyn Fn() -> Option<String> + Send + Sync>;

/// Tuning knobs for the tracker, transports and arbiter.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// HTTP base for the job API (e.g. `https://host/api`).
    pub api_base: String,
    /// WebSocket base for the status stream (e.g. `wss://host/api`).
    pub stream_base: String,
    /// Polling transport tick interval.
    pub poll_interval: Duration,
    /// How long to wait for the push transport to connect before starting
    /// the polling fallback.
    pub push_grace: Duration,
    /// Reconnect backoff base delay for the push transport.
    pub backoff_base: Duration,
    /// Reconnect backoff cap.
    pub backoff_cap: Duration,
    /// How long without any successful server contact before the derived
    /// view reports connectivity as lost. Soft timeout: the job keeps
    /// being tracked and recovers on the next contact.
    pub connectivity_ceiling: Duration,
    /// How long the arbiter lingers after a terminal state before tearing
    /// down, so slow watch readers still observe the final snapshot.
    pub terminal_linger: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            api_base: std::env::var("SENTINEL_API_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:8787/api".into()),
            stream_base: std::env::var("SENTINEL_STREAM_URL")
                .unwrap_or_else(|_| "ws://127.0.0.1:8787/api".into()),
            poll_interval: Duration::from_secs(2),
            push_grace: Duration::from_secs(2),
            backoff_base: Duration::from_secs(1),
            backoff_cap: Duration::from_secs(30),
            connectivity_ceiling: Duration::from_secs(60),
            terminal_linger: Duration::from_millis(150),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_timing_relationships() {
        let config = SyncConfig::default();
        assert!(config.backoff_base < config.backoff_cap);
        assert!(config.push_grace < config.connectivity_ceiling);
        assert!(config.terminal_linger < config.poll_interval);
    }
}
