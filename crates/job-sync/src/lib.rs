// crates/job-sync/src/lib.rs
//! Background job status synchronization client.
//!
//! Dual-transport tracker for long-running server-side jobs (content
//! analysis, generation, image synthesis): a WebSocket push stream as the
//! primary channel with interval polling as fallback, merged through one
//! idempotent per-job store so callers see a single coherent status
//! stream no matter which transport delivered what, in which order.
//!
//! Public surface: [`JobTracker`] (track / read / watch / cancel /
//! unsubscribe / retry), [`JobSubmitter`], [`JobView`], [`SyncConfig`].
//! Transports and the store are internal by design.

mod arbiter;
pub mod config;
mod controller;
pub mod error;
mod event;
mod http;
mod poll;
mod push;
mod store;
mod submit;
mod view;

pub use config::{SyncConfig, UserIdSource};
pub use controller::{JobHandle, JobTracker};
pub use error::{SyncError, SyncResult};
pub use submit::JobSubmitter;
pub use view::{JobView, TrackingHealth};

pub use sentinelsync_types::{JobId, JobStatus, Progress};
