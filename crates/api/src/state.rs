use std::sync::Arc;

use restorer_pipeline::{Dispatcher, HeartbeatMonitor, JobStore, StatusService};

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// Cheaply cloneable: everything inside is behind `Arc` or is itself a
/// cheap handle.
#[derive(Clone)]
pub struct AppState {
    /// Job table, read directly by the health check.
    pub store: Arc<JobStore>,
    /// Accepts uploads and runs engine calls on the worker pool.
    pub dispatcher: Dispatcher,
    /// Status polls and result delivery.
    pub status: StatusService,
    /// Keep-alive source for restore-and-wait requests.
    pub heartbeat: HeartbeatMonitor,
}
