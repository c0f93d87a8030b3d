//! Job orchestration around the restoration engine.
//!
//! - [`store`]: in-memory job table, the single source of lifecycle truth.
//! - [`staging`]: staged input/output artifacts and the retention sweep.
//! - [`dispatcher`]: runs engine calls on a bounded blocking pool.
//! - [`heartbeat`]: keep-alive stream for clients waiting on a job.
//! - [`status`]: read side used by the HTTP layer, including terminal
//!   consumption of results.
//! - [`retention`]: one reclamation pass over files and stale records.

pub mod config;
pub mod dispatcher;
pub mod heartbeat;
pub mod retention;
pub mod staging;
pub mod status;
pub mod store;

pub use config::PipelineConfig;
pub use dispatcher::{Dispatcher, JobHandle};
pub use heartbeat::{Beat, HeartbeatMonitor};
pub use staging::StagingArea;
pub use status::{ResultDelivery, RestoredImage, StatusReport, StatusService};
pub use store::JobStore;
