//! Domain types shared by every restorer crate.
//!
//! Holds the job record and its lifecycle rules, the error taxonomy, and
//! the pure upload checks that run before any state is created. Nothing in
//! here touches the filesystem or spawns tasks.

pub mod error;
pub mod job;
pub mod types;
pub mod upload;
