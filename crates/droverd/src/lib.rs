//! droverd — assembles the Drover subsystems into one process.
//!
//! - Processing-time tracker
//! - Broker monitor (poll loop)
//! - Worker pool
//! - Scaling controller (tick loop)
//! - Status API

pub mod daemon;

pub use daemon::Daemon;
