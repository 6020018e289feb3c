//! drover-pool — lifecycle of the worker processes.
//!
//! `WorkerPoolManager` is the only component that starts or stops
//! workers. Every mutation and every count goes through one lock, so a
//! controller tick and an operator action never interleave into an
//! inconsistent count.
//!
//! Workers are separate OS processes: a crashing worker cannot take the
//! controller or its siblings down with it.

pub mod command;
pub mod error;
pub mod manager;

pub use command::WorkerCommand;
pub use error::PoolError;
pub use manager::{WorkerPool, WorkerPoolManager};
