//! Capacity-aware job orchestration.
//!
//! The [`Orchestrator`] runs one tick at a time: reap stuck jobs, then for
//! each provider check capacity and pacing, claim the next job and hand it
//! to an [`Executor`](executors::Executor) on its own task.

pub mod capacity;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod executors;
pub mod feed;
pub mod reaper;
pub mod scheduler;
pub mod status;

pub use dispatcher::{Orchestrator, TickReport};
pub use error::OrchestratorError;
pub use scheduler::Scheduler;
