//! Domain primitives shared by the store, the dispatcher and any tooling.
//!
//! This crate has zero internal dependencies.

pub mod error;
pub mod job_type;
pub mod providers;
pub mod scheduling;
pub mod types;
