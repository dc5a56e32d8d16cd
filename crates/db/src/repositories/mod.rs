//! Repository layer: one zero-sized struct per table with async query methods.

pub mod job_repo;

pub use job_repo::{GroupColumn, JobRepo};
