//! Domain model structs and DTOs.

pub mod job;
pub mod status;
