//! `voxreel-worker` library crate.
//!
//! Re-exports the job runner for integration testing. The binary
//! entrypoint lives in `main.rs`.

pub mod job;
