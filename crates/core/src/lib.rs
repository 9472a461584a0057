//! `voxreel-core` -- orchestration of external narration and rendering engines.
//!
//! The speech synthesizer, the scene renderer and ffmpeg are external
//! processes. This crate writes their inputs, runs them to completion under a
//! timeout, and checks what they leave on disk.

pub mod audio;
pub mod config;
pub mod error;
pub mod ffmpeg;
pub mod narration;
pub mod process;
pub mod rendering;

pub use error::CoreError;
