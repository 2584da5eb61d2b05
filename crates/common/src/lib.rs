//! mdim Common Utilities
//!
//! Shared infrastructure for all mdim crates:
//! - Error taxonomy and result alias for the export pipeline
//! - Deterministic export clock (frame timestamps, pre-roll, frame counts)
//! - Tracing/logging initialization
//! - Configuration loading

pub mod clock;
pub mod config;
pub mod error;
pub mod logging;

pub use clock::*;
pub use config::*;
pub use error::*;
