//! mdim Export Model
//!
//! Defines the data contracts of the export pipeline:
//! - **Settings:** Validated, immutable-per-run export parameters
//! - **Tier:** Size estimate and delivery-backend recommendation
//! - **Run:** The mutable state machine of a single export invocation
//!
//! Crop rectangles are normalized to `[0.0, 1.0]` relative to the rendered
//! frame so they survive resolution changes.

pub mod run;
pub mod settings;
pub mod tier;

pub use run::*;
pub use settings::*;
pub use tier::*;
