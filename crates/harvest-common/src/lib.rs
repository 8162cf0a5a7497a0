//! Shared error handling and logging for the mbz-harvest workspace.
//!
//! # Overview
//!
//! - **Error Handling**: the [`HarvestError`] taxonomy and its [`Result`]
//!   alias, used at every library seam in `harvest-ingest`
//! - **Logging**: `tracing` subscriber initialization driven by a small
//!   [`logging::LogConfig`]

pub mod error;
pub mod logging;

// Re-export commonly used types
pub use error::{HarvestError, Result};
