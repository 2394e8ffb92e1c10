//! Telemetry plumbing for pmm.
//!
//! The core emits structured events and `tracing` spans; sinks,
//! exposition formats and notification routing live outside this
//! repository. This crate only initializes the subscriber.

mod error;
mod logging;

pub use error::{TelemetryError, TelemetryResult};
pub use logging::init_logging;
