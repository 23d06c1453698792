//! Hostcall Telemetry - logging setup for hosts embedding guest plugins.
//!
//! This crate provides:
//! - Configurable `tracing` subscriber setup with multiple formats
//! - Stdout, stderr or single-file destinations
//! - [`set_log_file`] for routing everything to one place in a single call
//!
//! # Example
//!
//! ```rust,no_run
//! use hostcall_telemetry::{LogConfig, LogFormat, setup_logging};
//!
//! # fn main() -> Result<(), hostcall_telemetry::TelemetryError> {
//! let config = LogConfig::new("debug")
//!     .with_format(LogFormat::Pretty)
//!     .with_directive("hostcall_core=trace");
//!
//! setup_logging(&config)?;
//! tracing::info!("host ready");
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

mod error;
mod logging;

pub use error::{TelemetryError, TelemetryResult};
pub use logging::{
    LogConfig, LogFormat, LogTarget, set_log_file, setup_default_logging, setup_logging,
};
