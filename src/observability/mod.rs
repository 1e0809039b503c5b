//! Observability for the fetch layer.
//!
//! Every decision point (rate-limit waits, breaker transitions and
//! rejections, retries, timeouts) emits a `tracing` event. This module only
//! sets up a subscriber for applications that do not install their own.
//!
//! ```rust,no_run
//! use integrations_jobfetch::observability::{LogFormat, LogLevel, LoggingConfig};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! LoggingConfig::new()
//!     .with_level(LogLevel::Debug)
//!     .with_format(LogFormat::Json)
//!     .init()?;
//! # Ok(())
//! # }
//! ```

mod logging;

pub use logging::*;
