//! Shared configuration and error types for the almanac workspace.

pub mod config;
pub mod error;

pub use config::{AlmanacConfig, ClockConfig, SchedulerConfig};
pub use error::{AlmanacError, Result};
