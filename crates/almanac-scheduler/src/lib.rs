//! `almanac-scheduler`: minute-resolution job scheduler for a virtual clock.
//!
//! # Overview
//!
//! Jobs are declared with a five-field crontab line and a named callback:
//!
//! ```text
//! <minute> <hour> <weekday> <season> <moon_phase> <callback> [args...] [# job_id]
//! ```
//!
//! The [`JobRegistry`] resolves each job into a minute-of-day index
//! (0..1439). The [`SchedulerEngine`] samples a [`TimeSource`] on every poll
//! and dispatches every job due between the previous poll and now, wrapping
//! at midnight, so a clock that jumps several minutes still fires each
//! matching minute exactly once.
//!
//! # Field categories
//!
//! | Column     | Range | Aliases                                      |
//! |------------|-------|----------------------------------------------|
//! | minute     | 0-59  |                                              |
//! | hour       | 0-23  |                                              |
//! | weekday    | 0-6   | `SU` … `SA`                                  |
//! | season     | 0-3   | `SUMMER`, `FALL`/`AUTUMN`, `WINTER`, `SPRING`/`EASTER` |
//! | moon phase | 0-7   | `NEW_MOON` … `WANING_CRESCENT`               |

pub mod calendar;
pub mod callbacks;
pub mod clock;
pub mod crontab;
pub mod engine;
pub mod error;
pub mod field;
pub mod profile;
pub mod registry;
pub mod store;

pub use callbacks::{CallbackError, CallbackRegistry, CallbackResult, JobCallback};
pub use clock::{ClockReading, TimeSource, VirtualClock};
pub use engine::{PollOutcome, PollReport, SchedulerEngine, SchedulerHandle};
pub use error::{ParseError, Result, SchedulerError};
pub use registry::{CronJob, JobRegistry, JobSpec, JobSummary};
pub use store::CrontabFile;
