//! Bounded worker pools and the harvest calendar.

mod calendar;
mod daemon;
mod types;

pub use calendar::CalendarScheduler;
pub use daemon::SchedulerDaemon;
pub use types::{Completion, DaemonConfig, RunState, WorkSource};
