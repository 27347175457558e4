//! Partitioning of a unit of work into ranges and their execution on a
//! pool of local threads or remote workers.

pub mod progress;
pub mod range;
pub mod scheduler;

pub use progress::{DelayReporter, LogReporter, MuxReporter, Progress, ProgressReporter};
pub use range::{partition, TaskRange, Workload};
pub use scheduler::{LocalExecutor, ProcessFn, RangeExecutor, Scheduler};
