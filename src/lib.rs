// Lets `#[component]` expand to `::lumen::...` inside this crate too
extern crate self as lumen;

// Core infrastructure modules
pub mod core {
    pub mod config;
    pub mod errors;
    pub mod logging;
}

pub mod comp;   // Component runtime
pub mod serial; // Persistence codec
pub mod sched;  // Task scheduling
pub mod dist;   // Coordinator/agent protocol

pub use lumen_macros::component;
#[doc(hidden)]
pub use linkme;

// Re-exports for convenience
pub use comp::{Component, Context, Locator, Ptr, Registry, WeakRef};
pub use crate::core::config::{DistConfig, EngineConfig};
pub use crate::core::errors::{ErrorKind, LumenError, Result};
pub use dist::{Agent, Coordinator, Link};
pub use sched::{Progress, RangeExecutor, Scheduler, TaskRange, Workload};
