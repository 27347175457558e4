//! Master/worker distribution of task ranges.

pub mod agent;
pub mod coordinator;
pub mod link;
pub mod protocol;
pub mod session;
pub mod tcp;

pub use agent::{Agent, AgentProcessFn, ProcessCompletedFn};
pub use coordinator::{Coordinator, TaskFinishedFn};
pub use link::{Link, LinkSender};
pub use protocol::{Message, WorkerId};
pub use session::{WorkerInfo, WorkerSession, WorkerState};
