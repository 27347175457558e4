use serde::Serialize;
use std::fmt;

use super::link::LinkSender;
use super::protocol::WorkerId;
use crate::sched::TaskRange;

/// Lifecycle of a worker session on the coordinator side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum WorkerState {
    /// Handshake in progress
    Connecting,
    /// Accepted but has not acknowledged a sync yet
    Connected,
    Idle,
    Busy,
    /// Processing completed, only gather requests are answered
    Draining,
    Disconnected,
}

impl WorkerState {
    pub fn is_live(self) -> bool {
        !matches!(self, WorkerState::Disconnected)
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug)]
pub struct WorkerSession {
    pub id: WorkerId,
    pub name: String,
    pub state: WorkerState,
    pub accepts_work: bool,
    pub in_flight: Option<TaskRange>,
    pub processed_units: u64,
    pub completed_ranges: u64,
    /// Size in bytes of the last gathered buffer
    pub last_gathered: Option<usize>,
    sender: Option<LinkSender>,
}

impl WorkerSession {
    pub fn new(id: WorkerId, name: String, sender: LinkSender) -> Self {
        Self {
            id,
            name,
            state: WorkerState::Connecting,
            accepts_work: true,
            in_flight: None,
            processed_units: 0,
            completed_ranges: 0,
            last_gathered: None,
            sender: Some(sender),
        }
    }

    pub fn sender(&self) -> Option<LinkSender> {
        self.sender.clone()
    }

    /// Can take a range right now
    pub fn is_available(&self) -> bool {
        self.state == WorkerState::Idle && self.accepts_work && self.in_flight.is_none()
    }

    /// Drop the connection and return the range that was in flight
    pub fn disconnect(&mut self) -> Option<TaskRange> {
        self.state = WorkerState::Disconnected;
        self.sender = None;
        self.in_flight.take()
    }

    pub fn info(&self) -> WorkerInfo {
        WorkerInfo {
            id: self.id,
            name: self.name.clone(),
            state: self.state,
            accepts_work: self.accepts_work,
            processed_units: self.processed_units,
            completed_ranges: self.completed_ranges,
        }
    }
}

/// Snapshot of a session for reporting
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkerInfo {
    pub id: WorkerId,
    pub name: String,
    pub state: WorkerState,
    pub accepts_work: bool,
    pub processed_units: u64,
    pub completed_ranges: u64,
}
