//! Master side of the distributed protocol.
//!
//! Every session gets a forwarding task that pushes its messages into one
//! event channel. The coordinator's operations (sync, process, gather) each
//! hold the event receiver for their duration, so they never interleave and
//! session state is only changed from one place at a time.

use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::time::{timeout, timeout_at, Instant};
use tracing::{debug, error, info, warn};

use super::link::Link;
use super::protocol::{compress, Message, WorkerId};
use super::session::{WorkerInfo, WorkerSession, WorkerState};
use crate::comp::{AccumBuffer, Context};
use crate::core::config::DistConfig;
use crate::core::errors::{LumenError, Result};
use crate::sched::{Progress, RangeExecutor, TaskRange};

/// Callback run after a worker reports a finished range, with the units it
/// processed
pub type TaskFinishedFn = dyn Fn(WorkerId, &TaskRange, u64) + Send + Sync;

enum Event {
    Joined(WorkerId),
    Message(WorkerId, Message),
    Closed(WorkerId),
}

/// What an event meant for the operation in progress
enum Applied {
    Joined(WorkerId),
    SyncAck(WorkerId),
    TaskDone {
        id: WorkerId,
        range: TaskRange,
        units: u64,
    },
    TaskFailed {
        id: WorkerId,
        range: TaskRange,
        message: String,
    },
    Gathered {
        id: WorkerId,
        buffer: std::result::Result<Vec<u8>, String>,
    },
    Lost {
        id: WorkerId,
        in_flight: Option<TaskRange>,
    },
    Ignored,
}

pub struct Coordinator {
    config: DistConfig,
    sessions: DashMap<WorkerId, WorkerSession>,
    next_id: AtomicU64,
    allow_connections: AtomicBool,
    events_tx: mpsc::Sender<Event>,
    events_rx: tokio::sync::Mutex<mpsc::Receiver<Event>>,
    // Sent to sessions joining after the last sync
    last_sync: Mutex<Option<Message>>,
    on_task_finished: Mutex<Option<Arc<TaskFinishedFn>>>,
}

impl Coordinator {
    pub fn new(config: DistConfig) -> Self {
        let (events_tx, events_rx) = mpsc::channel(config.channel_capacity.max(1));
        Self {
            config,
            sessions: DashMap::new(),
            next_id: AtomicU64::new(0),
            allow_connections: AtomicBool::new(true),
            events_tx,
            events_rx: tokio::sync::Mutex::new(events_rx),
            last_sync: Mutex::new(None),
            on_task_finished: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &DistConfig {
        &self.config
    }

    /// Gate new connections. Existing sessions are not affected.
    pub fn allow_connections(&self, allow: bool) {
        self.allow_connections.store(allow, Ordering::SeqCst);
        info!(allow = allow, "Worker connections {}", if allow { "allowed" } else { "closed" });
    }

    /// Run the handshake on `link` and register the session
    pub async fn accept(&self, mut link: Link) -> Result<WorkerId> {
        let peer = link.peer().to_string();
        let name = match timeout(self.config.sync_timeout(), link.recv()).await {
            Err(_) => return Err(LumenError::timeout("connection handshake", self.config.sync_timeout())),
            Ok(None) => return Err(LumenError::connection_lost(&peer, "closed during handshake")),
            Ok(Some(Message::ConnectRequest { name })) => name,
            Ok(Some(other)) => {
                return Err(LumenError::protocol(format!(
                    "expected ConnectRequest from {}, got {}",
                    peer,
                    other.name()
                )))
            }
        };

        if !self.allow_connections.load(Ordering::SeqCst) {
            let reason = "coordinator is not accepting connections".to_string();
            // The peer may already be gone; the rejection is best effort
            let _ = link.send(Message::ConnectRejected { reason: reason.clone() }).await;
            warn!(worker = %name, "Rejected worker connection");
            return Err(LumenError::connection_lost(name, reason));
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (sender, mut rx) = link.split();
        self.sessions
            .insert(id, WorkerSession::new(id, name.clone(), sender.clone()));

        if let Err(e) = sender.send(Message::ConnectAccepted { id }).await {
            self.mark_disconnected(id);
            return Err(e);
        }
        if let Some(mut session) = self.sessions.get_mut(&id) {
            session.state = WorkerState::Connected;
        }
        info!(worker = %name, id = id, "Worker connected");

        let events = self.events_tx.clone();
        if events.send(Event::Joined(id)).await.is_err() {
            return Err(LumenError::channel("coordinator-events", "event channel closed"));
        }
        tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                if events.send(Event::Message(id, msg)).await.is_err() {
                    return;
                }
            }
            let _ = events.send(Event::Closed(id)).await;
        });
        Ok(id)
    }

    /// Ship the serialized tree to every live session and wait for their
    /// acknowledgements. Returns the number of sessions that are now idle.
    pub async fn sync(&self, ctx: &Context) -> Result<usize> {
        let bytes = ctx.serialize_to_vec()?;
        let payload = if self.config.compress_sync {
            let data = compress(&bytes, self.config.compression_level)?;
            debug!(raw = bytes.len(), compressed = data.len(), "Compressed sync payload");
            Message::SyncPayload { compressed: true, data }
        } else {
            Message::SyncPayload { compressed: false, data: bytes }
        };
        *lock(&self.last_sync) = Some(payload.clone());

        let mut events = self.events_rx.lock().await;
        let targeted: BTreeSet<WorkerId> = self.live_ids().into_iter().collect();
        let mut pending = BTreeSet::new();
        for &id in &targeted {
            if self.send_to(id, payload.clone()).await {
                pending.insert(id);
            }
        }
        info!(workers = pending.len(), "Synchronizing state");

        let mut acked = 0;
        let deadline = Instant::now() + self.config.sync_timeout();
        while !pending.is_empty() {
            let event = match timeout_at(deadline, events.recv()).await {
                Ok(Some(event)) => event,
                Ok(None) | Err(_) => break,
            };
            match self.apply(event) {
                Applied::SyncAck(id) => {
                    if pending.remove(&id) {
                        acked += 1;
                    }
                }
                Applied::Joined(id) if !targeted.contains(&id) => {
                    if self.send_to(id, payload.clone()).await {
                        pending.insert(id);
                    }
                }
                Applied::Lost { id, .. } => {
                    pending.remove(&id);
                }
                _ => {}
            }
        }
        for id in &pending {
            warn!(id = id, "Worker did not acknowledge sync in time");
        }
        info!(acked = acked, "Sync finished");
        Ok(acked)
    }

    /// Hand `range` to the lowest-id idle session accepting work
    pub async fn dispatch(&self, range: TaskRange) -> Option<WorkerId> {
        self.dispatch_tagged(range).await.map(|(id, _)| id)
    }

    /// Like `dispatch`, also returning the range as tagged for the worker
    async fn dispatch_tagged(&self, range: TaskRange) -> Option<(WorkerId, TaskRange)> {
        loop {
            let id = self
                .sessions
                .iter()
                .filter(|s| s.is_available())
                .map(|s| s.id)
                .min()?;
            let range = TaskRange { executor: id as usize, ..range };
            if self.send_to(id, Message::TaskRange(range)).await {
                if let Some(mut session) = self.sessions.get_mut(&id) {
                    session.state = WorkerState::Busy;
                    session.in_flight = Some(range);
                }
                debug!(id = id, start = range.start, end = range.end, "Dispatched range");
                return Some((id, range));
            }
        }
    }

    /// Include or exclude a session from dispatch without disconnecting it
    pub fn set_accepts_work(&self, id: WorkerId, accepts: bool) -> Result<()> {
        let mut session = self
            .sessions
            .get_mut(&id)
            .ok_or_else(|| LumenError::not_found("worker", id.to_string()))?;
        session.accepts_work = accepts;
        Ok(())
    }

    pub fn on_task_finished<F>(&self, f: F)
    where
        F: Fn(WorkerId, &TaskRange, u64) + Send + Sync + 'static,
    {
        *lock(&self.on_task_finished) = Some(Arc::new(f));
    }

    /// Dispatch every range and wait until all of them are reported done.
    ///
    /// The in-flight range of a worker that disconnects or fails it is queued
    /// again, at most `max_range_retries` times. Results for ranges this call
    /// did not hand out (e.g. sent with `dispatch`) are dropped.
    pub async fn process(&self, ranges: Vec<TaskRange>, progress: &Progress) -> Result<()> {
        let mut events = self.events_rx.lock().await;
        let callback = lock(&self.on_task_finished).clone();
        let mut queue: VecDeque<TaskRange> = ranges.into();
        let mut retries: HashMap<(u64, u64), u32> = HashMap::new();
        // Ranges handed out by this call and not yet reported
        let mut owned: HashSet<(WorkerId, TaskRange)> = HashSet::new();

        info!(ranges = queue.len(), workers = self.live_ids().len(), "Starting distributed processing");
        loop {
            while let Some(range) = queue.front().copied() {
                let Some(tagged) = self.dispatch_tagged(range).await else {
                    break;
                };
                queue.pop_front();
                owned.insert(tagged);
            }
            if queue.is_empty() && owned.is_empty() {
                break;
            }

            let event = if owned.is_empty() {
                // Nothing running and nobody to run it
                match timeout(self.config.worker_wait_timeout(), events.recv()).await {
                    Ok(Some(event)) => event,
                    Ok(None) => return Err(LumenError::channel("coordinator-events", "event channel closed")),
                    Err(_) => {
                        error!(remaining = queue.len(), "No worker available to process ranges");
                        return Err(LumenError::connection_lost(
                            "workers",
                            format!(
                                "no worker became available within {}ms, {} ranges left",
                                self.config.worker_wait_timeout_ms,
                                queue.len()
                            ),
                        ));
                    }
                }
            } else {
                events
                    .recv()
                    .await
                    .ok_or_else(|| LumenError::channel("coordinator-events", "event channel closed"))?
            };

            match self.apply(event) {
                Applied::TaskDone { id, range, units } => {
                    if !owned.remove(&(id, range)) {
                        debug!(id = id, start = range.start, end = range.end, "Dropping result of a foreign range");
                        continue;
                    }
                    progress.add(units);
                    if let Some(cb) = &callback {
                        cb(id, &range, units);
                    }
                }
                Applied::TaskFailed { id, range, message } => {
                    if !owned.remove(&(id, range)) {
                        debug!(id = id, start = range.start, end = range.end, "Dropping failure of a foreign range");
                        continue;
                    }
                    warn!(id = id, start = range.start, end = range.end, error = %message, "Range failed on worker");
                    self.requeue(range, &mut queue, &mut retries)?;
                }
                Applied::Lost { id, in_flight } => {
                    if let Some(range) = in_flight.filter(|r| owned.remove(&(id, *r))) {
                        warn!(id = id, start = range.start, end = range.end, "Re-queueing range of lost worker");
                        self.requeue(range, &mut queue, &mut retries)?;
                    }
                }
                Applied::Joined(id) if self.state_of(id) == Some(WorkerState::Connected) => {
                    let payload = lock(&self.last_sync).clone();
                    if let Some(payload) = payload {
                        self.send_to(id, payload).await;
                    }
                }
                Applied::Joined(_) => {}
                Applied::SyncAck(_) | Applied::Gathered { .. } | Applied::Ignored => {}
            }
        }
        info!(processed = progress.completed(), "Distributed processing finished");
        Ok(())
    }

    /// Tell every live session that processing is over
    pub async fn notify_process_completed(&self) {
        for id in self.live_ids() {
            if self.send_to(id, Message::CompletedNotice).await {
                if let Some(mut session) = self.sessions.get_mut(&id) {
                    session.state = WorkerState::Draining;
                }
            }
        }
    }

    /// Collect the accumulation buffer at `film_loc` from every live session
    /// and add them into the local one, in worker-id order.
    /// Returns the number of merged buffers.
    pub async fn gather(&self, ctx: &mut Context, film_loc: &str) -> Result<usize> {
        if ctx.resolve(film_loc)?.accumulation().is_none() {
            return Err(LumenError::not_found("accumulation buffer", film_loc));
        }

        let mut events = self.events_rx.lock().await;
        let expected: BTreeSet<WorkerId> = self.live_ids().into_iter().collect();
        let mut pending = expected.clone();
        let mut replies: BTreeMap<WorkerId, AccumBuffer> = BTreeMap::new();

        for attempt in 0..=self.config.gather_retries {
            if pending.is_empty() {
                break;
            }
            if attempt > 0 {
                let delay = self.config.retry_delay(attempt);
                warn!(silent = ?pending, attempt = attempt, delay_ms = delay.as_millis() as u64, "Retrying gather");
                tokio::time::sleep(delay).await;
            }
            let request = Message::GatherRequest { film: film_loc.to_string() };
            for id in pending.clone() {
                if !self.send_to(id, request.clone()).await {
                    pending.remove(&id);
                }
            }

            let deadline = Instant::now() + self.config.gather_timeout();
            while !pending.is_empty() {
                let event = match timeout_at(deadline, events.recv()).await {
                    Ok(Some(event)) => event,
                    Ok(None) | Err(_) => break,
                };
                match self.apply(event) {
                    Applied::Gathered { id, buffer } => {
                        // First reply per worker wins
                        if !pending.remove(&id) {
                            continue;
                        }
                        match buffer.and_then(|b| AccumBuffer::from_bytes(&b).map_err(|e| e.to_string())) {
                            Ok(buf) => {
                                replies.insert(id, buf);
                            }
                            Err(e) => warn!(id = id, error = %e, "Worker sent no usable buffer"),
                        }
                    }
                    Applied::Lost { id, .. } => {
                        pending.remove(&id);
                    }
                    _ => {}
                }
            }
        }

        for id in &pending {
            warn!(id = id, "Worker did not answer gather request, dropping it");
            self.mark_disconnected(*id);
        }
        if replies.is_empty() {
            return Err(LumenError::GatherIncomplete {
                film: film_loc.to_string(),
                replied: 0,
                expected: expected.len(),
            });
        }

        let film = ctx
            .resolve_mut(film_loc)?
            .get_mut()
            .accumulation_mut()
            .ok_or_else(|| LumenError::not_found("accumulation buffer", film_loc))?;
        let mut merged = 0;
        for (id, buf) in &replies {
            match film.merge(buf) {
                Ok(()) => merged += 1,
                Err(e) => warn!(id = id, error = %e, "Skipping buffer"),
            }
        }
        if merged == 0 {
            return Err(LumenError::GatherIncomplete {
                film: film_loc.to_string(),
                replied: 0,
                expected: expected.len(),
            });
        }
        info!(merged = merged, expected = expected.len(), film = %film_loc, "Gathered results");
        Ok(merged)
    }

    /// Log a line per session and return the snapshots
    pub fn print_worker_info(&self) -> Vec<WorkerInfo> {
        let infos = self.sessions();
        info!(count = infos.len(), "Workers");
        for w in &infos {
            info!(
                id = w.id,
                name = %w.name,
                state = %w.state,
                accepts_work = w.accepts_work,
                processed_units = w.processed_units,
                completed_ranges = w.completed_ranges,
                "Worker"
            );
        }
        infos
    }

    /// Snapshots of every known session, ordered by id
    pub fn sessions(&self) -> Vec<WorkerInfo> {
        let mut infos: Vec<WorkerInfo> = self.sessions.iter().map(|s| s.info()).collect();
        infos.sort_by_key(|w| w.id);
        infos
    }

    /// Number of sessions that are not disconnected
    pub fn live_count(&self) -> usize {
        self.live_ids().len()
    }

    /// Send `Shutdown` to every live session and drop them
    pub async fn shutdown(&self) {
        for id in self.live_ids() {
            self.send_to(id, Message::Shutdown).await;
            self.mark_disconnected(id);
        }
        info!("Coordinator shut down");
    }

    fn state_of(&self, id: WorkerId) -> Option<WorkerState> {
        self.sessions.get(&id).map(|s| s.state)
    }

    fn live_ids(&self) -> Vec<WorkerId> {
        let mut ids: Vec<WorkerId> = self
            .sessions
            .iter()
            .filter(|s| s.state.is_live())
            .map(|s| s.id)
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Send to a session. A failed send disconnects it.
    async fn send_to(&self, id: WorkerId, msg: Message) -> bool {
        let sender = match self.sessions.get(&id) {
            Some(session) if session.state.is_live() => session.sender(),
            _ => None,
        };
        let Some(sender) = sender else {
            return false;
        };
        match sender.send(msg).await {
            Ok(()) => true,
            Err(e) => {
                warn!(id = id, error = %e, "Send failed, disconnecting worker");
                self.mark_disconnected(id);
                false
            }
        }
    }

    fn mark_disconnected(&self, id: WorkerId) -> Option<TaskRange> {
        self.sessions.get_mut(&id).and_then(|mut s| s.disconnect())
    }

    fn requeue(
        &self,
        range: TaskRange,
        queue: &mut VecDeque<TaskRange>,
        retries: &mut HashMap<(u64, u64), u32>,
    ) -> Result<()> {
        let count = retries.entry((range.start, range.end)).or_insert(0);
        *count += 1;
        if *count > self.config.max_range_retries {
            error!(start = range.start, end = range.end, retries = *count - 1, "Range exceeded retry limit");
            return Err(LumenError::connection_lost(
                "workers",
                format!(
                    "range [{}, {}) failed {} times",
                    range.start, range.end, count
                ),
            ));
        }
        queue.push_back(range);
        Ok(())
    }

    fn apply(&self, event: Event) -> Applied {
        let (id, msg) = match event {
            Event::Joined(id) => return Applied::Joined(id),
            Event::Closed(id) => {
                let Some(mut session) = self.sessions.get_mut(&id) else {
                    return Applied::Ignored;
                };
                if !session.state.is_live() {
                    return Applied::Ignored;
                }
                info!(id = id, name = %session.name, "Worker disconnected");
                let in_flight = session.disconnect();
                return Applied::Lost { id, in_flight };
            }
            Event::Message(id, msg) => (id, msg),
        };

        let Some(mut session) = self.sessions.get_mut(&id) else {
            return Applied::Ignored;
        };
        if !session.state.is_live() {
            return Applied::Ignored;
        }
        match msg {
            Message::SyncAck => {
                if session.state != WorkerState::Busy {
                    session.state = WorkerState::Idle;
                }
                Applied::SyncAck(id)
            }
            Message::TaskResult { range, units, error } => {
                if session.in_flight != Some(range) {
                    warn!(id = id, start = range.start, end = range.end, "Result for a range that is not in flight");
                    return Applied::Ignored;
                }
                session.in_flight = None;
                if session.state == WorkerState::Busy {
                    session.state = WorkerState::Idle;
                }
                match error {
                    None => {
                        session.processed_units += units;
                        session.completed_ranges += 1;
                        Applied::TaskDone { id, range, units }
                    }
                    Some(message) => Applied::TaskFailed { id, range, message },
                }
            }
            Message::GatherReply { buffer } => {
                session.last_gathered = buffer.as_ref().ok().map(Vec::len);
                Applied::Gathered { id, buffer }
            }
            other => {
                warn!(id = id, message = other.name(), "Unexpected message from worker");
                Applied::Ignored
            }
        }
    }
}

#[async_trait]
impl RangeExecutor for Coordinator {
    async fn execute(&self, ranges: Vec<TaskRange>, progress: Arc<Progress>) -> Result<()> {
        self.process(ranges, &progress).await
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
