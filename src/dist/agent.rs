//! Worker side of the distributed protocol.

use tracing::{debug, info, warn};

use super::link::Link;
use super::protocol::{decompress, Message, WorkerId};
use crate::comp::Context;
use crate::core::errors::{LumenError, Result};
use crate::sched::TaskRange;

/// Processes one range `[start, end)` against the synchronized tree
pub type AgentProcessFn = Box<dyn FnMut(&mut Context, u64, u64) -> Result<()> + Send>;

/// Runs after each `CompletedNotice`
pub type ProcessCompletedFn = Box<dyn FnMut(&mut Context) + Send>;

pub struct Agent {
    id: WorkerId,
    name: String,
    link: Link,
    ctx: Context,
    process: Option<AgentProcessFn>,
    on_completed: Option<ProcessCompletedFn>,
}

impl Agent {
    /// Connect with a context holding the built-in components
    pub async fn connect(link: Link, name: impl Into<String>) -> Result<Self> {
        Self::connect_with(link, name, Context::new()).await
    }

    /// Connect using `ctx`, e.g. one with native modules already loaded
    pub async fn connect_with(mut link: Link, name: impl Into<String>, ctx: Context) -> Result<Self> {
        let name = name.into();
        link.send(Message::ConnectRequest { name: name.clone() }).await?;
        let id = match link.recv().await {
            Some(Message::ConnectAccepted { id }) => id,
            Some(Message::ConnectRejected { reason }) => {
                warn!(worker = %name, reason = %reason, "Connection rejected");
                return Err(LumenError::connection_lost(link.peer(), format!("rejected: {}", reason)));
            }
            Some(other) => {
                return Err(LumenError::protocol(format!(
                    "expected ConnectAccepted, got {}",
                    other.name()
                )))
            }
            None => return Err(LumenError::connection_lost(link.peer(), "closed during handshake")),
        };
        info!(worker = %name, id = id, "Connected to coordinator");
        Ok(Self {
            id,
            name,
            link,
            ctx,
            process: None,
            on_completed: None,
        })
    }

    pub fn id(&self) -> WorkerId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Set the function run for every received range. It runs on the agent's
    /// task, so heavy work should be bounded per range.
    pub fn register_process_fn<F>(&mut self, f: F)
    where
        F: FnMut(&mut Context, u64, u64) -> Result<()> + Send + 'static,
    {
        self.process = Some(Box::new(f));
    }

    pub fn on_process_completed<F>(&mut self, f: F)
    where
        F: FnMut(&mut Context) + Send + 'static,
    {
        self.on_completed = Some(Box::new(f));
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    pub fn context_mut(&mut self) -> &mut Context {
        &mut self.ctx
    }

    /// Serve the coordinator until `Shutdown`, or until the link closes after
    /// processing completed. Losing the link earlier is `ConnectionLost`.
    pub async fn run(&mut self) -> Result<()> {
        let mut completed = false;
        loop {
            let Some(msg) = self.link.recv().await else {
                if completed {
                    info!(worker = %self.name, "Coordinator closed the connection");
                    return Ok(());
                }
                return Err(LumenError::connection_lost(
                    self.link.peer(),
                    "link closed before processing completed",
                ));
            };

            match msg {
                Message::SyncPayload { compressed, data } => {
                    self.apply_sync(compressed, &data)?;
                    completed = false;
                    self.link.send(Message::SyncAck).await?;
                }
                Message::TaskRange(range) => {
                    let reply = self.process_range(range);
                    self.link.send(reply).await?;
                }
                Message::CompletedNotice => {
                    completed = true;
                    debug!(worker = %self.name, "Processing completed");
                    if let Some(f) = self.on_completed.as_mut() {
                        f(&mut self.ctx);
                    }
                }
                Message::GatherRequest { film } => {
                    let buffer = self.accumulation_bytes(&film).map_err(|e| e.to_string());
                    self.link.send(Message::GatherReply { buffer }).await?;
                }
                Message::Shutdown => {
                    info!(worker = %self.name, "Shutdown requested");
                    return Ok(());
                }
                other => warn!(worker = %self.name, message = other.name(), "Unexpected message"),
            }
        }
    }

    fn apply_sync(&mut self, compressed: bool, data: &[u8]) -> Result<()> {
        let bytes = if compressed {
            decompress(data)?
        } else {
            data.to_vec()
        };
        self.ctx.deserialize_from_slice(&bytes)?;
        // Only this worker's own contributions are sent back on gather
        self.ctx.clear_accumulation();
        debug!(worker = %self.name, bytes = bytes.len(), "Applied sync payload");
        Ok(())
    }

    fn process_range(&mut self, range: TaskRange) -> Message {
        let result = match self.process.as_mut() {
            Some(f) => f(&mut self.ctx, range.start, range.end),
            None => Err(LumenError::configuration("no process function registered")),
        };
        if let Err(e) = &result {
            warn!(worker = %self.name, start = range.start, end = range.end, error = %e, "Range failed");
        }
        Message::TaskResult {
            range,
            units: range.len(),
            error: result.err().map(|e| e.to_string()),
        }
    }

    fn accumulation_bytes(&self, film: &str) -> Result<Vec<u8>> {
        self.ctx
            .resolve(film)?
            .accumulation()
            .ok_or_else(|| LumenError::not_found("accumulation buffer", film))?
            .to_bytes()
    }
}
