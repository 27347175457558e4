//! TCP transport: bridges length-prefixed frames onto a [`Link`].

use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tracing::{debug, info, warn};

use super::coordinator::Coordinator;
use super::link::Link;
use super::protocol::{read_frame, write_frame};
use crate::core::config::DistConfig;
use crate::core::errors::{LumenError, Result};

/// Spawn the reader and writer tasks of `stream` and return the local end.
///
/// The link reports `None` once the socket is closed or sends a bad frame;
/// dropping the link shuts the socket down.
pub fn bridge(stream: TcpStream, peer: &str, config: &DistConfig) -> Link {
    let (local, remote) = Link::pair(config.channel_capacity, "local", peer);
    let (to_local, mut from_local) = remote.split();
    let (mut read_half, mut write_half) = stream.into_split();
    let max = config.max_frame_bytes;

    let reader_peer = peer.to_string();
    tokio::spawn(async move {
        loop {
            match read_frame(&mut read_half, max).await {
                Ok(Some(msg)) => {
                    if to_local.send(msg).await.is_err() {
                        break;
                    }
                }
                Ok(None) => {
                    debug!(peer = %reader_peer, "Connection closed by peer");
                    break;
                }
                Err(e) => {
                    warn!(peer = %reader_peer, error = %e, "Dropping connection");
                    break;
                }
            }
        }
    });

    let writer_peer = peer.to_string();
    tokio::spawn(async move {
        while let Some(msg) = from_local.recv().await {
            if let Err(e) = write_frame(&mut write_half, &msg, max).await {
                warn!(peer = %writer_peer, error = %e, "Failed to write frame");
                break;
            }
        }
    });

    local
}

/// Connect to a coordinator listening at `addr`
pub async fn connect<A: ToSocketAddrs + std::fmt::Display>(addr: A, config: &DistConfig) -> Result<Link> {
    let peer = addr.to_string();
    let stream = TcpStream::connect(addr)
        .await
        .map_err(|e| LumenError::connection_lost(&peer, e.to_string()))?;
    stream
        .set_nodelay(true)
        .map_err(|e| LumenError::io("set TCP_NODELAY", e))?;
    info!(peer = %peer, "Connected");
    Ok(bridge(stream, &peer, config))
}

pub async fn bind(addr: &str) -> Result<TcpListener> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| LumenError::io(format!("bind {}", addr), e))?;
    info!(address = %addr, "Listening for workers");
    Ok(listener)
}

/// Accept workers forever, handing each connection to the coordinator
pub async fn serve(listener: TcpListener, coordinator: Arc<Coordinator>) -> Result<()> {
    loop {
        let (stream, addr) = listener
            .accept()
            .await
            .map_err(|e| LumenError::io("accept worker connection", e))?;
        if let Err(e) = stream.set_nodelay(true) {
            warn!(peer = %addr, error = %e, "Failed to set TCP_NODELAY");
        }
        let link = bridge(stream, &addr.to_string(), coordinator.config());
        let coordinator = coordinator.clone();
        tokio::spawn(async move {
            if let Err(e) = coordinator.accept(link).await {
                warn!(peer = %addr, error = %e, "Worker connection refused");
            }
        });
    }
}
