//! Coordinator/agent wire messages and their framing.

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::core::errors::{LumenError, Result};
use crate::sched::TaskRange;
use crate::serial;

/// Session id assigned by the coordinator
pub type WorkerId = u64;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Message {
    ConnectRequest { name: String },
    ConnectAccepted { id: WorkerId },
    ConnectRejected { reason: String },
    /// Serialized component tree, zstd-compressed when `compressed` is set
    SyncPayload { compressed: bool, data: Vec<u8> },
    SyncAck,
    TaskRange(TaskRange),
    TaskResult {
        range: TaskRange,
        units: u64,
        error: Option<String>,
    },
    CompletedNotice,
    /// Ask for the accumulation buffer of the component at `film`
    GatherRequest { film: String },
    GatherReply { buffer: std::result::Result<Vec<u8>, String> },
    Shutdown,
}

impl Message {
    pub fn name(&self) -> &'static str {
        match self {
            Message::ConnectRequest { .. } => "ConnectRequest",
            Message::ConnectAccepted { .. } => "ConnectAccepted",
            Message::ConnectRejected { .. } => "ConnectRejected",
            Message::SyncPayload { .. } => "SyncPayload",
            Message::SyncAck => "SyncAck",
            Message::TaskRange(_) => "TaskRange",
            Message::TaskResult { .. } => "TaskResult",
            Message::CompletedNotice => "CompletedNotice",
            Message::GatherRequest { .. } => "GatherRequest",
            Message::GatherReply { .. } => "GatherReply",
            Message::Shutdown => "Shutdown",
        }
    }
}

pub fn compress(data: &[u8], level: i32) -> Result<Vec<u8>> {
    zstd::encode_all(data, level).map_err(|e| LumenError::io("compress sync payload", e))
}

pub fn decompress(data: &[u8]) -> Result<Vec<u8>> {
    zstd::decode_all(data).map_err(|e| LumenError::io("decompress sync payload", e))
}

/// Write one frame: big-endian `u32` length, then the encoded message.
pub async fn write_frame<W>(writer: &mut W, msg: &Message, max_frame_bytes: usize) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let body = serial::encode(msg)?;
    if body.len() > max_frame_bytes || body.len() > u32::MAX as usize {
        return Err(LumenError::protocol(format!(
            "{} frame of {} bytes exceeds the limit of {} bytes",
            msg.name(),
            body.len(),
            max_frame_bytes
        )));
    }
    writer
        .write_all(&(body.len() as u32).to_be_bytes())
        .await
        .map_err(|e| LumenError::io("write frame length", e))?;
    writer
        .write_all(&body)
        .await
        .map_err(|e| LumenError::io("write frame body", e))?;
    writer
        .flush()
        .await
        .map_err(|e| LumenError::io("flush frame", e))
}

/// Read one frame. Returns `None` on a clean end of stream between frames.
pub async fn read_frame<R>(reader: &mut R, max_frame_bytes: usize) -> Result<Option<Message>>
where
    R: AsyncRead + Unpin,
{
    let mut len = [0u8; 4];
    match reader.read_exact(&mut len).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(LumenError::io("read frame length", e)),
    }
    let len = u32::from_be_bytes(len) as usize;
    if len > max_frame_bytes {
        return Err(LumenError::protocol(format!(
            "incoming frame of {} bytes exceeds the limit of {} bytes",
            len, max_frame_bytes
        )));
    }
    let mut body = vec![0u8; len];
    reader
        .read_exact(&mut body)
        .await
        .map_err(|e| LumenError::io("read frame body", e))?;
    Ok(Some(serial::decode(&body)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::errors::ErrorKind;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_frames_over_duplex() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        let sent = vec![
            Message::ConnectRequest { name: "w0".into() },
            Message::TaskRange(TaskRange::new(0, 16, 1)),
            Message::GatherReply { buffer: Err("no film".into()) },
        ];
        for msg in &sent {
            write_frame(&mut a, msg, 1 << 20).await.unwrap();
        }
        drop(a);

        let mut received = Vec::new();
        while let Some(msg) = read_frame(&mut b, 1 << 20).await.unwrap() {
            received.push(msg);
        }
        assert_eq!(received, sent);
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        let msg = Message::SyncPayload { compressed: false, data: vec![0; 512] };
        let err = write_frame(&mut a, &msg, 64).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Protocol);

        a.write_all(&(1u32 << 30).to_be_bytes()).await.unwrap();
        let err = read_frame(&mut b, 64).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Protocol);
    }

    #[test]
    fn test_compression() {
        let data = vec![7u8; 4096];
        let packed = compress(&data, 3).unwrap();
        assert!(packed.len() < data.len());
        assert_eq!(decompress(&packed).unwrap(), data);
    }
}
