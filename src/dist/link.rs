use tokio::sync::mpsc;

use super::protocol::Message;
use crate::core::errors::{LumenError, Result};

/// Sending half of a [`Link`]
#[derive(Debug, Clone)]
pub struct LinkSender {
    tx: mpsc::Sender<Message>,
    peer: String,
}

impl LinkSender {
    pub async fn send(&self, msg: Message) -> Result<()> {
        let name = msg.name();
        self.tx
            .send(msg)
            .await
            .map_err(|_| LumenError::connection_lost(&self.peer, format!("link closed while sending {}", name)))
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }
}

/// Bidirectional message channel to one peer
#[derive(Debug)]
pub struct Link {
    sender: LinkSender,
    rx: mpsc::Receiver<Message>,
}

impl Link {
    /// Two connected ends. `a` talks to the peer named `b_name` and vice versa.
    pub fn pair(capacity: usize, a_name: &str, b_name: &str) -> (Link, Link) {
        let (a_tx, b_rx) = mpsc::channel(capacity.max(1));
        let (b_tx, a_rx) = mpsc::channel(capacity.max(1));
        let a = Link {
            sender: LinkSender { tx: a_tx, peer: b_name.to_string() },
            rx: a_rx,
        };
        let b = Link {
            sender: LinkSender { tx: b_tx, peer: a_name.to_string() },
            rx: b_rx,
        };
        (a, b)
    }

    pub async fn send(&self, msg: Message) -> Result<()> {
        self.sender.send(msg).await
    }

    /// Next message, `None` once the peer is gone
    pub async fn recv(&mut self) -> Option<Message> {
        self.rx.recv().await
    }

    pub fn peer(&self) -> &str {
        self.sender.peer()
    }

    pub fn split(self) -> (LinkSender, mpsc::Receiver<Message>) {
        (self.sender, self.rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::errors::ErrorKind;

    #[tokio::test]
    async fn test_pair_and_close() {
        let (a, mut b) = Link::pair(4, "master", "worker");
        assert_eq!(a.peer(), "worker");
        assert_eq!(b.peer(), "master");

        a.send(Message::SyncAck).await.unwrap();
        assert_eq!(b.recv().await, Some(Message::SyncAck));

        drop(a);
        assert_eq!(b.recv().await, None);
        let err = b.send(Message::Shutdown).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConnectionLost);
    }
}
