//! Incoming-notification transports. Each transport reads its own socket or
//! subscription and feeds bare txids into a bounded channel; a single
//! consumer task (the engine's `TransactionUpdater`) drains the channel.
//! This crate ships only the in-process `ChannelNotifier`; wire transports
//! (named pipe, HTTP hook, pub/sub, websocket, webhook) plug into the same
//! `IncomingNotifier` trait from outside this crate.

use async_trait::async_trait;
use tokio::sync::mpsc;

/// A source of incoming-transaction notifications for one backend.
#[async_trait]
pub trait IncomingNotifier: Send {
    /// Wait for the next notified txid. Returns `None` once the transport
    /// has been shut down and will never produce another notification.
    async fn recv(&mut self) -> Option<String>;
}

/// An in-process notifier fed by a plain `mpsc` channel. Useful for tests,
/// for the `scan-received` CLI (which needs no live transport), and as the
/// template a future wire transport's producer side is built from.
pub struct ChannelNotifier {
    rx: mpsc::Receiver<String>,
}

impl ChannelNotifier {
    pub fn new(buffer: usize) -> (mpsc::Sender<String>, Self) {
        let (tx, rx) = mpsc::channel(buffer);
        (tx, Self { rx })
    }
}

#[async_trait]
impl IncomingNotifier for ChannelNotifier {
    async fn recv(&mut self) -> Option<String> {
        self.rx.recv().await
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn delivers_in_order_and_closes() {
        let (tx, mut notifier) = ChannelNotifier::new(4);
        tx.send("aa".to_owned()).await.unwrap();
        tx.send("bb".to_owned()).await.unwrap();
        assert_eq!(notifier.recv().await.as_deref(), Some("aa"));
        assert_eq!(notifier.recv().await.as_deref(), Some("bb"));
        drop(tx);
        assert_eq!(notifier.recv().await, None);
    }
}
