//! Fan-out delivery of `txupdate` events to configured sinks. Delivery
//! always happens after the owning ledger commit has succeeded and never
//! rolls it back; a sink failure is logged and, for HTTP/subprocess sinks,
//! left for the operator to notice.

use std::future::Future;
use std::pin::Pin;
use std::process::Stdio;

use ledger::TxUpdateEvent;
use thiserror::Error;
use tokio::process::Command;
use tracing::{instrument, warn};

#[derive(Debug, Error)]
pub enum EventSinkError {
    #[error("http sink error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("subprocess sink exited with status {0}")]
    SubprocessFailed(std::process::ExitStatus),

    #[error("subprocess sink io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// A destination for `txupdate` events.
#[async_trait::async_trait]
pub trait EventSink: Send + Sync {
    async fn deliver(&self, event: &TxUpdateEvent) -> Result<(), EventSinkError>;
}

/// Posts the event as a JSON body to a configured URL.
pub struct HttpEventSink {
    client: reqwest::Client,
    url: String,
}

impl HttpEventSink {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }
}

#[async_trait::async_trait]
impl EventSink for HttpEventSink {
    #[instrument(skip(self, event), fields(url = %self.url, txid = %event.txid))]
    async fn deliver(&self, event: &TxUpdateEvent) -> Result<(), EventSinkError> {
        self.client
            .post(&self.url)
            .json(event)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

/// Execs a configured program, passing the event as JSON on stdin and the
/// coin name and txid as environment variables.
pub struct SubprocessEventSink {
    program: String,
    args: Vec<String>,
}

impl SubprocessEventSink {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }
}

#[async_trait::async_trait]
impl EventSink for SubprocessEventSink {
    #[instrument(skip(self, event), fields(program = %self.program, txid = %event.txid))]
    async fn deliver(&self, event: &TxUpdateEvent) -> Result<(), EventSinkError> {
        use tokio::io::AsyncWriteExt;

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .env("TXUPDATE_COIN", &event.coin)
            .env("TXUPDATE_TXID", &event.txid)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .spawn()?;
        if let Some(mut stdin) = child.stdin.take() {
            let body = serde_json::to_vec(event)?;
            stdin.write_all(&body).await?;
        }
        let status = child.wait().await?;
        if !status.success() {
            return Err(EventSinkError::SubprocessFailed(status));
        }
        Ok(())
    }
}

type CallbackFn = Box<
    dyn Fn(&TxUpdateEvent) -> Pin<Box<dyn Future<Output = Result<(), EventSinkError>> + Send>>
        + Send
        + Sync,
>;

/// Delivers events to an in-process callback. Mostly useful for tests and
/// for embedding the engine in a larger application.
pub struct CallbackEventSink {
    callback: CallbackFn,
}

impl CallbackEventSink {
    pub fn new<F, Fut>(callback: F) -> Self
    where
        F: Fn(&TxUpdateEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), EventSinkError>> + Send + 'static,
    {
        Self {
            callback: Box::new(move |event| Box::pin(callback(event))),
        }
    }
}

#[async_trait::async_trait]
impl EventSink for CallbackEventSink {
    async fn deliver(&self, event: &TxUpdateEvent) -> Result<(), EventSinkError> {
        (self.callback)(event).await
    }
}

/// Holds the configured sinks and fans an event out to all of them.
#[derive(Default)]
pub struct EventHandlerRegistry {
    sinks: Vec<Box<dyn EventSink>>,
}

impl EventHandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, sink: Box<dyn EventSink>) {
        self.sinks.push(sink);
    }

    /// Delivers to every registered sink. Always runs to completion; a
    /// failing sink is logged and does not stop delivery to the rest.
    #[instrument(skip(self, event), fields(txid = %event.txid, sinks = self.sinks.len()))]
    pub async fn deliver(&self, event: &TxUpdateEvent) {
        for sink in &self.sinks {
            if let Err(err) = sink.deliver(event).await {
                warn!(%err, "event sink delivery failed");
            }
        }
    }

    pub async fn deliver_all(&self, events: &[TxUpdateEvent]) {
        for event in events {
            self.deliver(event).await;
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use ledger::NetworkTransactionType;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn sample_event() -> TxUpdateEvent {
        TxUpdateEvent {
            coin: "btc".to_owned(),
            network_transaction_id: 1,
            transaction_id: 1,
            transaction_type: NetworkTransactionType::Deposit,
            txid: "aa".to_owned(),
            account_id: 1,
            address: "addr1".to_owned(),
            amount: dec!(10),
            confirmations: 0,
            credited: Some(false),
        }
    }

    #[tokio::test]
    async fn callback_sink_receives_event() {
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = count.clone();
        let mut registry = EventHandlerRegistry::new();
        registry.register(Box::new(CallbackEventSink::new(move |_event| {
            let count = count_clone.clone();
            async move {
                count.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })));
        registry.deliver(&sample_event()).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failing_sink_does_not_block_others() {
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = count.clone();
        let mut registry = EventHandlerRegistry::new();
        registry.register(Box::new(CallbackEventSink::new(|_event| async move {
            Err(EventSinkError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "sink unavailable",
            )))
        })));
        registry.register(Box::new(CallbackEventSink::new(move |_event| {
            let count = count_clone.clone();
            async move {
                count.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })));
        registry.deliver(&sample_event()).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
