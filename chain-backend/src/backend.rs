use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::error::Result;
use crate::types::{Cursor, ReceivedPage, TxInfo};

/// A single outbound payment instruction: address and amount in the
/// ledger's fixed-scale decimal.
pub type SendOutputs = Vec<(String, Decimal)>;

/// Result of a successful broadcast: the txid the network assigned and the
/// fee the backend charged, both in the ledger's decimal.
#[derive(Debug, Clone)]
pub struct SendResult {
    pub txid: String,
    pub fee: Decimal,
}

/// Abstracts a chain provider: a full node speaking JSON-RPC, or a hosted
/// wallet's HTTP API. Implementations live outside this crate; this trait
/// is the seam the engine programs against.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Human-readable name, used in logs and config lookups.
    fn name(&self) -> &str;

    async fn create_address(&self, label: &str) -> Result<String>;

    async fn get_transaction(&self, txid: &str) -> Result<TxInfo>;

    /// Balances for a batch of addresses, in the ledger's decimal.
    async fn get_balances(&self, addresses: &[String]) -> Result<Vec<(String, Decimal)>>;

    /// The backend's own view of total spendable balance at or above the
    /// given confirmation count.
    async fn get_backend_balance(&self, confirmations: i32) -> Result<Decimal>;

    async fn send(&self, outputs: SendOutputs, label: &str) -> Result<SendResult>;

    async fn list_received_transactions(&self, cursor: Cursor) -> Result<ReceivedPage>;

    /// Backends whose notification transport only delivers the first
    /// sighting of a transaction (rather than pushing every confirmation
    /// update) return `true`; the `ConfirmationPoller` is required for them.
    fn require_tracking_incoming_confirmations(&self) -> bool;

    /// Confirmation count above which a deposit is considered permanently
    /// final and will no longer be re-fetched by the poller.
    fn max_tracked_incoming_confirmations(&self) -> i32;
}
