use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetailCategory {
    Receive,
    Send,
}

/// One output touched by a transaction, in the backend's native unit
/// already converted to the ledger's fixed-scale decimal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TxDetail {
    pub category: DetailCategory,
    pub address: String,
    pub amount: Decimal,
}

/// Normalized shape every backend must produce for a transaction, regardless
/// of whether it came from a node RPC call or a hosted wallet API response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TxInfo {
    pub txid: String,
    pub confirmations: i32,
    pub details: Vec<TxDetail>,
    /// Set by backends whose feed cannot distinguish incoming vs outgoing
    /// (hosted "receive only" notification streams).
    pub only_receive: bool,
}

impl TxInfo {
    /// Sum of `receive`-category amounts for a given address.
    pub fn received_at(&self, address: &str) -> Decimal {
        self.details
            .iter()
            .filter(|d| d.category == DetailCategory::Receive && d.address == address)
            .map(|d| d.amount)
            .sum()
    }

    /// Sum of `send`-category amounts for a given address.
    pub fn sent_to(&self, address: &str) -> Decimal {
        self.details
            .iter()
            .filter(|d| d.category == DetailCategory::Send && d.address == address)
            .map(|d| d.amount)
            .sum()
    }
}

/// A page of backend transaction history. Backends iterate forward from a
/// zero index (node-style) or backward from a cursor txid (hosted-style);
/// these are genuinely different shapes, not one interface squinted at, so
/// the cursor used to fetch the *next* page is carried explicitly rather
/// than assumed to be a single universal type.
#[derive(Debug, Clone)]
pub enum Cursor {
    /// Next call should start at this zero-based index into the backend's
    /// full history, oldest-first.
    Index(u64),
    /// Next call should return transactions strictly before this txid,
    /// newest-first.
    BeforeTxid(Option<String>),
    /// No further pages.
    Done,
}

#[derive(Debug, Clone)]
pub struct ReceivedPage {
    pub transactions: Vec<(String, TxInfo)>,
    pub next: Cursor,
}
