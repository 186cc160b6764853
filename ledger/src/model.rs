use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Name reserved for the per-wallet account that accumulates network fees.
/// This is the only account permitted to carry a negative balance.
pub const FEE_ACCOUNT_NAME: &str = "network_fees";

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Wallet {
    pub id: i64,
    pub coin: String,
    pub name: String,
    pub balance: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Account {
    pub id: i64,
    pub wallet_id: i64,
    pub name: String,
    pub balance: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    pub fn is_fee_account(&self) -> bool {
        self.name == FEE_ACCOUNT_NAME
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Address {
    pub id: i64,
    pub wallet_id: i64,
    /// `NULL` means this is an external send-only destination, never a
    /// deposit address we control.
    pub account_id: Option<i64>,
    pub address: String,
    pub label: Option<String>,
    /// Lifetime amount received at this address.
    pub balance: Decimal,
    pub archived_at: Option<DateTime<Utc>>,
}

impl Address {
    pub fn is_deposit_address(&self) -> bool {
        self.account_id.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
#[sqlx(type_name = "transaction_state", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TransactionState {
    Pending,
    Broadcasted,
    Incoming,
    Processed,
    Internal,
    NetworkFee,
    BalanceImport,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Transaction {
    pub id: i64,
    pub wallet_id: i64,
    pub amount: Decimal,
    pub state: TransactionState,
    pub sending_account_id: Option<i64>,
    pub receiving_account_id: Option<i64>,
    pub address_id: Option<i64>,
    pub network_transaction_id: Option<i64>,
    pub label: Option<String>,
    pub created_at: DateTime<Utc>,
    pub credited_at: Option<DateTime<Utc>>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl Transaction {
    /// True for a deposit: money arriving from outside the ledger.
    pub fn is_deposit(&self) -> bool {
        self.network_transaction_id.is_some() && self.sending_account_id.is_none()
    }

    /// True for a broadcast: money leaving the ledger to the outside world.
    pub fn is_broadcast(&self) -> bool {
        self.network_transaction_id.is_some() && self.receiving_account_id.is_none()
    }

    /// True for a transfer between two accounts of the same wallet.
    pub fn is_internal(&self) -> bool {
        self.sending_account_id.is_some() && self.receiving_account_id.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
#[sqlx(type_name = "network_transaction_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum NetworkTransactionType {
    Deposit,
    Broadcast,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
#[sqlx(type_name = "network_transaction_state", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum NetworkTransactionState {
    Incoming,
    Credited,
    Pending,
    Broadcasted,
}

/// Confirmation count used before any backend has reported a transaction.
pub const UNSEEN_CONFIRMATIONS: i32 = -1;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct NetworkTransaction {
    pub id: i64,
    pub wallet_id: i64,
    pub txid: Option<String>,
    pub transaction_type: NetworkTransactionType,
    pub state: NetworkTransactionState,
    pub confirmations: i32,
    pub opened_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl NetworkTransaction {
    /// A broadcast that was opened (send attempted) but never closed
    /// (no txid recorded) — the service cannot tell whether the send
    /// reached the network and must not retry it automatically.
    pub fn is_interrupted_broadcast(&self) -> bool {
        self.transaction_type == NetworkTransactionType::Broadcast
            && self.opened_at.is_some()
            && self.closed_at.is_none()
    }
}

/// A `txupdate` event, produced after a committed reconciliation and
/// delivered to the `EventHandlerRegistry` outside the database transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TxUpdateEvent {
    pub coin: String,
    pub network_transaction_id: i64,
    pub transaction_id: i64,
    pub transaction_type: NetworkTransactionType,
    pub txid: String,
    pub account_id: i64,
    pub address: String,
    /// Serialized as a string to preserve decimal precision across JSON.
    #[serde(with = "rust_decimal::serde::str")]
    pub amount: Decimal,
    pub confirmations: i32,
    pub credited: Option<bool>,
}
