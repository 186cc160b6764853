//! The durable ledger: wallets, accounts, addresses, and the internal and
//! network transactions that move balances between them.
//!
//! Every mutator in [`store::Session`] runs as part of a single
//! `SERIALIZABLE` Postgres transaction; the txengine crate's
//! `ConflictResolver` is what actually retries a `Session` on conflict.

pub mod error;
pub mod model;
pub mod store;

pub use error::{Error, Result};
pub use model::{
    Account, Address, NetworkTransaction, NetworkTransactionState, NetworkTransactionType,
    Transaction, TransactionState, TxUpdateEvent, Wallet, FEE_ACCOUNT_NAME,
};
pub use store::{is_serialization_conflict, PgLedgerStore, Session};
