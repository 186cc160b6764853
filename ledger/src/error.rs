use rust_decimal::Decimal;
use thiserror::Error;

/// Errors surfaced by ledger operations. Matches the error kinds a caller
/// (the txengine layer, or the application) needs to discriminate on; see
/// the crate's originating specification for the exact semantics of each.
#[derive(Debug, Error)]
pub enum Error {
    #[error("account {account} has balance {balance} but {amount} was requested")]
    NotEnoughAccountBalance {
        account: String,
        balance: Decimal,
        amount: Decimal,
    },

    #[error("wallet {wallet} has balance {balance} but {amount} was requested")]
    NotEnoughWalletBalance {
        wallet: String,
        balance: Decimal,
        amount: Decimal,
    },

    #[error("source and destination account are the same: {account}")]
    SameAccount { account: String },

    #[error("address rejected by validator: {address}")]
    BadAddress { address: String },

    #[error("no such wallet: {0}")]
    NoSuchWallet(String),

    #[error("no such account: {0}")]
    NoSuchAccount(i64),

    #[error("no such address: {0}")]
    NoSuchAddress(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
}

pub type Result<T> = std::result::Result<T, Error>;
