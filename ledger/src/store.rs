//! Ledger persistence. A [`PgLedgerStore`] opens [`Session`]s, each wrapping
//! a single `SERIALIZABLE` Postgres transaction. Callers (the txengine
//! crate's `ConflictResolver`) are responsible for retrying a session on a
//! serialization conflict; this module only exposes the primitive queries
//! and the conflict-classification helper.

use chrono::Utc;
use rust_decimal::Decimal;
use sqlx::postgres::{PgPoolOptions, Postgres};
use sqlx::{Executor, Pool, Transaction};

use crate::error::{Error, Result};
use crate::model::{
    Account, Address, NetworkTransaction, NetworkTransactionState, NetworkTransactionType,
    Transaction as LedgerTransaction, TransactionState, Wallet, FEE_ACCOUNT_NAME,
    UNSEEN_CONFIRMATIONS,
};

/// SQLSTATEs Postgres uses to signal that a `SERIALIZABLE` transaction must
/// be retried: `40001` serialization_failure, `40P01` deadlock_detected.
pub fn is_serialization_conflict(err: &sqlx::Error) -> bool {
    matches!(
        err.as_database_error().and_then(|e| e.code()),
        Some(code) if code == "40001" || code == "40P01"
    )
}

#[derive(Clone)]
pub struct PgLedgerStore {
    pool: Pool<Postgres>,
}

impl PgLedgerStore {
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    /// Begin a new `SERIALIZABLE` unit of work.
    pub async fn begin(&self) -> Result<Session<'_>> {
        let mut tx = self.pool.begin().await?;
        tx.execute("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE")
            .await?;
        Ok(Session { tx })
    }

    pub fn pool(&self) -> &Pool<Postgres> {
        &self.pool
    }
}

/// One `SERIALIZABLE` transaction's worth of ledger operations.
pub struct Session<'c> {
    tx: Transaction<'c, Postgres>,
}

impl<'c> Session<'c> {
    pub async fn commit(self) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }

    pub async fn rollback(self) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }

    pub async fn get_or_create_wallet(&mut self, coin: &str, name: &str) -> Result<Wallet> {
        if let Some(w) = self.find_wallet(coin, name).await? {
            return Ok(w);
        }
        let now = Utc::now();
        sqlx::query_as::<_, Wallet>(
            "INSERT INTO wallets (coin, name, balance, created_at, updated_at)
             VALUES ($1, $2, 0, $3, $3)
             ON CONFLICT (coin, name) DO UPDATE SET coin = EXCLUDED.coin
             RETURNING *",
        )
        .bind(coin)
        .bind(name)
        .bind(now)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(Error::from)
    }

    pub async fn find_wallet(&mut self, coin: &str, name: &str) -> Result<Option<Wallet>> {
        sqlx::query_as::<_, Wallet>("SELECT * FROM wallets WHERE coin = $1 AND name = $2")
            .bind(coin)
            .bind(name)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(Error::from)
    }

    pub async fn get_or_create_account(
        &mut self,
        wallet_id: i64,
        name: &str,
    ) -> Result<Account> {
        let now = Utc::now();
        sqlx::query_as::<_, Account>(
            "INSERT INTO accounts (wallet_id, name, balance, created_at, updated_at)
             VALUES ($1, $2, 0, $3, $3)
             ON CONFLICT (wallet_id, name) DO UPDATE SET name = EXCLUDED.name
             RETURNING *",
        )
        .bind(wallet_id)
        .bind(name)
        .bind(now)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(Error::from)
    }

    pub async fn get_or_create_fee_account(&mut self, wallet_id: i64) -> Result<Account> {
        self.get_or_create_account(wallet_id, FEE_ACCOUNT_NAME).await
    }

    pub async fn get_account(&mut self, account_id: i64) -> Result<Account> {
        sqlx::query_as::<_, Account>("SELECT * FROM accounts WHERE id = $1")
            .bind(account_id)
            .fetch_optional(&mut *self.tx)
            .await?
            .ok_or(Error::NoSuchAccount(account_id))
    }

    /// Resolve an address string to the deposit account that owns it, if any.
    pub async fn find_address(&mut self, wallet_id: i64, address: &str) -> Result<Option<Address>> {
        sqlx::query_as::<_, Address>(
            "SELECT * FROM addresses WHERE wallet_id = $1 AND address = $2",
        )
        .bind(wallet_id)
        .bind(address)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(Error::from)
    }

    pub async fn create_deposit_address(
        &mut self,
        wallet_id: i64,
        account_id: i64,
        address: &str,
        label: Option<&str>,
    ) -> Result<Address> {
        sqlx::query_as::<_, Address>(
            "INSERT INTO addresses (wallet_id, account_id, address, label, balance)
             VALUES ($1, $2, $3, $4, 0)
             RETURNING *",
        )
        .bind(wallet_id)
        .bind(account_id)
        .bind(address)
        .bind(label)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(Error::from)
    }

    /// Lazily materialize an external (non-owned) send destination.
    pub async fn get_or_create_external_address(
        &mut self,
        wallet_id: i64,
        address: &str,
    ) -> Result<Address> {
        if let Some(a) = self.find_address(wallet_id, address).await? {
            return Ok(a);
        }
        sqlx::query_as::<_, Address>(
            "INSERT INTO addresses (wallet_id, account_id, address, balance)
             VALUES ($1, NULL, $2, 0)
             ON CONFLICT (wallet_id, address) DO UPDATE SET address = EXCLUDED.address
             RETURNING *",
        )
        .bind(wallet_id)
        .bind(address)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(Error::from)
    }

    pub async fn list_all_addresses(&mut self, wallet_id: i64) -> Result<Vec<Address>> {
        sqlx::query_as::<_, Address>("SELECT * FROM addresses WHERE wallet_id = $1")
            .bind(wallet_id)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(Error::from)
    }

    /// Idempotent: returns the existing row if `(transaction_type, txid)`
    /// already exists, otherwise creates it with `confirmations = -1`.
    pub async fn get_or_create_network_transaction(
        &mut self,
        wallet_id: i64,
        transaction_type: NetworkTransactionType,
        txid: &str,
    ) -> Result<NetworkTransaction> {
        if let Some(existing) = self.find_network_transaction(transaction_type, txid).await? {
            return Ok(existing);
        }
        let state = match transaction_type {
            NetworkTransactionType::Deposit => NetworkTransactionState::Incoming,
            NetworkTransactionType::Broadcast => NetworkTransactionState::Pending,
        };
        sqlx::query_as::<_, NetworkTransaction>(
            "INSERT INTO network_transactions
                (wallet_id, txid, transaction_type, state, confirmations)
             VALUES ($1, $2, $3, $4, $5)
             ON CONFLICT (transaction_type, txid) DO UPDATE SET txid = EXCLUDED.txid
             RETURNING *",
        )
        .bind(wallet_id)
        .bind(txid)
        .bind(transaction_type)
        .bind(state)
        .bind(UNSEEN_CONFIRMATIONS)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(Error::from)
    }

    pub async fn find_network_transaction(
        &mut self,
        transaction_type: NetworkTransactionType,
        txid: &str,
    ) -> Result<Option<NetworkTransaction>> {
        sqlx::query_as::<_, NetworkTransaction>(
            "SELECT * FROM network_transactions WHERE transaction_type = $1 AND txid = $2",
        )
        .bind(transaction_type)
        .bind(txid)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(Error::from)
    }

    pub async fn get_network_transaction(&mut self, id: i64) -> Result<NetworkTransaction> {
        sqlx::query_as::<_, NetworkTransaction>("SELECT * FROM network_transactions WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?
            .ok_or_else(|| Error::NoSuchAddress(format!("network_transaction id {id}")))
    }

    pub async fn update_network_transaction_confirmations(
        &mut self,
        id: i64,
        confirmations: i32,
    ) -> Result<()> {
        sqlx::query("UPDATE network_transactions SET confirmations = $2 WHERE id = $1")
            .bind(id)
            .bind(confirmations)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    pub async fn mark_network_transaction_credited(&mut self, id: i64) -> Result<()> {
        sqlx::query(
            "UPDATE network_transactions SET state = 'credited' WHERE id = $1",
        )
        .bind(id)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    pub async fn open_broadcast(&mut self, id: i64) -> Result<()> {
        sqlx::query("UPDATE network_transactions SET opened_at = now() WHERE id = $1")
            .bind(id)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    pub async fn close_broadcast(&mut self, id: i64, txid: &str) -> Result<()> {
        sqlx::query(
            "UPDATE network_transactions
             SET txid = $2, closed_at = now(), state = 'broadcasted'
             WHERE id = $1",
        )
        .bind(id)
        .bind(txid)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    pub async fn list_open_network_transactions(
        &mut self,
        wallet_id: i64,
        threshold: i32,
    ) -> Result<Vec<NetworkTransaction>> {
        sqlx::query_as::<_, NetworkTransaction>(
            "SELECT * FROM network_transactions
             WHERE wallet_id = $1 AND txid IS NOT NULL AND confirmations < $2",
        )
        .bind(wallet_id)
        .bind(threshold)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(Error::from)
    }

    pub async fn list_interrupted_broadcasts(
        &mut self,
        wallet_id: i64,
    ) -> Result<Vec<NetworkTransaction>> {
        sqlx::query_as::<_, NetworkTransaction>(
            "SELECT * FROM network_transactions
             WHERE wallet_id = $1 AND transaction_type = 'broadcast'
               AND opened_at IS NOT NULL AND closed_at IS NULL",
        )
        .bind(wallet_id)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(Error::from)
    }

    pub async fn list_confirmed_txids(&mut self, wallet_id: i64, threshold: i32) -> Result<Vec<String>> {
        sqlx::query_scalar(
            "SELECT txid FROM network_transactions
             WHERE wallet_id = $1 AND txid IS NOT NULL AND confirmations >= $2",
        )
        .bind(wallet_id)
        .bind(threshold)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(Error::from)
    }

    pub async fn list_pending_outbound(&mut self, wallet_id: i64) -> Result<Vec<LedgerTransaction>> {
        sqlx::query_as::<_, LedgerTransaction>(
            "SELECT * FROM transactions
             WHERE wallet_id = $1 AND state = 'pending'
               AND receiving_account_id IS NULL AND network_transaction_id IS NULL",
        )
        .bind(wallet_id)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(Error::from)
    }

    pub async fn list_transactions_for_network_transaction(
        &mut self,
        network_transaction_id: i64,
    ) -> Result<Vec<LedgerTransaction>> {
        sqlx::query_as::<_, LedgerTransaction>(
            "SELECT * FROM transactions WHERE network_transaction_id = $1",
        )
        .bind(network_transaction_id)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(Error::from)
    }

    pub async fn find_deposit_transaction(
        &mut self,
        network_transaction_id: i64,
        address_id: i64,
    ) -> Result<Option<LedgerTransaction>> {
        sqlx::query_as::<_, LedgerTransaction>(
            "SELECT * FROM transactions
             WHERE network_transaction_id = $1 AND address_id = $2",
        )
        .bind(network_transaction_id)
        .bind(address_id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(Error::from)
    }

    pub async fn create_deposit_transaction(
        &mut self,
        wallet_id: i64,
        network_transaction_id: i64,
        account_id: i64,
        address_id: i64,
        amount: Decimal,
    ) -> Result<LedgerTransaction> {
        sqlx::query_as::<_, LedgerTransaction>(
            "INSERT INTO transactions
                (wallet_id, amount, state, receiving_account_id, address_id,
                 network_transaction_id, created_at)
             VALUES ($1, $2, 'incoming', $3, $4, $5, now())
             RETURNING *",
        )
        .bind(wallet_id)
        .bind(amount)
        .bind(account_id)
        .bind(address_id)
        .bind(network_transaction_id)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(Error::from)
    }

    /// Credits a deposit transaction and its receiving account, address, and
    /// wallet balances atomically. Must only be called once per transaction
    /// (I4); callers check `credited_at.is_none()` first.
    pub async fn credit_deposit(
        &mut self,
        transaction_id: i64,
        account_id: i64,
        address_id: i64,
        wallet_id: i64,
        amount: Decimal,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE transactions SET credited_at = now(), state = 'processed',
                processed_at = now() WHERE id = $1",
        )
        .bind(transaction_id)
        .execute(&mut *self.tx)
        .await?;
        sqlx::query("UPDATE accounts SET balance = balance + $2, updated_at = now() WHERE id = $1")
            .bind(account_id)
            .bind(amount)
            .execute(&mut *self.tx)
            .await?;
        sqlx::query("UPDATE addresses SET balance = balance + $2 WHERE id = $1")
            .bind(address_id)
            .bind(amount)
            .execute(&mut *self.tx)
            .await?;
        sqlx::query("UPDATE wallets SET balance = balance + $2, updated_at = now() WHERE id = $1")
            .bind(wallet_id)
            .bind(amount)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    pub async fn create_pending_send(
        &mut self,
        wallet_id: i64,
        sending_account_id: i64,
        address_id: i64,
        amount: Decimal,
        label: Option<&str>,
    ) -> Result<LedgerTransaction> {
        let account = self.get_account(sending_account_id).await?;
        if !account.is_fee_account() && account.balance < amount {
            return Err(Error::NotEnoughAccountBalance {
                account: account.name,
                balance: account.balance,
                amount,
            });
        }
        sqlx::query(
            "UPDATE accounts SET balance = balance - $2, updated_at = now() WHERE id = $1",
        )
        .bind(sending_account_id)
        .bind(amount)
        .execute(&mut *self.tx)
        .await?;
        sqlx::query("UPDATE wallets SET balance = balance - $2, updated_at = now() WHERE id = $1")
            .bind(wallet_id)
            .bind(amount)
            .execute(&mut *self.tx)
            .await?;
        sqlx::query_as::<_, LedgerTransaction>(
            "INSERT INTO transactions
                (wallet_id, amount, state, sending_account_id, address_id, label, created_at)
             VALUES ($1, $2, 'pending', $3, $4, $5, now())
             RETURNING *",
        )
        .bind(wallet_id)
        .bind(amount)
        .bind(sending_account_id)
        .bind(address_id)
        .bind(label)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(Error::from)
    }

    pub async fn attach_to_broadcast(
        &mut self,
        transaction_id: i64,
        network_transaction_id: i64,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE transactions SET network_transaction_id = $2 WHERE id = $1",
        )
        .bind(transaction_id)
        .bind(network_transaction_id)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    pub async fn create_broadcast_network_transaction(
        &mut self,
        wallet_id: i64,
    ) -> Result<NetworkTransaction> {
        sqlx::query_as::<_, NetworkTransaction>(
            "INSERT INTO network_transactions
                (wallet_id, txid, transaction_type, state, confirmations)
             VALUES ($1, NULL, 'broadcast', 'pending', $2)
             RETURNING *",
        )
        .bind(wallet_id)
        .bind(UNSEEN_CONFIRMATIONS)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(Error::from)
    }

    pub async fn mark_transactions_broadcasted(&mut self, network_transaction_id: i64) -> Result<()> {
        sqlx::query(
            "UPDATE transactions
             SET state = 'broadcasted', processed_at = now()
             WHERE network_transaction_id = $1",
        )
        .bind(network_transaction_id)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    pub async fn charge_network_fee(
        &mut self,
        wallet_id: i64,
        fee_account_id: i64,
        amount: Decimal,
    ) -> Result<LedgerTransaction> {
        sqlx::query(
            "UPDATE accounts SET balance = balance - $2, updated_at = now() WHERE id = $1",
        )
        .bind(fee_account_id)
        .bind(amount)
        .execute(&mut *self.tx)
        .await?;
        sqlx::query("UPDATE wallets SET balance = balance - $2, updated_at = now() WHERE id = $1")
            .bind(wallet_id)
            .bind(amount)
            .execute(&mut *self.tx)
            .await?;
        sqlx::query_as::<_, LedgerTransaction>(
            "INSERT INTO transactions
                (wallet_id, amount, state, sending_account_id, created_at, processed_at)
             VALUES ($1, $2, 'network_fee', $3, now(), now())
             RETURNING *",
        )
        .bind(wallet_id)
        .bind(amount)
        .bind(fee_account_id)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(Error::from)
    }

    /// Internal transfer between two accounts of the same wallet. Rejects
    /// transfers within a single account and insufficient balances (I2).
    pub async fn create_internal_transfer(
        &mut self,
        wallet_id: i64,
        sending_account_id: i64,
        receiving_account_id: i64,
        amount: Decimal,
        label: Option<&str>,
    ) -> Result<LedgerTransaction> {
        if sending_account_id == receiving_account_id {
            let account = self.get_account(sending_account_id).await?;
            return Err(Error::SameAccount {
                account: account.name,
            });
        }
        let sender = self.get_account(sending_account_id).await?;
        if sender.balance < amount {
            return Err(Error::NotEnoughAccountBalance {
                account: sender.name,
                balance: sender.balance,
                amount,
            });
        }
        sqlx::query(
            "UPDATE accounts SET balance = balance - $2, updated_at = now() WHERE id = $1",
        )
        .bind(sending_account_id)
        .bind(amount)
        .execute(&mut *self.tx)
        .await?;
        sqlx::query(
            "UPDATE accounts SET balance = balance + $2, updated_at = now() WHERE id = $1",
        )
        .bind(receiving_account_id)
        .bind(amount)
        .execute(&mut *self.tx)
        .await?;
        sqlx::query_as::<_, LedgerTransaction>(
            "INSERT INTO transactions
                (wallet_id, amount, state, sending_account_id, receiving_account_id,
                 label, created_at, processed_at)
             VALUES ($1, $2, 'internal', $3, $4, $5, now(), now())
             RETURNING *",
        )
        .bind(wallet_id)
        .bind(amount)
        .bind(sending_account_id)
        .bind(receiving_account_id)
        .bind(label)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(Error::from)
    }
}
