//! Bundles pending outbound transactions into network broadcasts with
//! exactly-once send semantics under crash and contention. See the
//! collect/send-phase split documented on [`Broadcaster::run_once`].

use std::sync::Arc;

use chain_backend::Backend;
use rust_decimal::Decimal;
use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::conflict::{ConflictError, ConflictResolver};

#[derive(Debug, Error)]
pub enum BroadcastError {
    #[error(transparent)]
    Conflict(#[from] ConflictError),

    #[error(transparent)]
    Backend(#[from] chain_backend::BackendError),
}

pub struct Broadcaster {
    coin: String,
    wallet_id: i64,
    backend: Arc<dyn Backend>,
    resolver: Arc<ConflictResolver>,
}

impl Broadcaster {
    pub fn new(
        coin: impl Into<String>,
        wallet_id: i64,
        backend: Arc<dyn Backend>,
        resolver: Arc<ConflictResolver>,
    ) -> Self {
        Self {
            coin: coin.into(),
            wallet_id,
            backend,
            resolver,
        }
    }

    /// Broadcasts interrupted by a previous crash (opened but never closed)
    /// must never be retried automatically; this only reports them so the
    /// caller can log/alert. Call once at startup before the first
    /// `run_once`.
    #[instrument(skip(self), fields(coin = %self.coin))]
    pub async fn list_interrupted(&self) -> Result<Vec<i64>, BroadcastError> {
        let wallet_id = self.wallet_id;
        let rows = self
            .resolver
            .resolve(move |session| session.list_interrupted_broadcasts(wallet_id))
            .await?;
        let ids: Vec<i64> = rows.iter().map(|r| r.id).collect();
        if !ids.is_empty() {
            warn!(
                coin = %self.coin,
                ids = ?ids,
                "found interrupted broadcasts from a previous run; these require manual reconciliation"
            );
        }
        Ok(ids)
    }

    /// Runs one collect-then-send cycle. Returns the ids of broadcasts that
    /// were successfully closed this cycle.
    #[instrument(skip(self), fields(coin = %self.coin))]
    pub async fn run_once(&self) -> Result<Vec<i64>, BroadcastError> {
        let opened = self.collect().await?;
        let mut closed = Vec::new();
        for network_tx_id in opened {
            match self.send(network_tx_id).await {
                Ok(()) => closed.push(network_tx_id),
                Err(err) => {
                    warn!(%err, network_tx_id, "broadcast send phase failed; row left opened for manual reconciliation");
                }
            }
        }
        Ok(closed)
    }

    /// Collect phase: attach every pending outbound transaction with no
    /// network transaction yet to a fresh broadcast row. Pure ledger
    /// mutation, safe to retry on conflict.
    async fn collect(&self) -> Result<Vec<i64>, BroadcastError> {
        let wallet_id = self.wallet_id;
        let network_tx_id = self
            .resolver
            .resolve(move |session| {
                let wallet_id = wallet_id;
                async move {
                    let pending = session.list_pending_outbound(wallet_id).await?;
                    if pending.is_empty() {
                        return Ok(None);
                    }
                    let network_tx = session.create_broadcast_network_transaction(wallet_id).await?;
                    for tx in &pending {
                        session.attach_to_broadcast(tx.id, network_tx.id).await?;
                    }
                    Ok(Some(network_tx.id))
                }
            })
            .await?;
        Ok(network_tx_id.into_iter().collect())
    }

    /// Send phase for a single broadcast row: open it, call the backend,
    /// and close it. The call to `backend.send` is the single uncontrolled
    /// step; everything around it is a non-retryable managed transaction so
    /// a conflict there is surfaced rather than silently retried into a
    /// double-send.
    async fn send(&self, network_tx_id: i64) -> Result<(), BroadcastError> {
        let wallet_id = self.wallet_id;
        let outputs = self
            .resolver
            .run_once(move |session| {
                let wallet_id = wallet_id;
                async move {
                    session.open_broadcast(network_tx_id).await?;
                    let children = session
                        .list_transactions_for_network_transaction(network_tx_id)
                        .await?;
                    let mut by_address: std::collections::HashMap<i64, Decimal> =
                        std::collections::HashMap::new();
                    for child in &children {
                        if let Some(address_id) = child.address_id {
                            *by_address.entry(address_id).or_default() += child.amount;
                        }
                    }
                    let addresses = session.list_all_addresses(wallet_id).await?;
                    let mut outputs = Vec::new();
                    for (address_id, amount) in by_address {
                        if let Some(addr) = addresses.iter().find(|a| a.id == address_id) {
                            outputs.push((addr.address.clone(), amount));
                        }
                    }
                    Ok(outputs)
                }
            })
            .await?;

        if outputs.is_empty() {
            warn!(network_tx_id, "broadcast has no resolvable outputs, leaving opened");
            return Ok(());
        }

        let label = format!("Outgoing broadcast {network_tx_id}");
        let result = self.backend.send(outputs, &label).await?;
        info!(network_tx_id, txid = %result.txid, fee = %result.fee, "broadcast sent");

        let wallet_id = self.wallet_id;
        let txid = result.txid.clone();
        self.resolver
            .run_once(move |session| {
                let txid = txid.clone();
                async move {
                    session.close_broadcast(network_tx_id, &txid).await?;
                    session.mark_transactions_broadcasted(network_tx_id).await?;
                    Ok(())
                }
            })
            .await?;

        if result.fee > Decimal::ZERO {
            let fee = result.fee;
            self.resolver
                .resolve(move |session| async move {
                    let fee_account = session.get_or_create_fee_account(wallet_id).await?;
                    session.charge_network_fee(wallet_id, fee_account.id, fee).await
                })
                .await?;
        }

        Ok(())
    }
}
