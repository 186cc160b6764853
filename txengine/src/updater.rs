//! Reconciles backend-reported transaction state into the ledger.

use std::collections::HashMap;
use std::sync::Arc;

use chain_backend::{Backend, DetailCategory, TxDetail, TxInfo};
use ledger::model::{NetworkTransactionType, TransactionState, UNSEEN_CONFIRMATIONS};
use ledger::{Session, TxUpdateEvent};
use rust_decimal::Decimal;
use thiserror::Error;
use tracing::{instrument, warn};

use crate::conflict::{ConflictError, ConflictResolver};
use crate::events::EventHandlerRegistry;

#[derive(Debug, Error)]
pub enum UpdaterError {
    #[error(transparent)]
    Conflict(#[from] ConflictError),

    #[error(transparent)]
    Backend(#[from] chain_backend::BackendError),
}

pub struct TransactionUpdater {
    coin: String,
    wallet_id: i64,
    confirmation_threshold: i32,
    backend: Arc<dyn Backend>,
    resolver: Arc<ConflictResolver>,
    events: Arc<EventHandlerRegistry>,
}

impl TransactionUpdater {
    pub fn new(
        coin: impl Into<String>,
        wallet_id: i64,
        confirmation_threshold: i32,
        backend: Arc<dyn Backend>,
        resolver: Arc<ConflictResolver>,
        events: Arc<EventHandlerRegistry>,
    ) -> Self {
        Self {
            coin: coin.into(),
            wallet_id,
            confirmation_threshold,
            backend,
            resolver,
            events,
        }
    }

    /// Entry point for a live incoming notification: fetch the backend's
    /// current view of `txid` and reconcile it as a deposit. Our own
    /// broadcasts are reconciled separately by the `ConfirmationPoller`,
    /// which already knows their type from the ledger.
    #[instrument(skip(self), fields(coin = %self.coin, %txid))]
    pub async fn handle_wallet_notify(&self, txid: &str) -> Result<(), UpdaterError> {
        let info = self.backend.get_transaction(txid).await?;
        self.update_network_transaction_confirmations(NetworkTransactionType::Deposit, txid, &info)
            .await?;
        Ok(())
    }

    /// Core reconciliation algorithm: create-or-fetch the
    /// `NetworkTransaction`, bail out early if nothing changed, otherwise
    /// update confirmations and, for deposits, credit accounts that just
    /// crossed the confirmation threshold. Runs as a single retryable
    /// `SERIALIZABLE` transaction; events are delivered only after commit.
    #[instrument(skip(self, info), fields(coin = %self.coin, %txid, ?transaction_type))]
    pub async fn update_network_transaction_confirmations(
        &self,
        transaction_type: NetworkTransactionType,
        txid: &str,
        info: &TxInfo,
    ) -> Result<(i64, Vec<TxUpdateEvent>), UpdaterError> {
        let coin = self.coin.clone();
        let wallet_id = self.wallet_id;
        let threshold = self.confirmation_threshold;
        let confirmations = info.confirmations;
        let details = info.details.clone();
        let txid = txid.to_owned();

        let (network_tx_id, events) = self
            .resolver
            .resolve(|session| {
                reconcile(
                    session,
                    &coin,
                    wallet_id,
                    threshold,
                    transaction_type,
                    &txid,
                    confirmations,
                    &details,
                )
            })
            .await?;

        self.events.deliver_all(&events).await;
        Ok((network_tx_id, events))
    }
}

async fn reconcile(
    session: &mut Session<'_>,
    coin: &str,
    wallet_id: i64,
    confirmation_threshold: i32,
    transaction_type: NetworkTransactionType,
    txid: &str,
    confirmations: i32,
    details: &[TxDetail],
) -> Result<(i64, Vec<TxUpdateEvent>), ledger::Error> {
    let network_tx = match transaction_type {
        NetworkTransactionType::Deposit => {
            session
                .get_or_create_network_transaction(wallet_id, transaction_type, txid)
                .await?
        }
        NetworkTransactionType::Broadcast => match session
            .find_network_transaction(transaction_type, txid)
            .await?
        {
            Some(existing) => existing,
            None => {
                warn!(%txid, "broadcast confirmation update for unknown network transaction");
                return Ok((0, Vec::new()));
            }
        },
    };

    if network_tx.transaction_type != transaction_type {
        warn!(
            %txid,
            expected = ?transaction_type,
            actual = ?network_tx.transaction_type,
            "network transaction type mismatch"
        );
        return Ok((network_tx.id, Vec::new()));
    }

    // No change since last observation, or a stale/regressed report: no-op.
    if confirmations <= network_tx.confirmations && network_tx.confirmations != UNSEEN_CONFIRMATIONS
    {
        return Ok((network_tx.id, Vec::new()));
    }

    session
        .update_network_transaction_confirmations(network_tx.id, confirmations)
        .await?;

    let mut events = Vec::new();
    match transaction_type {
        NetworkTransactionType::Deposit => {
            let mut by_address: HashMap<String, Decimal> = HashMap::new();
            for detail in details {
                if detail.category == DetailCategory::Receive {
                    *by_address.entry(detail.address.clone()).or_default() += detail.amount;
                }
            }
            for (address, amount) in by_address {
                let Some(known_address) = session.find_address(wallet_id, &address).await? else {
                    continue;
                };
                let Some(account_id) = known_address.account_id else {
                    continue;
                };

                let tx = match session
                    .find_deposit_transaction(network_tx.id, known_address.id)
                    .await?
                {
                    Some(tx) => tx,
                    None => {
                        session
                            .create_deposit_transaction(
                                wallet_id,
                                network_tx.id,
                                account_id,
                                known_address.id,
                                amount,
                            )
                            .await?
                    }
                };

                if tx.amount != amount {
                    warn!(
                        %txid,
                        stored = %tx.amount,
                        reported = %amount,
                        "deposit amount mismatch between ledger and backend"
                    );
                }

                let newly_credited = tx.credited_at.is_none() && confirmations >= confirmation_threshold;
                if newly_credited {
                    session
                        .credit_deposit(tx.id, account_id, known_address.id, wallet_id, amount)
                        .await?;
                    session
                        .mark_network_transaction_credited(network_tx.id)
                        .await?;
                }

                events.push(TxUpdateEvent {
                    coin: coin.to_owned(),
                    network_transaction_id: network_tx.id,
                    transaction_id: tx.id,
                    transaction_type,
                    txid: txid.to_owned(),
                    account_id,
                    address,
                    amount,
                    confirmations,
                    credited: Some(tx.credited_at.is_some() || newly_credited),
                });
            }
        }
        NetworkTransactionType::Broadcast => {
            let children = session
                .list_transactions_for_network_transaction(network_tx.id)
                .await?;
            for child in children {
                if matches!(
                    child.state,
                    TransactionState::Pending | TransactionState::Broadcasted
                ) {
                    events.push(TxUpdateEvent {
                        coin: coin.to_owned(),
                        network_transaction_id: network_tx.id,
                        transaction_id: child.id,
                        transaction_type,
                        txid: txid.to_owned(),
                        account_id: child.sending_account_id.unwrap_or_default(),
                        address: String::new(),
                        amount: child.amount,
                        confirmations,
                        credited: None,
                    });
                }
            }
        }
    }

    Ok((network_tx.id, events))
}
