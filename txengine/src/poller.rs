//! Periodically revisits open network transactions until they cross the
//! backend's confirmation threshold. Required for backends whose
//! notification transport only delivers the first sighting of a
//! transaction (see [`chain_backend::Backend::require_tracking_incoming_confirmations`]).

use std::sync::Arc;

use chain_backend::Backend;
use tracing::{instrument, warn};

use crate::conflict::ConflictResolver;
use crate::updater::{TransactionUpdater, UpdaterError};

pub struct ConfirmationPoller {
    coin: String,
    wallet_id: i64,
    backend: Arc<dyn Backend>,
    resolver: Arc<ConflictResolver>,
    updater: Arc<TransactionUpdater>,
}

impl ConfirmationPoller {
    pub fn new(
        coin: impl Into<String>,
        wallet_id: i64,
        backend: Arc<dyn Backend>,
        resolver: Arc<ConflictResolver>,
        updater: Arc<TransactionUpdater>,
    ) -> Self {
        Self {
            coin: coin.into(),
            wallet_id,
            backend,
            resolver,
            updater,
        }
    }

    #[instrument(skip(self), fields(coin = %self.coin))]
    pub async fn run_once(&self) -> Result<usize, UpdaterError> {
        let threshold = self.backend.max_tracked_incoming_confirmations();
        let wallet_id = self.wallet_id;
        let open = self
            .resolver
            .resolve(move |session| session.list_open_network_transactions(wallet_id, threshold))
            .await?;

        let mut updated = 0;
        for network_tx in open {
            let Some(txid) = network_tx.txid.clone() else {
                continue;
            };
            let info = match self.backend.get_transaction(&txid).await {
                Ok(info) => info,
                Err(err) => {
                    warn!(%txid, %err, "failed to fetch transaction during confirmation poll");
                    continue;
                }
            };
            self.updater
                .update_network_transaction_confirmations(
                    network_tx.transaction_type,
                    &txid,
                    &info,
                )
                .await?;
            updated += 1;
        }
        Ok(updated)
    }
}
