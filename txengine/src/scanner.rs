//! Startup reconciliation: walks backend history for deposits the service
//! missed while it was down.

use std::collections::HashSet;
use std::sync::Arc;

use chain_backend::{Backend, Cursor};
use tracing::{info, instrument, warn};

use crate::conflict::ConflictResolver;
use crate::updater::{TransactionUpdater, UpdaterError};

pub struct ReceiveScanner {
    coin: String,
    wallet_id: i64,
    backend: Arc<dyn Backend>,
    resolver: Arc<ConflictResolver>,
    updater: Arc<TransactionUpdater>,
}

impl ReceiveScanner {
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
    pub async fn run(&self) -> Result<usize, UpdaterError> {
        let wallet_id = self.wallet_id;
        let threshold = self.backend.max_tracked_incoming_confirmations();

        let known_addresses: HashSet<String> = self
            .resolver
            .resolve(move |session| session.list_all_addresses(wallet_id))
            .await?
            .into_iter()
            .map(|a| a.address)
            .collect();
        let confirmed: HashSet<String> = self
            .resolver
            .resolve(move |session| session.list_confirmed_txids(wallet_id, threshold))
            .await?
            .into_iter()
            .collect();

        let mut cursor = Cursor::Index(0);
        let mut handled = 0;
        loop {
            let page = match self.backend.list_received_transactions(cursor).await {
                Ok(page) => page,
                Err(err) => {
                    warn!(%err, "receive scan stopped early on backend error");
                    break;
                }
            };
            for (txid, info) in &page.transactions {
                if confirmed.contains(txid) {
                    continue;
                }
                let touches_known_address = info
                    .details
                    .iter()
                    .any(|d| known_addresses.contains(&d.address));
                if !touches_known_address {
                    continue;
                }
                self.updater.handle_wallet_notify(txid).await?;
                handled += 1;
            }
            cursor = page.next;
            if matches!(cursor, Cursor::Done) {
                break;
            }
        }
        info!(handled, "receive scan complete");
        Ok(handled)
    }
}
