//! A deterministic, in-memory [`Backend`] used by the engine's own test
//! suite (and by `scan-received --dry-run`-style exercising). Not a network
//! client: all state lives in a [`std::sync::Mutex`] and every "send"
//! assigns a sequential fake txid.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::backend::{Backend, SendOutputs, SendResult};
use crate::error::{BackendError, Result};
use crate::types::{Cursor, ReceivedPage, TxInfo};

#[derive(Default)]
struct State {
    transactions: HashMap<String, TxInfo>,
    /// Oldest-first order, for `list_received_transactions`.
    order: Vec<String>,
    next_send_id: u64,
    addresses: u64,
    balances: HashMap<String, Decimal>,
}

pub struct MockBackend {
    name: String,
    state: Mutex<State>,
    require_polling: bool,
    max_tracked_confirmations: i32,
    fee: Decimal,
}

impl MockBackend {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(State::default()),
            require_polling: true,
            max_tracked_confirmations: 6,
            fee: Decimal::ZERO,
        }
    }

    pub fn with_fee(mut self, fee: Decimal) -> Self {
        self.fee = fee;
        self
    }

    pub fn with_max_tracked_confirmations(mut self, n: i32) -> Self {
        self.max_tracked_confirmations = n;
        self
    }

    /// Test hook: inject a transaction as if the network had produced it,
    /// e.g. to simulate an externally-made deposit.
    pub fn inject_transaction(&self, info: TxInfo) {
        let mut state = self.state.lock().unwrap();
        if !state.transactions.contains_key(&info.txid) {
            state.order.push(info.txid.clone());
        }
        state.transactions.insert(info.txid.clone(), info);
    }

    /// Test hook: advance a previously injected or sent transaction's
    /// confirmation count.
    pub fn set_confirmations(&self, txid: &str, confirmations: i32) {
        let mut state = self.state.lock().unwrap();
        if let Some(tx) = state.transactions.get_mut(txid) {
            tx.confirmations = confirmations;
        }
    }
}

#[async_trait]
impl Backend for MockBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn create_address(&self, label: &str) -> Result<String> {
        let mut state = self.state.lock().unwrap();
        state.addresses += 1;
        Ok(format!("mock-addr-{}-{label}", state.addresses))
    }

    async fn get_transaction(&self, txid: &str) -> Result<TxInfo> {
        let state = self.state.lock().unwrap();
        state
            .transactions
            .get(txid)
            .cloned()
            .ok_or_else(|| BackendError::UnknownTransaction(txid.to_owned()))
    }

    async fn get_balances(&self, addresses: &[String]) -> Result<Vec<(String, Decimal)>> {
        let state = self.state.lock().unwrap();
        Ok(addresses
            .iter()
            .map(|a| (a.clone(), state.balances.get(a).copied().unwrap_or_default()))
            .collect())
    }

    async fn get_backend_balance(&self, _confirmations: i32) -> Result<Decimal> {
        let state = self.state.lock().unwrap();
        Ok(state.balances.values().copied().sum())
    }

    async fn send(&self, outputs: SendOutputs, _label: &str) -> Result<SendResult> {
        let mut state = self.state.lock().unwrap();
        state.next_send_id += 1;
        let txid = format!("mock-send-{}", state.next_send_id);
        let details = outputs
            .into_iter()
            .map(|(address, amount)| crate::types::TxDetail {
                category: crate::types::DetailCategory::Send,
                address,
                amount,
            })
            .collect();
        let info = TxInfo {
            txid: txid.clone(),
            confirmations: 0,
            details,
            only_receive: false,
        };
        state.order.push(txid.clone());
        state.transactions.insert(txid.clone(), info);
        Ok(SendResult {
            txid,
            fee: self.fee,
        })
    }

    async fn list_received_transactions(&self, cursor: Cursor) -> Result<ReceivedPage> {
        let state = self.state.lock().unwrap();
        let start = match cursor {
            Cursor::Index(i) => i as usize,
            Cursor::Done => return Ok(ReceivedPage { transactions: vec![], next: Cursor::Done }),
            Cursor::BeforeTxid(_) => {
                return Err(BackendError::Protocol(
                    "MockBackend only supports index-based cursors".to_owned(),
                ))
            }
        };
        let page: Vec<_> = state
            .order
            .iter()
            .skip(start)
            .take(16)
            .map(|txid| (txid.clone(), state.transactions[txid].clone()))
            .collect();
        let next = if start + page.len() >= state.order.len() {
            Cursor::Done
        } else {
            Cursor::Index((start + page.len()) as u64)
        };
        Ok(ReceivedPage { transactions: page, next })
    }

    fn require_tracking_incoming_confirmations(&self) -> bool {
        self.require_polling
    }

    fn max_tracked_incoming_confirmations(&self) -> i32 {
        self.max_tracked_confirmations
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::types::{DetailCategory, TxDetail};

    #[tokio::test]
    async fn send_then_fetch_roundtrips() {
        let backend = MockBackend::new("mock");
        let result = backend
            .send(vec![("addr1".to_owned(), Decimal::from(100))], "test")
            .await
            .unwrap();
        let info = backend.get_transaction(&result.txid).await.unwrap();
        assert_eq!(info.sent_to("addr1"), Decimal::from(100));
    }

    #[tokio::test]
    async fn list_received_transactions_paginates() {
        let backend = MockBackend::new("mock");
        for i in 0..3 {
            backend.inject_transaction(TxInfo {
                txid: format!("tx{i}"),
                confirmations: 1,
                details: vec![TxDetail {
                    category: DetailCategory::Receive,
                    address: "addr1".to_owned(),
                    amount: Decimal::from(1),
                }],
                only_receive: false,
            });
        }
        let page = backend
            .list_received_transactions(Cursor::Index(0))
            .await
            .unwrap();
        assert_eq!(page.transactions.len(), 3);
        assert!(matches!(page.next, Cursor::Done));
    }
}
