use chrono::Utc;
use ledger::model::{
    NetworkTransaction, NetworkTransactionState, NetworkTransactionType, Transaction,
    TransactionState,
};
use rust_decimal_macros::dec;

fn sample_network_transaction(
    transaction_type: NetworkTransactionType,
    opened: bool,
    closed: bool,
) -> NetworkTransaction {
    NetworkTransaction {
        id: 1,
        wallet_id: 1,
        txid: Some("aa".to_owned()),
        transaction_type,
        state: NetworkTransactionState::Pending,
        confirmations: 0,
        opened_at: opened.then(Utc::now),
        closed_at: closed.then(Utc::now),
    }
}

#[test]
fn interrupted_broadcast_detected() {
    let opened_not_closed =
        sample_network_transaction(NetworkTransactionType::Broadcast, true, false);
    assert!(opened_not_closed.is_interrupted_broadcast());

    let closed = sample_network_transaction(NetworkTransactionType::Broadcast, true, true);
    assert!(!closed.is_interrupted_broadcast());

    let deposit_opened = sample_network_transaction(NetworkTransactionType::Deposit, true, false);
    assert!(!deposit_opened.is_interrupted_broadcast());
}

fn sample_transaction(
    sending: Option<i64>,
    receiving: Option<i64>,
    network_tx: Option<i64>,
) -> Transaction {
    Transaction {
        id: 1,
        wallet_id: 1,
        amount: dec!(10),
        state: TransactionState::Pending,
        sending_account_id: sending,
        receiving_account_id: receiving,
        address_id: None,
        network_transaction_id: network_tx,
        label: None,
        created_at: Utc::now(),
        credited_at: None,
        processed_at: None,
    }
}

#[test]
fn transaction_classification_is_mutually_exclusive() {
    let deposit = sample_transaction(None, Some(1), Some(1));
    assert!(deposit.is_deposit());
    assert!(!deposit.is_broadcast());
    assert!(!deposit.is_internal());

    let broadcast = sample_transaction(Some(1), None, Some(1));
    assert!(broadcast.is_broadcast());
    assert!(!broadcast.is_deposit());

    let internal = sample_transaction(Some(1), Some(2), None);
    assert!(internal.is_internal());
    assert!(!internal.is_deposit());
    assert!(!internal.is_broadcast());
}
