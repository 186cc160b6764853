//! End-to-end scenarios against a live Postgres database. Gated behind
//! `DATABASE_URL` since they need a real `SERIALIZABLE`-capable database;
//! run with `DATABASE_URL=postgres://... cargo test -- --ignored`.

use std::env;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use chain_backend::{Backend, DetailCategory, MockBackend, TxDetail, TxInfo};
use ledger::PgLedgerStore;
use rust_decimal_macros::dec;
use txengine::{Broadcaster, ConflictResolver, EventHandlerRegistry, ReceiveScanner, TransactionUpdater};

async fn test_store() -> PgLedgerStore {
    let url = env::var("DATABASE_URL").expect("DATABASE_URL must be set for ignored db tests");
    let store = PgLedgerStore::connect(&url, 4).await.unwrap();
    store.migrate().await.unwrap();
    store
}

/// Sets up a wallet, one account, and one deposit address owned by that
/// account. Returns their ids.
async fn setup_wallet(
    resolver: &ConflictResolver,
    coin: &str,
    address: &str,
) -> (i64, i64, i64) {
    let coin = coin.to_owned();
    let wallet = resolver
        .resolve(move |session| {
            let coin = coin.clone();
            async move { session.get_or_create_wallet(&coin, "main").await }
        })
        .await
        .unwrap();
    let wallet_id = wallet.id;
    let account = resolver
        .resolve(move |session| session.get_or_create_account(wallet_id, "alice"))
        .await
        .unwrap();
    let account_id = account.id;
    let address = address.to_owned();
    let addr = resolver
        .resolve(move |session| {
            let address = address.clone();
            async move {
                session
                    .create_deposit_address(wallet_id, account_id, &address, None)
                    .await
            }
        })
        .await
        .unwrap();
    (wallet_id, account_id, addr.id)
}

#[tokio::test]
#[ignore]
async fn credit_on_confirmation() {
    let store = test_store().await;
    let resolver = Arc::new(ConflictResolver::new(store.clone(), 3));
    let wallet = resolver
        .resolve(|session| session.get_or_create_wallet("btc", "main"))
        .await
        .unwrap();
    let wallet_id = wallet.id;
    let account = resolver
        .resolve(move |session| session.get_or_create_account(wallet_id, "alice"))
        .await
        .unwrap();
    let account_id = account.id;
    resolver
        .resolve(move |session| {
            session.create_deposit_address(wallet_id, account_id, "addr1", None)
        })
        .await
        .unwrap();

    let backend: Arc<dyn Backend> = Arc::new(MockBackend::new("mock"));
    let events = Arc::new(EventHandlerRegistry::new());
    let updater = TransactionUpdater::new(
        "btc",
        wallet_id,
        3,
        backend,
        resolver.clone(),
        events,
    );

    let info_unconfirmed = TxInfo {
        txid: "aa".to_owned(),
        confirmations: 0,
        details: vec![TxDetail {
            category: DetailCategory::Receive,
            address: "addr1".to_owned(),
            amount: dec!(1000),
        }],
        only_receive: false,
    };
    updater
        .update_network_transaction_confirmations(
            ledger::NetworkTransactionType::Deposit,
            "aa",
            &info_unconfirmed,
        )
        .await
        .unwrap();

    let refreshed = resolver
        .resolve(move |session| session.get_account(account_id))
        .await
        .unwrap();
    assert_eq!(refreshed.balance, dec!(0));

    let info_confirmed = TxInfo {
        confirmations: 3,
        ..info_unconfirmed
    };
    updater
        .update_network_transaction_confirmations(
            ledger::NetworkTransactionType::Deposit,
            "aa",
            &info_confirmed,
        )
        .await
        .unwrap();

    let refreshed = resolver
        .resolve(move |session| session.get_account(account_id))
        .await
        .unwrap();
    assert_eq!(refreshed.balance, dec!(1000));
}

#[tokio::test]
#[ignore]
async fn idempotent_notify() {
    let store = test_store().await;
    let resolver = Arc::new(ConflictResolver::new(store.clone(), 3));
    let (wallet_id, account_id, _) = setup_wallet(&resolver, "btc2", "addr2").await;

    let backend: Arc<dyn Backend> = Arc::new(MockBackend::new("mock"));
    let events = Arc::new(EventHandlerRegistry::new());
    let updater = TransactionUpdater::new("btc2", wallet_id, 3, backend, resolver.clone(), events);

    let info = TxInfo {
        txid: "dd".to_owned(),
        confirmations: 0,
        details: vec![TxDetail {
            category: DetailCategory::Receive,
            address: "addr2".to_owned(),
            amount: dec!(500),
        }],
        only_receive: false,
    };
    for _ in 0..5 {
        updater
            .update_network_transaction_confirmations(
                ledger::NetworkTransactionType::Deposit,
                "dd",
                &info,
            )
            .await
            .unwrap();
    }

    let refreshed = resolver
        .resolve(move |session| session.get_account(account_id))
        .await
        .unwrap();
    assert_eq!(refreshed.balance, dec!(0));
}

#[tokio::test]
#[ignore]
async fn broadcast_with_fee() {
    let store = test_store().await;
    let resolver = Arc::new(ConflictResolver::new(store.clone(), 3));
    let coin = "btc3".to_owned();
    let wallet = resolver
        .resolve(move |session| {
            let coin = coin.clone();
            async move { session.get_or_create_wallet(&coin, "main").await }
        })
        .await
        .unwrap();
    let wallet_id = wallet.id;
    let account = resolver
        .resolve(move |session| session.get_or_create_account(wallet_id, "alice"))
        .await
        .unwrap();
    let account_id = account.id;
    let deposit_address = resolver
        .resolve(move |session| {
            session.create_deposit_address(wallet_id, account_id, "btc3-incoming", None)
        })
        .await
        .unwrap();
    let deposit_address_id = deposit_address.id;
    // Fund the account by crediting a confirmed deposit, so there's
    // something to send.
    resolver
        .resolve(move |session| async move {
            let network_tx = session
                .get_or_create_network_transaction(
                    wallet_id,
                    ledger::NetworkTransactionType::Deposit,
                    "fund-btc3",
                )
                .await?;
            let tx = session
                .create_deposit_transaction(
                    wallet_id,
                    network_tx.id,
                    account_id,
                    deposit_address_id,
                    dec!(5000),
                )
                .await?;
            session
                .credit_deposit(tx.id, account_id, deposit_address_id, wallet_id, dec!(5000))
                .await
        })
        .await
        .unwrap();
    let external = resolver
        .resolve(move |session| {
            session.get_or_create_external_address(wallet_id, "external-x")
        })
        .await
        .unwrap();
    let external_id = external.id;
    resolver
        .resolve(move |session| {
            session.create_pending_send(wallet_id, account_id, external_id, dec!(2100), None)
        })
        .await
        .unwrap();

    let backend: Arc<dyn Backend> = Arc::new(MockBackend::new("mock").with_fee(dec!(1000)));
    let broadcaster = Broadcaster::new("btc3", wallet_id, backend, resolver.clone());
    let closed = broadcaster.run_once().await.unwrap();
    assert_eq!(closed.len(), 1);

    let account_after = resolver
        .resolve(move |session| session.get_account(account_id))
        .await
        .unwrap();
    assert_eq!(account_after.balance, dec!(2900));

    let wallet_after = resolver
        .resolve(move |session| session.find_wallet("btc3", "main"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(wallet_after.balance, dec!(1900));
}

#[tokio::test]
#[ignore]
async fn interrupted_broadcast_is_not_retried() {
    let store = test_store().await;
    let resolver = Arc::new(ConflictResolver::new(store.clone(), 3));
    let coin = "btc4".to_owned();
    let wallet = resolver
        .resolve(move |session| {
            let coin = coin.clone();
            async move { session.get_or_create_wallet(&coin, "main").await }
        })
        .await
        .unwrap();
    let wallet_id = wallet.id;

    let network_tx_id = resolver
        .resolve(move |session| async move {
            let network_tx = session.create_broadcast_network_transaction(wallet_id).await?;
            session.open_broadcast(network_tx.id).await?;
            Ok(network_tx.id)
        })
        .await
        .unwrap();

    let backend: Arc<dyn Backend> = Arc::new(MockBackend::new("mock"));
    let broadcaster = Broadcaster::new("btc4", wallet_id, backend.clone(), resolver.clone());

    let interrupted = broadcaster.list_interrupted().await.unwrap();
    assert_eq!(interrupted, vec![network_tx_id]);

    // No pending outbound transactions exist, so the collect phase attaches
    // nothing new and the opened row is left untouched.
    let closed = broadcaster.run_once().await.unwrap();
    assert!(closed.is_empty());

    let row = resolver
        .resolve(move |session| session.get_network_transaction(network_tx_id))
        .await
        .unwrap();
    assert!(row.is_interrupted_broadcast());
}

#[tokio::test]
#[ignore]
async fn conflict_retry_counter_increases_under_contention() {
    let store = test_store().await;
    let resolver = Arc::new(ConflictResolver::new(store.clone(), 5));
    let (wallet_id, account_id, _) = setup_wallet(&resolver, "btc5", "addr5").await;

    let backend: Arc<dyn Backend> = Arc::new(MockBackend::new("mock"));
    let events = Arc::new(EventHandlerRegistry::new());
    let updater = Arc::new(TransactionUpdater::new(
        "btc5",
        wallet_id,
        1,
        backend,
        resolver.clone(),
        events,
    ));

    let info = TxInfo {
        txid: "ee".to_owned(),
        confirmations: 1,
        details: vec![TxDetail {
            category: DetailCategory::Receive,
            address: "addr5".to_owned(),
            amount: dec!(300),
        }],
        only_receive: false,
    };

    let mut handles = Vec::new();
    for _ in 0..4 {
        let updater = updater.clone();
        let info = info.clone();
        handles.push(tokio::spawn(async move {
            updater
                .update_network_transaction_confirmations(
                    ledger::NetworkTransactionType::Deposit,
                    "ee",
                    &info,
                )
                .await
        }));
    }
    for h in handles {
        h.await.unwrap().unwrap();
    }

    let refreshed = resolver
        .resolve(move |session| session.get_account(account_id))
        .await
        .unwrap();
    assert_eq!(refreshed.balance, dec!(300));
    assert!(resolver.counters.success.load(Ordering::Relaxed) >= 1);
}

#[tokio::test]
#[ignore]
async fn receive_scanner_recovers_missed_deposit() {
    let store = test_store().await;
    let resolver = Arc::new(ConflictResolver::new(store.clone(), 3));
    let (wallet_id, account_id, _) = setup_wallet(&resolver, "btc6", "addr6").await;

    let backend = Arc::new(MockBackend::new("mock").with_max_tracked_confirmations(3));
    backend.inject_transaction(TxInfo {
        txid: "cc".to_owned(),
        confirmations: 0,
        details: vec![TxDetail {
            category: DetailCategory::Receive,
            address: "addr6".to_owned(),
            amount: dec!(500),
        }],
        only_receive: false,
    });
    let backend: Arc<dyn Backend> = backend;

    let events = Arc::new(EventHandlerRegistry::new());
    let updater = Arc::new(TransactionUpdater::new(
        "btc6",
        wallet_id,
        3,
        backend.clone(),
        resolver.clone(),
        events,
    ));
    let scanner = ReceiveScanner::new("btc6", wallet_id, backend.clone(), resolver.clone(), updater.clone());

    let handled = scanner.run().await.unwrap();
    assert_eq!(handled, 1);

    let account_after = resolver
        .resolve(move |session| session.get_account(account_id))
        .await
        .unwrap();
    assert_eq!(account_after.balance, dec!(0));

    // Confirmations crossing the threshold are driven by the confirmation
    // poller in production, not another scan pass; exercise that step
    // directly here.
    backend.set_confirmations("cc", 3);
    updater.handle_wallet_notify("cc").await.unwrap();

    let account_final = resolver
        .resolve(move |session| session.get_account(account_id))
        .await
        .unwrap();
    assert_eq!(account_final.balance, dec!(500));
}
