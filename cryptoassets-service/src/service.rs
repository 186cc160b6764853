//! The service loop: instantiates one Broadcaster, ConfirmationPoller, and
//! IncomingNotifier per configured coin, runs the ReceiveScanner once at
//! startup, and supervises the whole set until shutdown.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chain_backend::{Backend, MockBackend};
use ledger::PgLedgerStore;
use rt_tokio::notify_once::NotifyOnce;
use rt_tokio::task::{try_join_tasks_and_shutdown, LxTask};
use tokio::sync::mpsc;
use tracing::{info, info_span, instrument, warn, Instrument};
use txengine::{
    Broadcaster, ConfirmationPoller, ConflictResolver, EventHandlerRegistry, HttpEventSink,
    ReceiveScanner, SubprocessEventSink, TransactionUpdater,
};

use crate::config::{BackendConfig, Config, EventSinkConfig};

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

fn build_backend(config: &BackendConfig) -> Result<Arc<dyn Backend>> {
    match config {
        BackendConfig::Mock => Ok(Arc::new(MockBackend::new("mock"))),
        BackendConfig::NodeRpc { .. } => {
            bail!("node-rpc backend client is not implemented in this service; plug in an adapter crate")
        }
        BackendConfig::HostedWallet { .. } => {
            bail!("hosted-wallet backend client is not implemented in this service; plug in an adapter crate")
        }
    }
}

fn build_event_registry(sinks: &[EventSinkConfig]) -> EventHandlerRegistry {
    let mut registry = EventHandlerRegistry::new();
    for sink in sinks {
        match sink {
            EventSinkConfig::Http { url } => {
                registry.register(Box::new(HttpEventSink::new(url.clone())));
            }
            EventSinkConfig::Subprocess { program, args } => {
                registry.register(Box::new(SubprocessEventSink::new(
                    program.clone(),
                    args.clone(),
                )));
            }
        }
    }
    registry
}

struct CoinHandle {
    coin: String,
    resolver: Arc<ConflictResolver>,
    backend: Arc<dyn Backend>,
    updater: Arc<TransactionUpdater>,
    wallet_id: i64,
}

async fn setup_coin(
    coin: &str,
    cfg: &crate::config::CoinConfig,
    store: PgLedgerStore,
    events: Arc<EventHandlerRegistry>,
) -> Result<CoinHandle> {
    let backend = build_backend(&cfg.backend)?;
    let resolver = Arc::new(ConflictResolver::new(store, 3));
    let wallet = resolver
        .resolve(move |session| session.get_or_create_wallet(coin, "main"))
        .await
        .with_context(|| format!("failed to initialize wallet for coin {coin}"))?;
    let updater = Arc::new(TransactionUpdater::new(
        coin.to_owned(),
        wallet.id,
        cfg.confirmation_threshold,
        backend.clone(),
        resolver.clone(),
        events,
    ));
    Ok(CoinHandle {
        coin: coin.to_owned(),
        resolver,
        backend,
        updater,
        wallet_id: wallet.id,
    })
}

/// Entry point for the `helper-service` CLI command.
#[instrument(skip_all, name = "(service)")]
pub async fn run(config: Config) -> Result<()> {
    let store = PgLedgerStore::connect(&config.database.url, config.database.max_connections)
        .await
        .context("failed to connect to the ledger database")?;
    store.migrate().await.context("failed to run ledger migrations")?;

    let events = Arc::new(build_event_registry(&config.event_sinks));

    let mut coins = HashMap::new();
    for (name, cfg) in &config.coins {
        let handle = setup_coin(name, cfg, store.clone(), events.clone()).await?;
        coins.insert(name.clone(), handle);
    }

    let shutdown = NotifyOnce::new();
    let mut static_tasks = Vec::new();
    let (eph_tx, eph_rx) = mpsc::channel(16);

    for handle in coins.values() {
        let broadcaster = Arc::new(Broadcaster::new(
            handle.coin.clone(),
            handle.wallet_id,
            handle.backend.clone(),
            handle.resolver.clone(),
        ));
        if let Ok(interrupted) = broadcaster.list_interrupted().await {
            if !interrupted.is_empty() {
                warn!(coin = %handle.coin, ?interrupted, "interrupted broadcasts require manual reconciliation");
            }
        }

        let poller = Arc::new(ConfirmationPoller::new(
            handle.coin.clone(),
            handle.wallet_id,
            handle.backend.clone(),
            handle.resolver.clone(),
            handle.updater.clone(),
        ));

        let period = Duration::from_secs(config.service.broadcast_period_seconds);
        let mut shutdown_rx = shutdown.clone();
        let coin_name = handle.coin.clone();
        static_tasks.push(LxTask::spawn(
            format!("broadcaster-{coin_name}"),
            async move {
                let mut ticker = tokio::time::interval(period);
                loop {
                    tokio::select! {
                        biased;
                        () = shutdown_rx.recv() => return,
                        _ = ticker.tick() => {
                            if let Err(err) = broadcaster.run_once().await {
                                warn!(%err, "broadcaster cycle failed");
                            }
                        }
                    }
                }
            }
            .instrument(info_span!("(broadcaster)", coin = %coin_name)),
        ));

        let period = Duration::from_secs(config.service.confirmation_poll_period_seconds);
        let mut shutdown_rx = shutdown.clone();
        let coin_name = handle.coin.clone();
        static_tasks.push(LxTask::spawn(
            format!("confirmation-poller-{coin_name}"),
            async move {
                let mut ticker = tokio::time::interval(period);
                loop {
                    tokio::select! {
                        biased;
                        () = shutdown_rx.recv() => return,
                        _ = ticker.tick() => {
                            if let Err(err) = poller.run_once().await {
                                warn!(%err, "confirmation poll cycle failed");
                            }
                        }
                    }
                }
            }
            .instrument(info_span!("(confirmation-poller)", coin = %coin_name)),
        ));

        let scanner = ReceiveScanner::new(
            handle.coin.clone(),
            handle.wallet_id,
            handle.backend.clone(),
            handle.resolver.clone(),
            handle.updater.clone(),
        );
        let coin_name = handle.coin.clone();
        let eph_tx = eph_tx.clone();
        let scan_task = LxTask::spawn(
            format!("receive-scanner-{coin_name}"),
            async move {
                if let Err(err) = scanner.run().await {
                    warn!(%err, "receive scan failed");
                }
            }
            .instrument(info_span!("(receive-scanner)", coin = %coin_name)),
        );
        let _ = eph_tx.send(scan_task).await;
    }
    drop(eph_tx);

    if let Some(bind_address) = config.service.inspection_bind_address.clone() {
        static_tasks.push(LxTask::spawn(
            "inspection-server",
            async move {
                if let Err(err) = crate::inspect::serve(&bind_address).await {
                    warn!(%err, "inspection server exited");
                }
            }
            .instrument(info_span!("(inspection-server)")),
        ));
    }

    let shutdown_for_signals = shutdown.clone();
    tokio::spawn(wait_for_shutdown_signal(shutdown_for_signals));

    info!(coins = coins.len(), "service started");
    try_join_tasks_and_shutdown(static_tasks, eph_rx, shutdown, SHUTDOWN_TIMEOUT)
        .await
        .context("a critical service task exited prematurely")
}

/// Flips `shutdown` on SIGINT/SIGTERM. A second SIGINT aborts the process
/// immediately rather than waiting out the graceful shutdown timeout.
async fn wait_for_shutdown_signal(shutdown: NotifyOnce) {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");

    tokio::select! {
        _ = sigint.recv() => info!("received SIGINT, shutting down"),
        _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
    }
    shutdown.send();

    sigint.recv().await;
    warn!("received second SIGINT, exiting immediately");
    std::process::exit(130);
}

/// Entry point for the `scan-received` CLI command: run every coin's
/// receive-scanner once and return.
pub async fn scan_received(config: Config) -> Result<()> {
    let store = PgLedgerStore::connect(&config.database.url, config.database.max_connections)
        .await
        .context("failed to connect to the ledger database")?;
    store.migrate().await.context("failed to run ledger migrations")?;
    let events = Arc::new(build_event_registry(&config.event_sinks));

    for (name, cfg) in &config.coins {
        let handle = setup_coin(name, cfg, store.clone(), events.clone()).await?;
        let scanner = ReceiveScanner::new(
            handle.coin.clone(),
            handle.wallet_id,
            handle.backend.clone(),
            handle.resolver.clone(),
            handle.updater.clone(),
        );
        let handled = scanner.run().await?;
        info!(coin = %handle.coin, handled, "scan-received finished");
    }
    Ok(())
}

/// Entry point for the `initialize-database` CLI command.
pub async fn initialize_database(config: Config) -> Result<()> {
    let store = PgLedgerStore::connect(&config.database.url, config.database.max_connections)
        .await
        .context("failed to connect to the ledger database")?;
    store.migrate().await.context("failed to run ledger migrations")?;
    info!("database initialized");
    Ok(())
}
