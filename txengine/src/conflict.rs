//! Runs ledger reconciliations under Postgres `SERIALIZABLE` isolation,
//! retrying on driver-recognized serialization conflicts up to a bounded
//! number of times.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};

use ledger::{is_serialization_conflict, PgLedgerStore, Session};
use rt_std::backoff;
use thiserror::Error;
use tracing::{instrument, warn};

#[derive(Debug, Error)]
pub enum ConflictError {
    #[error("exhausted {retries} retries resolving a serialization conflict")]
    Unresolvable { retries: u32 },

    #[error(transparent)]
    Ledger(#[from] ledger::Error),
}

/// Retry/error counters for observability, surfaced as `tracing` fields
/// rather than a separate metrics subsystem.
#[derive(Debug, Default)]
pub struct ConflictCounters {
    pub success: AtomicU64,
    pub retries: AtomicU64,
    pub errors: AtomicU64,
    pub unresolved: AtomicU64,
}

/// Runs closures as bounded-retry `SERIALIZABLE` transactions against a
/// [`PgLedgerStore`].
pub struct ConflictResolver {
    store: PgLedgerStore,
    max_retries: u32,
    pub counters: ConflictCounters,
}

impl ConflictResolver {
    pub fn new(store: PgLedgerStore, max_retries: u32) -> Self {
        Self {
            store,
            max_retries,
            counters: ConflictCounters::default(),
        }
    }

    pub fn store(&self) -> &PgLedgerStore {
        &self.store
    }

    /// Runs `f` as a retryable unit of work. `f` MUST be a pure
    /// reconciliation of database state: no external I/O with observable
    /// side effects.
    #[instrument(skip(self, f))]
    pub async fn resolve<T, F, Fut>(&self, mut f: F) -> Result<T, ConflictError>
    where
        F: FnMut(&mut Session<'_>) -> Fut,
        Fut: Future<Output = Result<T, ledger::Error>>,
    {
        let mut attempt = 0u32;
        let mut waits = backoff::get_backoff_iter();
        loop {
            let mut session = self.store.begin().await?;
            match f(&mut session).await {
                Ok(value) => match session.commit().await {
                    Ok(()) => {
                        self.counters.success.fetch_add(1, Ordering::Relaxed);
                        return Ok(value);
                    }
                    Err(ledger::Error::Database(err)) if is_serialization_conflict(&err) => {
                        self.counters.retries.fetch_add(1, Ordering::Relaxed);
                        if attempt >= self.max_retries {
                            self.counters.unresolved.fetch_add(1, Ordering::Relaxed);
                            return Err(ConflictError::Unresolvable {
                                retries: self.max_retries,
                            });
                        }
                        attempt += 1;
                        warn!(attempt, "serialization conflict on commit, retrying");
                        tokio::time::sleep(waits.next().expect("infinite iterator")).await;
                        continue;
                    }
                    Err(err) => {
                        self.counters.errors.fetch_add(1, Ordering::Relaxed);
                        return Err(err.into());
                    }
                },
                Err(ledger::Error::Database(err)) if is_serialization_conflict(&err) => {
                    let _ = session.rollback().await;
                    self.counters.retries.fetch_add(1, Ordering::Relaxed);
                    if attempt >= self.max_retries {
                        self.counters.unresolved.fetch_add(1, Ordering::Relaxed);
                        return Err(ConflictError::Unresolvable {
                            retries: self.max_retries,
                        });
                    }
                    attempt += 1;
                    warn!(attempt, "serialization conflict mid-transaction, retrying");
                    tokio::time::sleep(waits.next().expect("infinite iterator")).await;
                    continue;
                }
                Err(err) => {
                    let _ = session.rollback().await;
                    self.counters.errors.fetch_add(1, Ordering::Relaxed);
                    return Err(err.into());
                }
            }
        }
    }

    /// Runs `f` exactly once, with no retry. Used for steps that perform
    /// external I/O with observable side effects (opening/closing a
    /// broadcast around the `Backend::send` call): a conflict here is fatal
    /// to the caller, who must reconcile manually rather than risk a
    /// duplicate send.
    #[instrument(skip(self, f))]
    pub async fn run_once<T, F, Fut>(&self, f: F) -> Result<T, ConflictError>
    where
        F: FnOnce(&mut Session<'_>) -> Fut,
        Fut: Future<Output = Result<T, ledger::Error>>,
    {
        let mut session = self.store.begin().await?;
        match f(&mut session).await {
            Ok(value) => {
                session.commit().await?;
                self.counters.success.fetch_add(1, Ordering::Relaxed);
                Ok(value)
            }
            Err(err) => {
                let _ = session.rollback().await;
                self.counters.errors.fetch_add(1, Ordering::Relaxed);
                Err(err.into())
            }
        }
    }
}
