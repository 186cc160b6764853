//! The transaction-lifecycle engine: conflict-resolved reconciliation of
//! backend-reported chain state into the ledger, exactly-once broadcasting,
//! confirmation polling, and startup receive-scanning.

pub mod broadcaster;
pub mod conflict;
pub mod events;
pub mod poller;
pub mod scanner;
pub mod updater;

pub use broadcaster::{BroadcastError, Broadcaster};
pub use conflict::{ConflictCounters, ConflictError, ConflictResolver};
pub use events::{
    CallbackEventSink, EventHandlerRegistry, EventSink, EventSinkError, HttpEventSink,
    SubprocessEventSink,
};
pub use poller::ConfirmationPoller;
pub use scanner::ReceiveScanner;
pub use updater::{TransactionUpdater, UpdaterError};
