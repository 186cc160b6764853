//! The seam between the transaction engine and a concrete chain provider —
//! a full node speaking JSON-RPC, or a hosted wallet's HTTP API. Concrete
//! provider clients live outside this crate; it owns the [`Backend`] trait,
//! the normalized [`TxInfo`] shape, the [`IncomingNotifier`] harness, and a
//! deterministic in-memory test double.

pub mod backend;
pub mod error;
pub mod mock;
pub mod notifier;
pub mod types;

pub use backend::{Backend, SendOutputs, SendResult};
pub use error::{BackendError, Result};
pub use mock::MockBackend;
pub use notifier::{ChannelNotifier, IncomingNotifier};
pub use types::{Cursor, DetailCategory, ReceivedPage, TxDetail, TxInfo};
