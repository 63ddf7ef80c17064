//! Exactly-Once Batch Transfers
//!
//! Executes transfer requests against an external ledger at most once per
//! [`DedupKey`], across restarts, concurrent tasks and transient failures.
//!
//! # Architecture
//!
//! ```text
//! add_transfer ─▶ [slot] ─▶ Dispatcher::transfer ─▶ StatusStore (JSON file)
//!                                    │
//!                                    └──────────▶ LedgerClient ◀── ConfirmationPoller
//! ```
//!
//! # Safety Invariants
//!
//! 1. **One Record Per Key**: the store holds at most one status per dedup key
//! 2. **No Silent Resubmit**: a stored tx id is only replaced in retry mode, and only
//!    when the ledger reported an execution error for it
//! 3. **Append/Update Only**: records are never deleted
//! 4. **Breaker Stops Admission Only**: in-flight tasks always run to completion

pub mod budget;
pub mod dispatcher;
pub mod error;
pub mod ledger;
pub mod poller;
pub mod report;
pub mod rpc;
pub mod state;
pub mod store;
pub mod types;


// Re-exports for convenience
pub use budget::{DEFAULT_ERROR_THRESHOLD, ErrorBudget};
pub use dispatcher::{Dispatcher, DispatcherConfig, TransferHandle};
pub use error::TransferError;
pub use ledger::{Confirmation, LedgerClient, LedgerError};
pub use poller::{ConfirmationPoller, Landing};
pub use report::{BatchReport, FailedTransfer};
pub use rpc::{LedgerConfig, RpcLedgerClient};
pub use state::TransferPhase;
pub use store::{JsonStore, StatusStore, StoreError};
pub use types::{DedupKey, TransferOutcome, TransferRequest, TransferStatus};
