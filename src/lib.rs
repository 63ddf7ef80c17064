//! batch_sender - Exactly-Once Batch Transfers
//!
//! Streams transfer requests to an external ledger, recording every submission in a
//! durable status store so that re-running a batch never pays anyone twice.
//!
//! # Modules
//!
//! - [`transfer`] - Dispatcher, status store, confirmation polling, ledger seam
//! - [`input`] - Newline-delimited JSON request reader
//! - [`config`] - YAML application config
//! - [`logging`] - tracing subscriber setup
//! - [`shutdown`] - Cooperative shutdown signal

pub mod config;
pub mod input;
pub mod logging;
pub mod shutdown;
pub mod transfer;

// Convenient re-exports at crate root
pub use config::AppConfig;
pub use input::{InputError, RequestReader};
pub use shutdown::ShutdownSignal;
pub use transfer::{
    BatchReport, DedupKey, Dispatcher, DispatcherConfig, JsonStore, LedgerClient, LedgerConfig,
    LedgerError, RpcLedgerClient, StatusStore, TransferError, TransferOutcome, TransferRequest,
    TransferStatus,
};
