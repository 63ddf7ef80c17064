//! Confirmation Poller
//!
//! Waits for a submitted transaction to land. Three distinct results:
//! - pending (slot 0): sleep `interval`, query again
//! - query failure: returned immediately, no retry
//! - landed (slot > 0): terminal, with or without an execution error

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use super::error::TransferError;
use super::ledger::LedgerClient;
use crate::shutdown::ShutdownSignal;

/// Terminal poll result for a landed transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Landing {
    pub slot: u64,
    pub execution_error: Option<String>,
}

pub struct ConfirmationPoller {
    ledger: Arc<dyn LedgerClient>,
    shutdown: Arc<ShutdownSignal>,
    interval: Duration,
    /// `None` polls until landing or shutdown
    max_attempts: Option<u32>,
}

impl ConfirmationPoller {
    pub fn new(
        ledger: Arc<dyn LedgerClient>,
        shutdown: Arc<ShutdownSignal>,
        interval: Duration,
        max_attempts: Option<u32>,
    ) -> Self {
        Self {
            ledger,
            shutdown,
            interval,
            max_attempts,
        }
    }

    pub async fn poll(&self, tx_id: &str) -> Result<Landing, TransferError> {
        let mut attempts: u32 = 0;

        loop {
            let confirmation = self
                .ledger
                .confirm(tx_id)
                .await
                .map_err(|e| TransferError::ConfirmationTransport(e.to_string()))?;
            attempts += 1;

            if confirmation.is_landed() {
                debug!(
                    tx_id = tx_id,
                    slot = confirmation.slot,
                    attempts = attempts,
                    "Transaction landed"
                );
                return Ok(Landing {
                    slot: confirmation.slot,
                    execution_error: confirmation.execution_error,
                });
            }

            if let Some(max) = self.max_attempts
                && attempts >= max
            {
                warn!(tx_id = tx_id, attempts = attempts, "Confirmation polling gave up");
                return Err(TransferError::ConfirmationTimeout {
                    tx_id: tx_id.to_string(),
                    attempts,
                });
            }

            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = self.shutdown.wait() => {
                    debug!(tx_id = tx_id, "Confirmation polling interrupted by shutdown");
                    return Err(TransferError::Cancelled);
                }
            }
        }
    }
}
