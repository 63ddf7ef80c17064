//! Ledger Client Seam
//!
//! The dispatcher only ever talks to the ledger through [`LedgerClient`]. Transaction
//! construction and signing live behind it.

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum LedgerError {
    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("Transfer rejected: {0}")]
    Rejected(String),

    #[error("Unexpected response: {0}")]
    Decode(String),
}

/// Result of a confirmation query
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Confirmation {
    /// Slot the transaction landed in. 0 means not yet landed.
    pub slot: u64,
    /// Execution failure reported by the ledger for a landed transaction
    pub execution_error: Option<String>,
}

impl Confirmation {
    pub fn pending() -> Self {
        Self::default()
    }

    pub fn landed(slot: u64) -> Self {
        Self {
            slot,
            execution_error: None,
        }
    }

    pub fn failed(slot: u64, error: impl Into<String>) -> Self {
        Self {
            slot,
            execution_error: Some(error.into()),
        }
    }

    #[inline]
    pub fn is_landed(&self) -> bool {
        self.slot > 0
    }
}

/// Capability interface the dispatcher consumes.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Client name for logging
    fn name(&self) -> &'static str;

    /// Submit a transfer, returning the ledger transaction id
    async fn submit(
        &self,
        asset: &str,
        source: &str,
        destination: &str,
        amount: u64,
    ) -> Result<String, LedgerError>;

    /// Query a transaction. `Ok` with slot 0 means still pending.
    async fn confirm(&self, tx_id: &str) -> Result<Confirmation, LedgerError>;

    /// Balance of `asset` held by `account`, in base units (diagnostics only)
    async fn balance(&self, asset: &str, account: &str) -> Result<u64, LedgerError>;
}

/// Scriptable ledger for testing
#[cfg(test)]
pub mod mock {
    use super::*;
    use std::collections::{HashMap, VecDeque};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use tokio::sync::Semaphore;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct SubmitCall {
        pub asset: String,
        pub source: String,
        pub destination: String,
        pub amount: u64,
    }

    pub struct MockLedger {
        submit_count: AtomicUsize,
        confirm_count: AtomicUsize,
        submissions: Mutex<Vec<SubmitCall>>,
        /// Responses returned by `confirm` before falling back to `landing`
        confirm_script: Mutex<VecDeque<Result<Confirmation, LedgerError>>>,
        landing: Mutex<Confirmation>,
        fail_submit: Mutex<bool>,
        balances: Mutex<HashMap<(String, String), u64>>,
        /// When set, `submit` waits for a permit before returning
        gate: Mutex<Option<Arc<Semaphore>>>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl MockLedger {
        pub fn new() -> Self {
            Self {
                submit_count: AtomicUsize::new(0),
                confirm_count: AtomicUsize::new(0),
                submissions: Mutex::new(Vec::new()),
                confirm_script: Mutex::new(VecDeque::new()),
                landing: Mutex::new(Confirmation::landed(1)),
                fail_submit: Mutex::new(false),
                balances: Mutex::new(HashMap::new()),
                gate: Mutex::new(None),
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
            }
        }

        pub fn set_fail_submit(&self, fail: bool) {
            *self.fail_submit.lock().unwrap() = fail;
        }

        /// Default `confirm` answer once the script is exhausted
        pub fn set_landing(&self, confirmation: Confirmation) {
            *self.landing.lock().unwrap() = confirmation;
        }

        pub fn push_confirm(&self, response: Result<Confirmation, LedgerError>) {
            self.confirm_script.lock().unwrap().push_back(response);
        }

        pub fn push_pending(&self, times: usize) {
            for _ in 0..times {
                self.push_confirm(Ok(Confirmation::pending()));
            }
        }

        pub fn set_balance(&self, asset: &str, account: &str, amount: u64) {
            self.balances
                .lock()
                .unwrap()
                .insert((asset.to_string(), account.to_string()), amount);
        }

        /// Block every `submit` until the returned semaphore gets permits
        pub fn install_gate(&self) -> Arc<Semaphore> {
            let gate = Arc::new(Semaphore::new(0));
            *self.gate.lock().unwrap() = Some(gate.clone());
            gate
        }

        pub fn submit_count(&self) -> usize {
            self.submit_count.load(Ordering::SeqCst)
        }

        pub fn confirm_count(&self) -> usize {
            self.confirm_count.load(Ordering::SeqCst)
        }

        pub fn max_in_flight(&self) -> usize {
            self.max_in_flight.load(Ordering::SeqCst)
        }

        pub fn in_flight(&self) -> usize {
            self.in_flight.load(Ordering::SeqCst)
        }

        pub fn submissions(&self) -> Vec<SubmitCall> {
            self.submissions.lock().unwrap().clone()
        }
    }

    impl Default for MockLedger {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl LedgerClient for MockLedger {
        fn name(&self) -> &'static str {
            "mock"
        }

        async fn submit(
            &self,
            asset: &str,
            source: &str,
            destination: &str,
            amount: u64,
        ) -> Result<String, LedgerError> {
            let n = self.submit_count.fetch_add(1, Ordering::SeqCst) + 1;
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);

            let gate = self.gate.lock().unwrap().clone();
            if let Some(gate) = gate {
                let _permit = gate.acquire().await;
            }

            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.submissions.lock().unwrap().push(SubmitCall {
                asset: asset.to_string(),
                source: source.to_string(),
                destination: destination.to_string(),
                amount,
            });

            if *self.fail_submit.lock().unwrap() {
                Err(LedgerError::Rejected("Mock submit failure".to_string()))
            } else {
                Ok(format!("tx-{}", n))
            }
        }

        async fn confirm(&self, _tx_id: &str) -> Result<Confirmation, LedgerError> {
            self.confirm_count.fetch_add(1, Ordering::SeqCst);

            let scripted = self.confirm_script.lock().unwrap().pop_front();
            match scripted {
                Some(response) => response,
                None => Ok(self.landing.lock().unwrap().clone()),
            }
        }

        async fn balance(&self, asset: &str, account: &str) -> Result<u64, LedgerError> {
            Ok(self
                .balances
                .lock()
                .unwrap()
                .get(&(asset.to_string(), account.to_string()))
                .copied()
                .unwrap_or(0))
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[tokio::test]
        async fn test_mock_ledger_submit() {
            let ledger = MockLedger::new();

            let tx = ledger.submit("M", "src", "A", 100).await.unwrap();
            assert_eq!(tx, "tx-1");
            assert_eq!(ledger.submit_count(), 1);
            assert_eq!(ledger.submissions()[0].source, "src");

            ledger.set_fail_submit(true);
            assert!(ledger.submit("M", "src", "A", 100).await.is_err());
            assert_eq!(ledger.submit_count(), 2);
        }

        #[tokio::test]
        async fn test_mock_ledger_confirm_script() {
            let ledger = MockLedger::new();
            ledger.push_pending(1);
            ledger.push_confirm(Err(LedgerError::Rpc("down".into())));
            ledger.set_landing(Confirmation::landed(500));

            assert!(!ledger.confirm("tx").await.unwrap().is_landed());
            assert!(ledger.confirm("tx").await.is_err());
            assert_eq!(ledger.confirm("tx").await.unwrap().slot, 500);
            assert_eq!(ledger.confirm_count(), 3);
        }

        #[tokio::test]
        async fn test_mock_ledger_balance() {
            let ledger = MockLedger::new();
            ledger.set_balance("M", "src", 1_000);
            assert_eq!(ledger.balance("M", "src").await.unwrap(), 1_000);
            assert_eq!(ledger.balance("M", "other").await.unwrap(), 0);
        }
    }
}

#[cfg(test)]
pub use mock::MockLedger;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confirmation_constructors() {
        assert!(!Confirmation::pending().is_landed());
        assert_eq!(Confirmation::landed(7).execution_error, None);

        let failed = Confirmation::failed(9, "error: [custom program error]");
        assert!(failed.is_landed());
        assert_eq!(
            failed.execution_error.as_deref(),
            Some("error: [custom program error]")
        );
    }
}
