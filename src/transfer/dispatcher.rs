//! Batch Dispatcher
//!
//! Runs each [`TransferRequest`] through the once-only state machine:
//!
//! ```text
//! lookup ──found, settled──────────────────────────────▶ no-op
//!   │
//!   ├─absent (verify/retry mode)───────────────────────▶ no-op
//!   │
//!   └─absent, or failed + retry mode ─▶ submit ─▶ persist ─▶ poll ─▶ persist
//! ```
//!
//! # Safety Invariants
//!
//! 1. **Persist-After-Submit**: a tx id is stored before confirmation is awaited
//! 2. **Store-Untouched-On-Reject**: a failed submit leaves the key eligible again
//! 3. **Per-Key Exclusion**: lookup → submit → persist runs under a lock keyed by
//!    [`DedupKey`], so concurrent duplicates submit once
//! 4. **Bounded Admission**: at most `concurrency` state machines run at a time, and
//!    none are admitted once the error budget is exhausted

use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex as AsyncMutex, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::budget::{DEFAULT_ERROR_THRESHOLD, ErrorBudget};
use super::error::TransferError;
use super::ledger::LedgerClient;
use super::poller::ConfirmationPoller;
use super::report::BatchReport;
use super::store::{JsonStore, StatusStore};
use super::types::{DedupKey, TransferOutcome, TransferRequest, TransferStatus};
use crate::shutdown::ShutdownSignal;

/// Dispatcher configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// JSON status store location
    pub store_path: PathBuf,
    /// Account every transfer is paid from
    pub source_account: String,
    /// Parallel state machines. 0 is treated as 1.
    pub concurrency: usize,
    /// Re-poll stored transfers; never originate new ones
    pub verify_confirm: bool,
    /// Resubmit stored transfers whose execution failed; never originate new ones
    pub retry_error: bool,
    /// Failed transfers tolerated before admission halts. 0 disables the breaker.
    pub error_threshold: u64,
    /// Delay between confirmation queries while a transaction is pending
    pub poll_interval_ms: u64,
    /// Give up confirming after this many queries. Unbounded when absent.
    pub poll_max_attempts: Option<u32>,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            store_path: PathBuf::from("./airdrop.store.json"),
            source_account: String::new(),
            concurrency: 1,
            verify_confirm: false,
            retry_error: false,
            error_threshold: DEFAULT_ERROR_THRESHOLD,
            poll_interval_ms: 5000,
            poll_max_attempts: None,
        }
    }
}

impl DispatcherConfig {
    pub fn slot_count(&self) -> u32 {
        u32::try_from(self.concurrency.max(1)).unwrap_or(u32::MAX)
    }

    /// Verify and retry runs only inspect keys already in the store
    pub fn is_inspection_only(&self) -> bool {
        self.verify_confirm || self.retry_error
    }

    /// Whether this run can originate ledger submissions. Retry mode resubmits
    /// failed records even though it never touches unknown keys.
    pub fn may_submit(&self) -> bool {
        self.retry_error || !self.verify_confirm
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Reject settings that would send transfers from an unnamed account
    pub fn validate(&self) -> Result<(), TransferError> {
        if self.may_submit() && self.source_account.is_empty() {
            return Err(TransferError::Validation(
                "source account is required unless running verify-only".to_string(),
            ));
        }
        Ok(())
    }
}

/// Handle to one admitted transfer task
#[derive(Debug)]
pub struct TransferHandle {
    key: DedupKey,
    inner: JoinHandle<Result<TransferOutcome, TransferError>>,
}

impl TransferHandle {
    pub fn key(&self) -> &DedupKey {
        &self.key
    }

    /// Wait for the task and return its result
    pub async fn outcome(self) -> Result<TransferOutcome, TransferError> {
        match self.inner.await {
            Ok(result) => result,
            Err(e) => Err(TransferError::Internal(format!("transfer task failed: {}", e))),
        }
    }
}

pub struct Dispatcher {
    config: DispatcherConfig,
    store: Arc<dyn StatusStore>,
    ledger: Arc<dyn LedgerClient>,
    poller: ConfirmationPoller,
    budget: ErrorBudget,
    slots: Arc<Semaphore>,
    key_locks: DashMap<DedupKey, Arc<AsyncMutex<()>>>,
    shutdown: Arc<ShutdownSignal>,
    report: Mutex<BatchReport>,
}

impl Dispatcher {
    /// Open the JSON store at `config.store_path` and build a dispatcher over it.
    ///
    /// A store that cannot be opened is fatal for the run, and so is a config that
    /// could submit without a source account.
    pub fn open(
        config: DispatcherConfig,
        ledger: Arc<dyn LedgerClient>,
        shutdown: Arc<ShutdownSignal>,
    ) -> Result<Self, TransferError> {
        config.validate()?;
        let store = JsonStore::open(&config.store_path)?;
        Ok(Self::new(config, Arc::new(store), ledger, shutdown))
    }

    pub fn new(
        config: DispatcherConfig,
        store: Arc<dyn StatusStore>,
        ledger: Arc<dyn LedgerClient>,
        shutdown: Arc<ShutdownSignal>,
    ) -> Self {
        let poller = ConfirmationPoller::new(
            ledger.clone(),
            shutdown.clone(),
            config.poll_interval(),
            config.poll_max_attempts,
        );

        info!(
            ledger = ledger.name(),
            concurrency = config.slot_count(),
            verify_confirm = config.verify_confirm,
            retry_error = config.retry_error,
            error_threshold = config.error_threshold,
            "Dispatcher ready"
        );

        Self {
            slots: Arc::new(Semaphore::new(config.slot_count() as usize)),
            budget: ErrorBudget::new(config.error_threshold),
            config,
            store,
            ledger,
            poller,
            key_locks: DashMap::new(),
            shutdown,
            report: Mutex::new(BatchReport::default()),
        }
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    pub fn budget(&self) -> &ErrorBudget {
        &self.budget
    }

    pub fn store(&self) -> &Arc<dyn StatusStore> {
        &self.store
    }

    pub fn ledger(&self) -> &Arc<dyn LedgerClient> {
        &self.ledger
    }

    /// Admit a request: check cancellation and the error budget, wait for a free
    /// slot, then run [`Dispatcher::transfer`] on a background task.
    ///
    /// Blocks while all slots are busy. The task's error is logged and recorded in
    /// the batch report; it is also available through the returned handle.
    pub async fn add_transfer(
        self: &Arc<Self>,
        request: TransferRequest,
    ) -> Result<TransferHandle, TransferError> {
        if self.shutdown.is_shutdown_requested() {
            return Err(TransferError::Cancelled);
        }
        self.check_budget()?;

        let permit = self
            .slots
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| TransferError::Internal("transfer slot pool closed".to_string()))?;

        // failures may have landed while we were blocked on a slot
        self.check_budget()?;

        self.lock_report().admitted += 1;

        let key = request.dedup_key();
        let this = Arc::clone(self);
        let inner = tokio::spawn(async move {
            let _permit = permit;

            let result = if this.shutdown.is_shutdown_requested() {
                Err(TransferError::Cancelled)
            } else {
                this.transfer_isolated(&request).await
            };

            match &result {
                Ok(outcome) => {
                    debug!(request = %request, outcome = %outcome, "Transfer task done");
                    this.lock_report().record_outcome(outcome);
                }
                Err(TransferError::Cancelled) => {
                    info!(request = %request, "Transfer cancelled");
                    this.lock_report().record_failure(&request, &TransferError::Cancelled);
                }
                Err(e) => {
                    error!(request = %request, code = e.code(), error = %e, "transfer error");
                    this.lock_report().record_failure(&request, e);
                }
            }

            result
        });

        Ok(TransferHandle { key, inner })
    }

    /// Drain barrier: resolves once every admitted task has finished, returning the
    /// aggregated report.
    pub async fn wait(&self) -> BatchReport {
        match self.slots.acquire_many(self.config.slot_count()).await {
            Ok(_all) => {}
            Err(_) => warn!("Transfer slot pool closed while draining"),
        }
        self.lock_report().clone()
    }

    /// Run one request to completion, once-only per dedup key.
    ///
    /// Failures that count against the error budget are charged here, exactly once.
    pub async fn transfer(
        &self,
        request: &TransferRequest,
    ) -> Result<TransferOutcome, TransferError> {
        let result = self.run_transfer(request).await;

        if let Err(e) = &result {
            self.charge(request, e);
        }

        result
    }

    /// [`Dispatcher::transfer`] on its own task so a panic (in a ledger client, say)
    /// surfaces as a charged `Internal` error instead of unwinding the slot owner.
    async fn transfer_isolated(
        self: &Arc<Self>,
        request: &TransferRequest,
    ) -> Result<TransferOutcome, TransferError> {
        let this = Arc::clone(self);
        let owned = request.clone();
        let inner = tokio::spawn(async move { this.transfer(&owned).await });

        match inner.await {
            Ok(result) => result,
            Err(e) => {
                // the unwind skipped the charge inside `transfer`
                let err = TransferError::Internal(format!("transfer task failed: {}", e));
                self.charge(request, &err);
                Err(err)
            }
        }
    }

    fn charge(&self, request: &TransferRequest, error: &TransferError) {
        if !error.counts_against_budget() {
            return;
        }
        let failures = self.budget.record_failure();
        warn!(
            request = %request,
            failures = failures,
            threshold = self.budget.threshold(),
            "Transfer failure charged to error budget"
        );
    }

    async fn run_transfer(
        &self,
        request: &TransferRequest,
    ) -> Result<TransferOutcome, TransferError> {
        request.validate()?;

        if request.amount == 0 {
            return Ok(TransferOutcome::ZeroAmount);
        }

        let key = request.dedup_key();
        let lock = self.key_locks.entry(key.clone()).or_default().clone();
        let result = {
            let _guard = lock.lock().await;
            self.execute(&key, request).await
        };

        drop(lock);
        self.key_locks
            .remove_if(&key, |_, lock| Arc::strong_count(lock) == 1);

        result
    }

    /// The state machine proper. Caller holds the key lock.
    async fn execute(
        &self,
        key: &DedupKey,
        request: &TransferRequest,
    ) -> Result<TransferOutcome, TransferError> {
        let existing = self.store.get(key).await?;

        if existing.is_none() && self.config.is_inspection_only() {
            debug!(key = %key, "Not in store, inspection run skips it");
            return Ok(TransferOutcome::NotInStore);
        }

        let resubmit = match &existing {
            None => true,
            Some(status) => self.config.retry_error && status.has_error(),
        };

        let mut status = match existing {
            Some(status) if !resubmit => status,
            previous => {
                let status = self.submit(key, request, previous.as_ref()).await?;
                self.store.set(key, status.clone()).await.map_err(|e| {
                    error!(
                        key = %key,
                        tx_id = %status.tx_id,
                        error = %e,
                        "CRITICAL: submitted tx could not be recorded"
                    );
                    TransferError::from(e)
                })?;
                self.lock_report().submitted += 1;
                status
            }
        };

        if status.phase().is_terminal() && !self.config.verify_confirm {
            debug!(key = %key, tx_id = %status.tx_id, "Already confirmed");
            return Ok(TransferOutcome::AlreadyConfirmed {
                tx_id: status.tx_id,
                slot: status.confirmed_slot,
            });
        }

        let landing = self.poller.poll(&status.tx_id).await?;

        if let Some(error) = landing.execution_error {
            status.err_logs = error;
        }
        status.confirmed_slot = landing.slot;
        self.store.set(key, status.clone()).await?;

        info!(
            key = %key,
            tx_id = %status.tx_id,
            slot = status.confirmed_slot,
            phase = %status.phase(),
            "Transfer landed"
        );

        let outcome = if status.has_error() {
            TransferOutcome::ExecutionFailed {
                tx_id: status.tx_id,
                slot: status.confirmed_slot,
                error: status.err_logs,
            }
        } else {
            TransferOutcome::Confirmed {
                tx_id: status.tx_id,
                slot: status.confirmed_slot,
                resubmitted: resubmit,
            }
        };
        Ok(outcome)
    }

    async fn submit(
        &self,
        key: &DedupKey,
        request: &TransferRequest,
        previous: Option<&TransferStatus>,
    ) -> Result<TransferStatus, TransferError> {
        let tx_id = self
            .ledger
            .submit(
                &request.asset,
                &self.config.source_account,
                &request.destination,
                request.amount,
            )
            .await?;

        match previous {
            Some(prev) => info!(
                key = %key,
                tx_id = %tx_id,
                previous_tx_id = %prev.tx_id,
                previous_error = %prev.err_logs,
                "Resubmitted failed tx"
            ),
            None => info!(key = %key, tx_id = %tx_id, "Submitted tx"),
        }

        Ok(TransferStatus::submitted(tx_id, request.clone()))
    }

    fn check_budget(&self) -> Result<(), TransferError> {
        if self.budget.is_exhausted() {
            return Err(TransferError::TooManyErrors {
                failures: self.budget.failures(),
                threshold: self.budget.threshold(),
            });
        }
        Ok(())
    }

    fn lock_report(&self) -> std::sync::MutexGuard<'_, BatchReport> {
        self.report.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = DispatcherConfig::default();
        assert_eq!(config.concurrency, 1);
        assert_eq!(config.error_threshold, 3);
        assert_eq!(config.poll_interval(), Duration::from_secs(5));
        assert!(config.poll_max_attempts.is_none());
        assert!(!config.is_inspection_only());
    }

    #[test]
    fn test_zero_concurrency_means_one_slot() {
        let config = DispatcherConfig {
            concurrency: 0,
            ..Default::default()
        };
        assert_eq!(config.slot_count(), 1);
    }

    #[test]
    fn test_inspection_modes() {
        let verify = DispatcherConfig {
            verify_confirm: true,
            ..Default::default()
        };
        let retry = DispatcherConfig {
            retry_error: true,
            ..Default::default()
        };
        assert!(verify.is_inspection_only());
        assert!(retry.is_inspection_only());
    }

    #[test]
    fn test_retry_mode_needs_source_account() {
        let retry = DispatcherConfig {
            retry_error: true,
            ..Default::default()
        };
        assert!(retry.may_submit());
        assert!(matches!(retry.validate(), Err(TransferError::Validation(_))));

        let verify_and_retry = DispatcherConfig {
            verify_confirm: true,
            ..retry.clone()
        };
        assert!(verify_and_retry.validate().is_err());

        let verify = DispatcherConfig {
            verify_confirm: true,
            ..Default::default()
        };
        assert!(!verify.may_submit());
        assert!(verify.validate().is_ok());

        let normal = DispatcherConfig {
            source_account: "Treasury".to_string(),
            ..retry
        };
        assert!(normal.validate().is_ok());
        assert!(DispatcherConfig::default().validate().is_err());
    }

    #[test]
    fn test_config_yaml_defaults() {
        let config: DispatcherConfig = serde_yaml::from_str(
            r#"
store_path: "./data/drop.store.json"
source_account: "SrcAcct"
concurrency: 8
"#,
        )
        .unwrap();
        assert_eq!(config.store_path, PathBuf::from("./data/drop.store.json"));
        assert_eq!(config.source_account, "SrcAcct");
        assert_eq!(config.slot_count(), 8);
        assert_eq!(config.error_threshold, 3);
        assert_eq!(config.poll_interval_ms, 5000);
    }
}
