//! Batch Report
//!
//! Aggregated outcome of every task admitted by a dispatcher, returned from `wait()`.

use tracing::{info, warn};

use super::error::TransferError;
use super::types::{TransferOutcome, TransferRequest};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedTransfer {
    pub request: TransferRequest,
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    /// Tasks started by `add_transfer`
    pub admitted: usize,
    pub zero_amount: usize,
    pub not_in_store: usize,
    pub already_confirmed: usize,
    pub confirmed: usize,
    pub execution_failed: usize,
    /// Ledger submissions recorded in the store during this batch, whatever their
    /// later outcome
    pub submitted: usize,
    /// Tasks stopped by shutdown before start or while polling
    pub cancelled: usize,
    pub failures: Vec<FailedTransfer>,
}

impl BatchReport {
    pub fn record_outcome(&mut self, outcome: &TransferOutcome) {
        match outcome {
            TransferOutcome::ZeroAmount => self.zero_amount += 1,
            TransferOutcome::NotInStore => self.not_in_store += 1,
            TransferOutcome::AlreadyConfirmed { .. } => self.already_confirmed += 1,
            TransferOutcome::Confirmed { .. } => self.confirmed += 1,
            TransferOutcome::ExecutionFailed { .. } => self.execution_failed += 1,
        }
    }

    pub fn record_failure(&mut self, request: &TransferRequest, error: &TransferError) {
        if matches!(error, TransferError::Cancelled) {
            self.cancelled += 1;
            return;
        }
        self.failures.push(FailedTransfer {
            request: request.clone(),
            code: error.code(),
            message: error.to_string(),
        });
    }

    pub fn failed(&self) -> usize {
        self.failures.len()
    }

    pub fn completed(&self) -> usize {
        self.zero_amount
            + self.not_in_store
            + self.already_confirmed
            + self.confirmed
            + self.execution_failed
            + self.cancelled
            + self.failed()
    }

    /// No task failed or got cancelled
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty() && self.cancelled == 0
    }

    pub fn log_summary(&self) {
        info!(
            admitted = self.admitted,
            completed = self.completed(),
            confirmed = self.confirmed,
            submitted = self.submitted,
            already_confirmed = self.already_confirmed,
            execution_failed = self.execution_failed,
            not_in_store = self.not_in_store,
            zero_amount = self.zero_amount,
            cancelled = self.cancelled,
            failed = self.failed(),
            "Batch finished"
        );

        for failure in &self.failures {
            warn!(
                request = %failure.request,
                code = failure.code,
                error = %failure.message,
                "Transfer failed"
            );
        }
    }
}
