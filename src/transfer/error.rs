//! Transfer Error Types

use thiserror::Error;

use super::ledger::LedgerError;
use super::store::StoreError;

/// Failures surfaced by the dispatcher.
///
/// On-chain execution failures are not errors: they land in the store as
/// `err_logs` and come back as `TransferOutcome::ExecutionFailed`.
#[derive(Error, Debug, Clone)]
pub enum TransferError {
    // === Request Errors ===
    #[error("Invalid transfer request: {0}")]
    Validation(String),

    // === Store Errors ===
    #[error("Status store error: {0}")]
    StoreIo(String),

    // === Ledger Errors ===
    #[error("Submission failed: {0}")]
    Submission(String),

    #[error("Confirm tx: {0}")]
    ConfirmationTransport(String),

    #[error("Transaction {tx_id} not confirmed after {attempts} polls")]
    ConfirmationTimeout { tx_id: String, attempts: u32 },

    // === Admission Errors ===
    #[error("Too many transfer errors ({failures}/{threshold})")]
    TooManyErrors { failures: u64, threshold: u64 },

    #[error("Dispatcher is shutting down")]
    Cancelled,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl TransferError {
    /// Stable error code for logs and reports
    pub fn code(&self) -> &'static str {
        match self {
            TransferError::Validation(_) => "VALIDATION_ERROR",
            TransferError::StoreIo(_) => "STORE_IO_ERROR",
            TransferError::Submission(_) => "SUBMISSION_ERROR",
            TransferError::ConfirmationTransport(_) => "CONFIRMATION_TRANSPORT_ERROR",
            TransferError::ConfirmationTimeout { .. } => "CONFIRMATION_TIMEOUT",
            TransferError::TooManyErrors { .. } => "TOO_MANY_ERRORS",
            TransferError::Cancelled => "CANCELLED",
            TransferError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Whether this failure is charged to the dispatcher's error budget
    pub fn counts_against_budget(&self) -> bool {
        match self {
            TransferError::StoreIo(_)
            | TransferError::Submission(_)
            | TransferError::ConfirmationTransport(_)
            | TransferError::ConfirmationTimeout { .. }
            | TransferError::Internal(_) => true,
            TransferError::Validation(_)
            | TransferError::TooManyErrors { .. }
            | TransferError::Cancelled => false,
        }
    }
}

impl From<StoreError> for TransferError {
    fn from(e: StoreError) -> Self {
        TransferError::StoreIo(e.to_string())
    }
}

impl From<LedgerError> for TransferError {
    fn from(e: LedgerError) -> Self {
        TransferError::Submission(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(
            TransferError::Validation("x".into()).code(),
            "VALIDATION_ERROR"
        );
        assert_eq!(TransferError::Cancelled.code(), "CANCELLED");
        assert_eq!(
            TransferError::TooManyErrors {
                failures: 3,
                threshold: 3
            }
            .code(),
            "TOO_MANY_ERRORS"
        );
    }

    #[test]
    fn test_budget_accounting() {
        assert!(TransferError::StoreIo("disk".into()).counts_against_budget());
        assert!(TransferError::Submission("rejected".into()).counts_against_budget());
        assert!(TransferError::ConfirmationTransport("rpc".into()).counts_against_budget());

        assert!(!TransferError::Validation("memo".into()).counts_against_budget());
        assert!(!TransferError::Cancelled.counts_against_budget());
        assert!(
            !TransferError::TooManyErrors {
                failures: 3,
                threshold: 3
            }
            .counts_against_budget()
        );
    }

    #[test]
    fn test_display() {
        let err = TransferError::TooManyErrors {
            failures: 3,
            threshold: 3,
        };
        assert_eq!(err.to_string(), "Too many transfer errors (3/3)");
    }

    #[test]
    fn test_from_ledger_error_is_submission() {
        let err: TransferError = LedgerError::Rpc("connection refused".into()).into();
        assert_eq!(err.code(), "SUBMISSION_ERROR");
    }
}
