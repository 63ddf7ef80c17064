//! Transfer Phase
//!
//! Derived view of a persisted [`TransferStatus`]. Not stored; the status fields
//! (`tx_id`, `confirmed_slot`, `err_logs`) are the source of truth.

use std::fmt;

use super::types::TransferStatus;

/// Where a stored transfer currently sits.
///
/// ```text
/// (absent) → SUBMITTED → CONFIRMED
///                 ↓
///          EXECUTION_FAILED → (retry mode) → SUBMITTED
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransferPhase {
    /// Sent to the ledger, not yet seen landing
    Submitted,

    /// Landed without execution error
    Confirmed,

    /// Landed but failed on execution; eligible for retry mode
    ExecutionFailed,
}

impl TransferPhase {
    pub fn of(status: &TransferStatus) -> Self {
        match (status.is_confirmed(), status.has_error()) {
            (false, _) => TransferPhase::Submitted,
            (true, false) => TransferPhase::Confirmed,
            (true, true) => TransferPhase::ExecutionFailed,
        }
    }

    /// Nothing more happens without an explicit verify or retry run
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransferPhase::Confirmed | TransferPhase::ExecutionFailed
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransferPhase::Submitted => "SUBMITTED",
            TransferPhase::Confirmed => "CONFIRMED",
            TransferPhase::ExecutionFailed => "EXECUTION_FAILED",
        }
    }
}

impl fmt::Display for TransferPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transfer::types::TransferRequest;

    fn status(slot: u64, err: &str) -> TransferStatus {
        let mut s = TransferStatus::submitted("tx", TransferRequest::new("m", "M", "A", 1));
        s.confirmed_slot = slot;
        s.err_logs = err.to_string();
        s
    }

    #[test]
    fn test_phase_from_status() {
        assert_eq!(status(0, "").phase(), TransferPhase::Submitted);
        assert_eq!(status(10, "").phase(), TransferPhase::Confirmed);
        assert_eq!(status(10, "error: x").phase(), TransferPhase::ExecutionFailed);
    }

    #[test]
    fn test_terminal_phases() {
        assert!(!TransferPhase::Submitted.is_terminal());
        assert!(TransferPhase::Confirmed.is_terminal());
        assert!(TransferPhase::ExecutionFailed.is_terminal());
    }

    #[test]
    fn test_display() {
        assert_eq!(TransferPhase::Submitted.to_string(), "SUBMITTED");
        assert_eq!(
            TransferPhase::ExecutionFailed.to_string(),
            "EXECUTION_FAILED"
        );
    }
}
