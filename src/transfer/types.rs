//! Transfer Core Types
//!
//! Request, dedup key, persisted status and per-call outcome for the batch dispatcher.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::error::TransferError;
use super::state::TransferPhase;

/// Separator between dedup key components
const KEY_SEPARATOR: char = ':';

/// A single value transfer from the configured source account.
///
/// Field aliases accept the capitalised `Memo`/`Mint`/`To`/`Amount` layout used by
/// older airdrop input files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRequest {
    /// Distinguishing tag for otherwise-identical transfers (required)
    #[serde(alias = "Memo")]
    pub memo: String,
    /// Asset identifier (token mint, currency code, ...)
    #[serde(alias = "Mint", alias = "mint")]
    pub asset: String,
    /// Destination account identifier
    #[serde(alias = "To", alias = "to")]
    pub destination: String,
    /// Amount in base units. Zero means "no-op".
    #[serde(alias = "Amount", with = "u64_string")]
    pub amount: u64,
}

impl TransferRequest {
    pub fn new(
        memo: impl Into<String>,
        asset: impl Into<String>,
        destination: impl Into<String>,
        amount: u64,
    ) -> Self {
        Self {
            memo: memo.into(),
            asset: asset.into(),
            destination: destination.into(),
            amount,
        }
    }

    /// Reject requests that can never be executed, or whose dedup key could
    /// collide with a different request's
    pub fn validate(&self) -> Result<(), TransferError> {
        if self.memo.is_empty() {
            return Err(TransferError::Validation(
                "empty transfer request memo is invalid".to_string(),
            ));
        }
        for (field, value) in [
            ("memo", &self.memo),
            ("asset", &self.asset),
            ("destination", &self.destination),
        ] {
            if value.contains(KEY_SEPARATOR) {
                return Err(TransferError::Validation(format!(
                    "{} must not contain '{}': {}",
                    field, KEY_SEPARATOR, value
                )));
            }
        }
        Ok(())
    }

    pub fn dedup_key(&self) -> DedupKey {
        DedupKey::from(self)
    }
}

impl fmt::Display for TransferRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} -> {} ({})",
            self.amount, self.asset, self.destination, self.memo
        )
    }
}

/// Idempotency key: `memo:destination:asset:amount`
///
/// Identical requests always map to the identical key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DedupKey(String);

impl DedupKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&TransferRequest> for DedupKey {
    fn from(req: &TransferRequest) -> Self {
        Self(format!(
            "{}:{}:{}:{}",
            req.memo, req.destination, req.asset, req.amount
        ))
    }
}

impl fmt::Display for DedupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Persisted record of one logical transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferStatus {
    /// Ledger transaction id of the latest submission
    pub tx_id: String,
    /// Snapshot of the request that produced `tx_id`
    pub request: TransferRequest,
    /// Slot where the transaction landed. 0 means unconfirmed.
    #[serde(with = "u64_string", default)]
    pub confirmed_slot: u64,
    /// Execution error reported by the ledger, empty if none
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub err_logs: String,
}

impl TransferStatus {
    /// Fresh record for a just-submitted transaction
    pub fn submitted(tx_id: impl Into<String>, request: TransferRequest) -> Self {
        Self {
            tx_id: tx_id.into(),
            request,
            confirmed_slot: 0,
            err_logs: String::new(),
        }
    }

    #[inline]
    pub fn is_confirmed(&self) -> bool {
        self.confirmed_slot > 0
    }

    #[inline]
    pub fn has_error(&self) -> bool {
        !self.err_logs.is_empty()
    }

    pub fn phase(&self) -> TransferPhase {
        TransferPhase::of(self)
    }
}

/// Successful result of running one request through the state machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferOutcome {
    /// Amount was zero, nothing to do
    ZeroAmount,
    /// Key absent while in verify/retry mode; inspection modes never submit
    NotInStore,
    /// Already landed in an earlier run
    AlreadyConfirmed { tx_id: String, slot: u64 },
    /// Landed without execution error
    Confirmed {
        tx_id: String,
        slot: u64,
        /// A submission was made by this call
        resubmitted: bool,
    },
    /// Landed, but the ledger reports the transaction failed on execution
    ExecutionFailed {
        tx_id: String,
        slot: u64,
        error: String,
    },
}

impl TransferOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferOutcome::ZeroAmount => "ZERO_AMOUNT",
            TransferOutcome::NotInStore => "NOT_IN_STORE",
            TransferOutcome::AlreadyConfirmed { .. } => "ALREADY_CONFIRMED",
            TransferOutcome::Confirmed { .. } => "CONFIRMED",
            TransferOutcome::ExecutionFailed { .. } => "EXECUTION_FAILED",
        }
    }
}

impl fmt::Display for TransferOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Serde adapter for u64 values stored as decimal strings.
///
/// Reads accept either a JSON number or a decimal string.
pub mod u64_string {
    use std::fmt;

    use serde::de::{self, Visitor};
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &u64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(value)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
        struct U64Visitor;

        impl Visitor<'_> for U64Visitor {
            type Value = u64;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("an unsigned integer or a decimal string")
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<u64, E> {
                Ok(v)
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<u64, E> {
                u64::try_from(v).map_err(|_| E::invalid_value(de::Unexpected::Signed(v), &self))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<u64, E> {
                v.trim()
                    .parse()
                    .map_err(|_| E::invalid_value(de::Unexpected::Str(v), &self))
            }
        }

        deserializer.deserialize_any(U64Visitor)
    }
}
