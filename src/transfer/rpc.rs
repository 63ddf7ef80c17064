//! JSON-RPC Ledger Client
//!
//! [`LedgerClient`] over HTTP JSON-RPC 2.0 against a ledger gateway that holds the
//! source account's signing key. Methods used:
//!
//! | Method              | Params                                        | Result                                   |
//! |---------------------|-----------------------------------------------|------------------------------------------|
//! | `sendTransfer`      | `{asset, source, destination, amount}`        | tx id string                             |
//! | `getTransferStatus` | `[tx_id]`                                     | `null` or `{slot, err, logMessages}`     |
//! | `getTokenBalance`   | `{asset, account}`                            | `{amount}`                               |

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::ledger::{Confirmation, LedgerClient, LedgerError};
use super::types::u64_string;

/// Ledger gateway connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    pub rpc_url: String,
    pub timeout_ms: u64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            rpc_url: "http://127.0.0.1:8899".to_string(),
            timeout_ms: 30_000,
        }
    }
}

/// JSON-RPC request structure
#[derive(Serialize)]
struct JsonRpcRequest<T> {
    jsonrpc: &'static str,
    method: &'static str,
    params: T,
    id: u64,
}

/// JSON-RPC response structure
#[derive(Deserialize)]
struct JsonRpcResponse<T> {
    result: Option<T>,
    error: Option<JsonRpcError>,
}

#[derive(Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

#[derive(Serialize)]
struct SendTransferParams<'a> {
    asset: &'a str,
    source: &'a str,
    destination: &'a str,
    #[serde(with = "u64_string")]
    amount: u64,
}

#[derive(Serialize)]
struct BalanceParams<'a> {
    asset: &'a str,
    account: &'a str,
}

/// Landed transaction as reported by the gateway
#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct TransferStatusResult {
    #[serde(with = "u64_string")]
    slot: u64,
    #[serde(default)]
    err: Option<serde_json::Value>,
    #[serde(default)]
    log_messages: Vec<String>,
}

impl TransferStatusResult {
    fn into_confirmation(self) -> Confirmation {
        match self.err {
            Some(err) if !err.is_null() => Confirmation::failed(
                self.slot,
                format!("error: [{}]", self.log_messages.join(" ")),
            ),
            _ => Confirmation::landed(self.slot),
        }
    }
}

#[derive(Deserialize, Debug)]
struct BalanceResult {
    #[serde(with = "u64_string")]
    amount: u64,
}

pub struct RpcLedgerClient {
    config: LedgerConfig,
    client: reqwest::Client,
    next_id: AtomicU64,
}

impl RpcLedgerClient {
    pub fn new(config: LedgerConfig) -> Result<Self, LedgerError> {
        info!(rpc_url = %config.rpc_url, "Initializing ledger RPC client");

        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| LedgerError::Rpc(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            config,
            client,
            next_id: AtomicU64::new(1),
        })
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    /// Make a JSON-RPC call. `Ok(None)` is a `null` result.
    async fn rpc_call<T, R>(&self, method: &'static str, params: T) -> Result<Option<R>, RpcFailure>
    where
        T: Serialize,
        R: for<'de> Deserialize<'de>,
    {
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            method,
            params,
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
        };

        debug!(method = method, id = request.id, "Ledger RPC call");

        let response = self
            .client
            .post(&self.config.rpc_url)
            .json(&request)
            .send()
            .await
            .map_err(|e| RpcFailure::Transport(format!("HTTP request failed: {}", e)))?;

        let rpc_response: JsonRpcResponse<R> = response
            .json()
            .await
            .map_err(|e| RpcFailure::Decode(format!("Failed to parse response: {}", e)))?;

        decode_response(rpc_response)
    }
}

/// Where an RPC call went wrong; mapped to [`LedgerError`] per method
#[derive(Debug)]
enum RpcFailure {
    Transport(String),
    Server { code: i64, message: String },
    Decode(String),
}

impl RpcFailure {
    fn into_ledger_error(self) -> LedgerError {
        match self {
            RpcFailure::Transport(msg) => LedgerError::Rpc(msg),
            RpcFailure::Server { code, message } => {
                LedgerError::Rpc(format!("RPC error {}: {}", code, message))
            }
            RpcFailure::Decode(msg) => LedgerError::Decode(msg),
        }
    }
}

fn decode_response<R>(response: JsonRpcResponse<R>) -> Result<Option<R>, RpcFailure> {
    if let Some(error) = response.error {
        return Err(RpcFailure::Server {
            code: error.code,
            message: error.message,
        });
    }
    Ok(response.result)
}

#[async_trait]
impl LedgerClient for RpcLedgerClient {
    fn name(&self) -> &'static str {
        "json-rpc"
    }

    async fn submit(
        &self,
        asset: &str,
        source: &str,
        destination: &str,
        amount: u64,
    ) -> Result<String, LedgerError> {
        let params = SendTransferParams {
            asset,
            source,
            destination,
            amount,
        };

        match self.rpc_call::<_, String>("sendTransfer", params).await {
            Ok(Some(tx_id)) if !tx_id.is_empty() => Ok(tx_id),
            Ok(_) => Err(LedgerError::Decode(
                "sendTransfer returned no transaction id".to_string(),
            )),
            // the gateway refused to sign or broadcast
            Err(RpcFailure::Server { code, message }) => Err(LedgerError::Rejected(format!(
                "RPC error {}: {}",
                code, message
            ))),
            Err(other) => Err(other.into_ledger_error()),
        }
    }

    async fn confirm(&self, tx_id: &str) -> Result<Confirmation, LedgerError> {
        let result = self
            .rpc_call::<_, TransferStatusResult>("getTransferStatus", [tx_id])
            .await
            .map_err(RpcFailure::into_ledger_error)?;

        Ok(result
            .map(TransferStatusResult::into_confirmation)
            .unwrap_or_else(Confirmation::pending))
    }

    async fn balance(&self, asset: &str, account: &str) -> Result<u64, LedgerError> {
        let result = self
            .rpc_call::<_, BalanceResult>("getTokenBalance", BalanceParams { asset, account })
            .await
            .map_err(RpcFailure::into_ledger_error)?;

        // a missing token account holds nothing
        Ok(result.map(|b| b.amount).unwrap_or(0))
    }
}
