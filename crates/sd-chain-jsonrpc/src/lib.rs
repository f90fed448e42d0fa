use alloy_primitives::{Address, B256, Bytes, TxHash, U64, U256, hex};
use alloy_sol_types::{Revert, SolError};
use async_trait::async_trait;
use sd_chain_client::{CallRequest, ChainError, LogFilter, RawLog, RpcClient, TxReceipt};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::debug;

mod wallet;

pub use wallet::JsonRpcWallet;

/// EIP-1193 "user rejected the request".
const USER_REJECTED: i64 = 4001;
/// Geth/anvil code for a call that reverted.
const EXECUTION_REVERTED: i64 = 3;
const METHOD_NOT_FOUND: i64 = -32601;

/// Failure of a single JSON-RPC exchange, before it is mapped onto
/// [`ChainError`] by whoever issued the request.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum RpcFailure {
    /// The endpoint could not be reached at all.
    Unreachable(String),
    Http(String),
    Rpc {
        code: i64,
        message: String,
        data: Option<Value>,
    },
    Malformed(String),
}

impl RpcFailure {
    pub(crate) fn into_chain_error(self) -> ChainError {
        match self {
            Self::Unreachable(message) | Self::Http(message) => ChainError::Transport(message),
            Self::Malformed(message) => ChainError::Decode(message),
            Self::Rpc {
                code,
                message,
                data,
            } => map_rpc_error(code, &message, data.as_ref()),
        }
    }
}

fn map_rpc_error(code: i64, message: &str, data: Option<&Value>) -> ChainError {
    if code == USER_REJECTED {
        return ChainError::UserRejected;
    }

    if code == EXECUTION_REVERTED || message.contains("execution reverted") {
        let reason = data
            .and_then(Value::as_str)
            .and_then(|raw| hex::decode(raw).ok())
            .and_then(|bytes| Revert::abi_decode(&bytes).ok())
            .map(|revert| revert.reason)
            .or_else(|| {
                message
                    .split_once("execution reverted: ")
                    .map(|(_, reason)| reason.trim().to_owned())
                    .filter(|reason| !reason.is_empty())
            });
        return ChainError::ExecutionReverted { reason };
    }

    ChainError::Transport(format!("rpc error {code}: {message}"))
}

#[derive(Debug, Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorObject>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
    #[serde(default)]
    data: Option<Value>,
}

/// HTTP JSON-RPC 2.0 transport shared by the node client and the wallet.
pub(crate) struct JsonRpcTransport {
    endpoint: String,
    http: reqwest::Client,
    next_id: AtomicU64,
}

impl JsonRpcTransport {
    pub(crate) fn new(endpoint: &str, timeout: Duration) -> Result<Self, ChainError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| ChainError::Transport(format!("http client: {err}")))?;
        Ok(Self {
            endpoint: endpoint.trim_end_matches('/').to_owned(),
            http,
            next_id: AtomicU64::new(1),
        })
    }

    pub(crate) fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub(crate) async fn request<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
    ) -> Result<T, RpcFailure> {
        let body = RpcRequest {
            jsonrpc: "2.0",
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            method,
            params,
        };
        debug!(method, endpoint = %self.endpoint, "json-rpc request");

        let response = self
            .http
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|err| {
                if err.is_connect() {
                    RpcFailure::Unreachable(format!("{method}: {err}"))
                } else {
                    RpcFailure::Http(format!("{method}: {err}"))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(RpcFailure::Http(format!("{method} HTTP {status}: {text}")));
        }

        let envelope: RpcResponse = response
            .json()
            .await
            .map_err(|err| RpcFailure::Malformed(format!("{method}: {err}")))?;
        parse_envelope(method, envelope)
    }
}

fn parse_envelope<T: DeserializeOwned>(method: &str, envelope: RpcResponse) -> Result<T, RpcFailure> {
    if let Some(error) = envelope.error {
        return Err(RpcFailure::Rpc {
            code: error.code,
            message: error.message,
            data: error.data,
        });
    }

    serde_json::from_value(envelope.result.unwrap_or(Value::Null))
        .map_err(|err| RpcFailure::Malformed(format!("{method}: {err}")))
}

// ── Ethereum JSON-RPC object shapes ──────────────────────────────────

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CallObject {
    #[serde(skip_serializing_if = "Option::is_none")]
    from: Option<Address>,
    to: Address,
    #[serde(skip_serializing_if = "Option::is_none")]
    value: Option<U256>,
    data: Bytes,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FilterObject {
    address: Address,
    topics: Vec<Option<B256>>,
    from_block: String,
    to_block: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReceiptObject {
    transaction_hash: TxHash,
    #[serde(default)]
    block_number: Option<U64>,
    #[serde(default)]
    status: Option<U64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LogObject {
    address: Address,
    topics: Vec<B256>,
    data: Bytes,
    #[serde(default)]
    block_number: Option<U64>,
    #[serde(default)]
    transaction_hash: Option<TxHash>,
    #[serde(default)]
    log_index: Option<U64>,
}

fn quantity(value: u64) -> String {
    format!("0x{value:x}")
}

fn call_params(req: &CallRequest) -> Value {
    let call = CallObject {
        from: req.from,
        to: req.to,
        value: req.value,
        data: req.data.clone(),
    };
    let block = req.block.map(quantity).unwrap_or_else(|| "latest".to_owned());
    json!([call, block])
}

fn filter_params(filter: &LogFilter) -> Value {
    let topics = filter.topic0.map(|topic| vec![Some(topic)]).unwrap_or_default();
    json!([FilterObject {
        address: filter.address,
        topics,
        from_block: quantity(filter.from_block),
        to_block: quantity(filter.to_block),
    }])
}

impl ReceiptObject {
    fn into_receipt(self) -> TxReceipt {
        TxReceipt {
            transaction_hash: self.transaction_hash,
            block_number: self.block_number.map(|block| block.to::<u64>()),
            // Receipts without a status field predate Byzantium and only exist for mined txs.
            success: self.status.is_none_or(|status| status == U64::from(1u64)),
        }
    }
}

impl LogObject {
    fn into_raw_log(self) -> RawLog {
        RawLog {
            address: self.address,
            topics: self.topics,
            data: self.data,
            block_number: self.block_number.map(|block| block.to::<u64>()),
            transaction_hash: self.transaction_hash,
            log_index: self.log_index.map(|index| index.to::<u64>()),
        }
    }
}

/// Node client speaking Ethereum JSON-RPC over HTTP.
///
/// Reads `SHADOW_RPC_URL` from environment when no endpoint is given.
pub struct JsonRpcClient {
    transport: JsonRpcTransport,
}

impl JsonRpcClient {
    pub fn new(endpoint: Option<String>, timeout: Duration) -> Result<Self, ChainError> {
        let endpoint = endpoint
            .or_else(|| std::env::var("SHADOW_RPC_URL").ok())
            .unwrap_or_else(|| "http://localhost:8545".to_owned());
        Ok(Self {
            transport: JsonRpcTransport::new(&endpoint, timeout)?,
        })
    }

    pub fn endpoint(&self) -> &str {
        self.transport.endpoint()
    }

    async fn request<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T, ChainError> {
        self.transport
            .request(method, params)
            .await
            .map_err(RpcFailure::into_chain_error)
    }
}

#[async_trait]
impl RpcClient for JsonRpcClient {
    async fn chain_id(&self) -> Result<u64, ChainError> {
        let id: U64 = self.request("eth_chainId", json!([])).await?;
        Ok(id.to::<u64>())
    }

    async fn block_number(&self) -> Result<u64, ChainError> {
        let block: U64 = self.request("eth_blockNumber", json!([])).await?;
        Ok(block.to::<u64>())
    }

    async fn call(&self, req: CallRequest) -> Result<Bytes, ChainError> {
        self.request("eth_call", call_params(&req)).await
    }

    async fn transaction_receipt(&self, hash: TxHash) -> Result<Option<TxReceipt>, ChainError> {
        let receipt: Option<ReceiptObject> = self
            .request("eth_getTransactionReceipt", json!([hash]))
            .await?;
        Ok(receipt.map(ReceiptObject::into_receipt))
    }

    async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<RawLog>, ChainError> {
        let logs: Vec<LogObject> = self.request("eth_getLogs", filter_params(filter)).await?;
        Ok(logs.into_iter().map(LogObject::into_raw_log).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_rejection_code_maps_to_user_rejected() {
        assert_eq!(
            map_rpc_error(4001, "User rejected the request.", None),
            ChainError::UserRejected
        );
    }

    #[test]
    fn revert_reason_is_decoded_from_error_data() {
        let payload = Revert {
            reason: "ICO has ended".to_owned(),
        }
        .abi_encode();
        let data = Value::String(hex::encode_prefixed(payload));

        assert_eq!(
            map_rpc_error(3, "execution reverted", Some(&data)),
            ChainError::ExecutionReverted {
                reason: Some("ICO has ended".to_owned())
            }
        );
    }

    #[test]
    fn revert_reason_falls_back_to_message_text() {
        assert_eq!(
            map_rpc_error(-32000, "execution reverted: Send ETH to buy tokens", None),
            ChainError::ExecutionReverted {
                reason: Some("Send ETH to buy tokens".to_owned())
            }
        );
        assert_eq!(
            map_rpc_error(3, "execution reverted", None),
            ChainError::ExecutionReverted { reason: None }
        );
    }

    #[test]
    fn other_rpc_errors_are_transport_errors() {
        assert!(matches!(
            map_rpc_error(-32005, "rate limited", None),
            ChainError::Transport(message) if message.contains("rate limited")
        ));
    }

    #[test]
    fn call_params_use_latest_unless_block_given() {
        let req = CallRequest::new(Address::repeat_byte(0x22), vec![0x2c, 0x4e, 0x72, 0x2e]);
        let params = call_params(&req);
        assert_eq!(params[1], "latest");
        assert_eq!(params[0]["data"], "0x2c4e722e");
        assert!(params[0].get("from").is_none());

        let replay = req.with_value(U256::from(16u64)).at_block(255);
        let params = call_params(&replay);
        assert_eq!(params[1], "0xff");
        assert_eq!(params[0]["value"], "0x10");
    }

    #[test]
    fn filter_params_encode_block_range_as_quantities() {
        let filter = LogFilter {
            address: Address::repeat_byte(0x22),
            topic0: Some(B256::repeat_byte(0xaa)),
            from_block: 10,
            to_block: 16,
        };
        let params = filter_params(&filter);
        assert_eq!(params[0]["fromBlock"], "0xa");
        assert_eq!(params[0]["toBlock"], "0x10");
        assert_eq!(params[0]["topics"].as_array().map(Vec::len), Some(1));
    }

    #[test]
    fn receipt_status_zero_is_failure() {
        let envelope: RpcResponse = serde_json::from_value(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "result": {
                "transactionHash": format!("0x{}", "ab".repeat(32)),
                "blockNumber": "0x1b4",
                "status": "0x0"
            }
        }))
        .unwrap();

        let receipt: Option<ReceiptObject> = parse_envelope("eth_getTransactionReceipt", envelope).unwrap();
        let receipt = receipt.unwrap().into_receipt();
        assert!(!receipt.success);
        assert_eq!(receipt.block_number, Some(436));
    }

    #[test]
    fn null_receipt_means_not_mined() {
        let envelope: RpcResponse =
            serde_json::from_value(json!({"jsonrpc": "2.0", "id": 1, "result": null})).unwrap();
        let receipt: Option<ReceiptObject> = parse_envelope("eth_getTransactionReceipt", envelope).unwrap();
        assert!(receipt.is_none());
    }

    #[test]
    fn error_envelope_becomes_rpc_failure() {
        let envelope: RpcResponse = serde_json::from_value(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "error": {"code": -32601, "message": "method not found"}
        }))
        .unwrap();
        let result: Result<Value, RpcFailure> = parse_envelope("eth_requestAccounts", envelope);
        assert!(matches!(
            result,
            Err(RpcFailure::Rpc { code: METHOD_NOT_FOUND, .. })
        ));
    }
}
