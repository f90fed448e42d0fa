use alloy_primitives::{Address, B256, Bytes, TxHash, U256};
use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::broadcast;

pub mod memory;

pub use memory::{InMemoryChain, InMemoryWallet, TxOutcome};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChainError {
    #[error("no compatible wallet provider found")]
    ProviderUnavailable,
    #[error("request rejected by user")]
    UserRejected,
    #[error("transport error: {0}")]
    Transport(String),
    #[error("execution reverted{}", revert_suffix(.reason))]
    ExecutionReverted { reason: Option<String> },
    #[error("malformed response: {0}")]
    Decode(String),
}

fn revert_suffix(reason: &Option<String>) -> String {
    match reason {
        Some(reason) => format!(": {reason}"),
        None => String::new(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallRequest {
    pub from: Option<Address>,
    pub to: Address,
    pub value: Option<U256>,
    pub data: Bytes,
    /// `None` reads at `latest`.
    pub block: Option<u64>,
}

impl CallRequest {
    pub fn new(to: Address, data: impl Into<Bytes>) -> Self {
        Self {
            from: None,
            to,
            value: None,
            data: data.into(),
            block: None,
        }
    }

    pub fn with_from(mut self, from: Address) -> Self {
        self.from = Some(from);
        self
    }

    pub fn with_value(mut self, value: U256) -> Self {
        self.value = Some(value);
        self
    }

    pub fn at_block(mut self, block: u64) -> Self {
        self.block = Some(block);
        self
    }

    pub fn selector(&self) -> Option<[u8; 4]> {
        self.data.get(..4).and_then(|head| head.try_into().ok())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendTxRequest {
    pub from: Address,
    pub to: Address,
    pub value: U256,
    pub data: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxReceipt {
    pub transaction_hash: TxHash,
    pub block_number: Option<u64>,
    pub success: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFilter {
    pub address: Address,
    pub topic0: Option<B256>,
    pub from_block: u64,
    pub to_block: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawLog {
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Bytes,
    pub block_number: Option<u64>,
    /// `None` for logs of pending transactions.
    pub transaction_hash: Option<TxHash>,
    pub log_index: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderEvent {
    AccountsChanged(Vec<Address>),
    ChainChanged(u64),
    Disconnected,
}

/// Read side of a node: calls, receipts and logs.
#[async_trait]
pub trait RpcClient: Send + Sync {
    async fn chain_id(&self) -> Result<u64, ChainError>;
    async fn block_number(&self) -> Result<u64, ChainError>;
    async fn call(&self, req: CallRequest) -> Result<Bytes, ChainError>;
    async fn transaction_receipt(&self, hash: TxHash) -> Result<Option<TxReceipt>, ChainError>;
    async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<RawLog>, ChainError>;
}

/// The user's wallet. Owns the accounts and signs what it sends.
#[async_trait]
pub trait WalletProvider: Send + Sync {
    fn name(&self) -> &str;
    async fn request_accounts(&self) -> Result<Vec<Address>, ChainError>;
    async fn chain_id(&self) -> Result<u64, ChainError>;
    async fn disconnect(&self) -> Result<(), ChainError>;
    async fn send_transaction(&self, req: SendTxRequest) -> Result<TxHash, ChainError>;
    fn subscribe(&self) -> broadcast::Receiver<ProviderEvent>;
}

/// Stand-in used when no wallet endpoint is configured.
pub struct NoWalletProvider {
    events: broadcast::Sender<ProviderEvent>,
}

impl Default for NoWalletProvider {
    fn default() -> Self {
        let (events, _) = broadcast::channel(1);
        Self { events }
    }
}

#[async_trait]
impl WalletProvider for NoWalletProvider {
    fn name(&self) -> &str {
        "none"
    }

    async fn request_accounts(&self) -> Result<Vec<Address>, ChainError> {
        Err(ChainError::ProviderUnavailable)
    }

    async fn chain_id(&self) -> Result<u64, ChainError> {
        Err(ChainError::ProviderUnavailable)
    }

    async fn disconnect(&self) -> Result<(), ChainError> {
        Ok(())
    }

    async fn send_transaction(&self, _req: SendTxRequest) -> Result<TxHash, ChainError> {
        Err(ChainError::ProviderUnavailable)
    }

    fn subscribe(&self) -> broadcast::Receiver<ProviderEvent> {
        self.events.subscribe()
    }
}
