use alloy_primitives::{Address, Bytes, TxHash, U64, U256};
use async_trait::async_trait;
use sd_chain_client::{ChainError, ProviderEvent, SendTxRequest, WalletProvider};
use serde::Serialize;
use serde_json::json;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{JsonRpcTransport, METHOD_NOT_FOUND, RpcFailure};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TransactionObject {
    from: Address,
    to: Address,
    value: U256,
    data: Bytes,
}

#[derive(Default)]
struct Observed {
    accounts: Option<Vec<Address>>,
    chain_id: Option<u64>,
}

/// Wallet reached over JSON-RPC: a signer proxy or a development node with
/// unlocked accounts. It signs whatever it is asked to send.
///
/// Such endpoints cannot push notifications, so [`JsonRpcWallet::spawn_watcher`]
/// polls accounts and chain id and broadcasts the differences.
pub struct JsonRpcWallet {
    transport: JsonRpcTransport,
    observed: Mutex<Observed>,
    events: broadcast::Sender<ProviderEvent>,
}

impl JsonRpcWallet {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self, ChainError> {
        let (events, _) = broadcast::channel(16);
        Ok(Self {
            transport: JsonRpcTransport::new(endpoint, timeout)?,
            observed: Mutex::new(Observed::default()),
            events,
        })
    }

    pub fn endpoint(&self) -> &str {
        self.transport.endpoint()
    }

    fn observed(&self) -> MutexGuard<'_, Observed> {
        self.observed.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Wallet endpoints that cannot be reached are reported as missing.
    fn wallet_error(failure: RpcFailure) -> ChainError {
        match failure {
            RpcFailure::Unreachable(message) => {
                warn!("wallet endpoint unreachable: {}", message);
                ChainError::ProviderUnavailable
            }
            other => other.into_chain_error(),
        }
    }

    async fn accounts(&self) -> Result<Vec<Address>, RpcFailure> {
        match self.transport.request("eth_requestAccounts", json!([])).await {
            Err(RpcFailure::Rpc {
                code: METHOD_NOT_FOUND,
                ..
            }) => self.transport.request("eth_accounts", json!([])).await,
            other => other,
        }
    }

    /// Polls the wallet until `cancel` fires, broadcasting account and chain
    /// changes. The first observation only sets the baseline.
    pub fn spawn_watcher(self: Arc<Self>, interval: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                self.poll_once().await;
            }

            debug!("wallet watcher stopped");
        })
    }

    async fn poll_once(&self) {
        let accounts: Result<Vec<Address>, RpcFailure> =
            self.transport.request("eth_accounts", json!([])).await;
        let chain_id: Result<U64, RpcFailure> = self.transport.request("eth_chainId", json!([])).await;

        let mut pending = Vec::new();
        {
            let mut observed = self.observed();
            match accounts {
                Ok(accounts) => {
                    if observed.accounts.as_ref().is_some_and(|known| *known != accounts) {
                        pending.push(ProviderEvent::AccountsChanged(accounts.clone()));
                    }
                    observed.accounts = Some(accounts);
                }
                Err(RpcFailure::Unreachable(message)) => {
                    if observed.accounts.take().is_some() {
                        warn!("wallet endpoint went away: {}", message);
                        pending.push(ProviderEvent::Disconnected);
                    }
                }
                Err(other) => debug!("account poll failed: {:?}", other),
            }

            if let Ok(chain_id) = chain_id {
                let chain_id = chain_id.to::<u64>();
                if observed.chain_id.is_some_and(|known| known != chain_id) {
                    pending.push(ProviderEvent::ChainChanged(chain_id));
                }
                observed.chain_id = Some(chain_id);
            }
        }

        for event in pending {
            info!(?event, "wallet state changed");
            let _ = self.events.send(event);
        }
    }
}

#[async_trait]
impl WalletProvider for JsonRpcWallet {
    fn name(&self) -> &str {
        "json-rpc"
    }

    async fn request_accounts(&self) -> Result<Vec<Address>, ChainError> {
        let accounts = self.accounts().await.map_err(Self::wallet_error)?;
        if accounts.is_empty() {
            return Err(ChainError::UserRejected);
        }
        self.observed().accounts = Some(accounts.clone());
        Ok(accounts)
    }

    async fn chain_id(&self) -> Result<u64, ChainError> {
        let chain_id: U64 = self
            .transport
            .request("eth_chainId", json!([]))
            .await
            .map_err(Self::wallet_error)?;
        let chain_id = chain_id.to::<u64>();
        self.observed().chain_id = Some(chain_id);
        Ok(chain_id)
    }

    async fn disconnect(&self) -> Result<(), ChainError> {
        *self.observed() = Observed::default();
        Ok(())
    }

    async fn send_transaction(&self, req: SendTxRequest) -> Result<TxHash, ChainError> {
        let tx = TransactionObject {
            from: req.from,
            to: req.to,
            value: req.value,
            data: req.data,
        };
        self.transport
            .request("eth_sendTransaction", json!([tx]))
            .await
            .map_err(Self::wallet_error)
    }

    fn subscribe(&self) -> broadcast::Receiver<ProviderEvent> {
        self.events.subscribe()
    }
}
