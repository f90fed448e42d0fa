use alloy_primitives::{Address, Bytes, TxHash, U256, address};
use alloy_sol_types::{SolCall, SolValue};
use async_trait::async_trait;
use sd_chain_client::{
    CallRequest, ChainError, InMemoryChain, InMemoryWallet, LogFilter, RawLog, RpcClient, TxReceipt,
};
use sd_contracts::{
    IShadow, IShadowIco, SCROLL_SEPOLIA_CHAIN_ID, SHADOW_ICO_ADDRESS, SHADOW_TOKEN_ADDRESS,
};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub(crate) const CHAIN_ID: u64 = SCROLL_SEPOLIA_CHAIN_ID;
pub(crate) const BUYER: Address = address!("1111111111111111111111111111111111111111");
pub(crate) const OWNER: Address = address!("4242424242424242424242424242424242424242");

pub(crate) fn ether(whole: u64) -> U256 {
    U256::from(whole) * U256::from(10u64).pow(U256::from(18u64))
}

/// A node with every read the dashboard performs already answered.
pub(crate) fn seeded_chain() -> Arc<InMemoryChain> {
    let chain = Arc::new(InMemoryChain::new(CHAIN_ID));
    chain.set_call(
        SHADOW_TOKEN_ADDRESS,
        IShadow::nameCall::SELECTOR,
        "Shadow".to_owned().abi_encode(),
    );
    chain.set_call(
        SHADOW_TOKEN_ADDRESS,
        IShadow::symbolCall::SELECTOR,
        "SHDW".to_owned().abi_encode(),
    );
    chain.set_call(
        SHADOW_TOKEN_ADDRESS,
        IShadow::totalSupplyCall::SELECTOR,
        ether(1_000_000).abi_encode(),
    );
    chain.set_call(
        SHADOW_TOKEN_ADDRESS,
        IShadow::balanceOfCall::SELECTOR,
        ether(5).abi_encode(),
    );
    chain.set_call(
        SHADOW_ICO_ADDRESS,
        IShadowIco::rateCall::SELECTOR,
        U256::from(1000u64).abi_encode(),
    );
    chain.set_call(SHADOW_ICO_ADDRESS, IShadowIco::ownerCall::SELECTOR, OWNER.abi_encode());
    chain
}

pub(crate) fn wallet_on(chain: &Arc<InMemoryChain>) -> Arc<InMemoryWallet> {
    Arc::new(InMemoryWallet::new(vec![BUYER], CHAIN_ID).with_chain(chain.clone()))
}

/// Answers `eth_call` from the wrapped chain right away but holds each
/// answer back for the next queued delay. Calls past the queue are not held.
pub(crate) struct SlowRpc {
    chain: Arc<InMemoryChain>,
    delays: Mutex<VecDeque<Duration>>,
}

impl SlowRpc {
    pub(crate) fn new(chain: Arc<InMemoryChain>, delays: impl IntoIterator<Item = Duration>) -> Self {
        Self {
            chain,
            delays: Mutex::new(delays.into_iter().collect()),
        }
    }
}

#[async_trait]
impl RpcClient for SlowRpc {
    async fn chain_id(&self) -> Result<u64, ChainError> {
        self.chain.chain_id().await
    }

    async fn block_number(&self) -> Result<u64, ChainError> {
        self.chain.block_number().await
    }

    async fn call(&self, req: CallRequest) -> Result<Bytes, ChainError> {
        let answer = self.chain.call(req).await;
        let delay = self.delays.lock().unwrap().pop_front();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        answer
    }

    async fn transaction_receipt(&self, hash: TxHash) -> Result<Option<TxReceipt>, ChainError> {
        self.chain.transaction_receipt(hash).await
    }

    async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<RawLog>, ChainError> {
        self.chain.get_logs(filter).await
    }
}
