//! In-memory node and wallet.
//!
//! Scriptable stand-ins for the JSON-RPC node and the user's wallet. Call
//! results are keyed by contract address and function selector, so callers
//! encode return data with the same ABI types they decode with.

use alloy_primitives::{Address, B256, Bytes, TxHash, keccak256};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::broadcast;

use crate::{
    CallRequest, ChainError, LogFilter, ProviderEvent, RawLog, RpcClient, SendTxRequest,
    TxReceipt, WalletProvider,
};

/// How the next submitted transaction ends up on chain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TxOutcome {
    #[default]
    Success,
    Reverted,
    /// Never mined until [`InMemoryChain::confirm`] is called.
    Pending,
}

#[derive(Default)]
struct ChainState {
    chain_id: u64,
    block_number: u64,
    nonce: u64,
    offline: bool,
    next_outcome: TxOutcome,
    calls: HashMap<(Address, [u8; 4]), Result<Bytes, ChainError>>,
    call_counts: HashMap<[u8; 4], usize>,
    receipt_polls: usize,
    receipts: HashMap<TxHash, TxReceipt>,
    transactions: Vec<SendTxRequest>,
    logs: Vec<RawLog>,
}

pub struct InMemoryChain {
    state: Mutex<ChainState>,
}

impl InMemoryChain {
    pub fn new(chain_id: u64) -> Self {
        Self {
            state: Mutex::new(ChainState {
                chain_id,
                block_number: 1,
                ..ChainState::default()
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, ChainState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn set_call(&self, to: Address, selector: [u8; 4], output: impl Into<Bytes>) {
        self.state().calls.insert((to, selector), Ok(output.into()));
    }

    pub fn set_call_error(&self, to: Address, selector: [u8; 4], error: ChainError) {
        self.state().calls.insert((to, selector), Err(error));
    }

    pub fn call_count(&self, selector: [u8; 4]) -> usize {
        self.state().call_counts.get(&selector).copied().unwrap_or(0)
    }

    pub fn receipt_polls(&self) -> usize {
        self.state().receipt_polls
    }

    /// While offline every node request fails with a transport error.
    pub fn set_offline(&self, offline: bool) {
        self.state().offline = offline;
    }

    pub fn set_next_outcome(&self, outcome: TxOutcome) {
        self.state().next_outcome = outcome;
    }

    pub fn advance_blocks(&self, count: u64) -> u64 {
        let mut state = self.state();
        state.block_number += count;
        state.block_number
    }

    pub fn transactions(&self) -> Vec<SendTxRequest> {
        self.state().transactions.clone()
    }

    /// Accepts a transaction the way a node would after the wallet signed it.
    pub fn submit(&self, req: SendTxRequest) -> TxHash {
        let mut state = self.state();
        let hash = next_hash(&mut state, req.from);
        state.transactions.push(req);

        match state.next_outcome {
            TxOutcome::Pending => {}
            outcome => {
                state.block_number += 1;
                let receipt = TxReceipt {
                    transaction_hash: hash,
                    block_number: Some(state.block_number),
                    success: outcome == TxOutcome::Success,
                };
                state.receipts.insert(hash, receipt);
            }
        }

        hash
    }

    /// Mines a transaction that was submitted while the outcome was `Pending`.
    pub fn confirm(&self, hash: TxHash, success: bool) {
        let mut state = self.state();
        state.block_number += 1;
        let receipt = TxReceipt {
            transaction_hash: hash,
            block_number: Some(state.block_number),
            success,
        };
        state.receipts.insert(hash, receipt);
    }

    /// Emits a log in a fresh block and returns its transaction hash.
    pub fn push_log(&self, address: Address, topics: Vec<B256>, data: impl Into<Bytes>) -> TxHash {
        let mut state = self.state();
        let hash = next_hash(&mut state, address);
        state.block_number += 1;
        let log = RawLog {
            address,
            topics,
            data: data.into(),
            block_number: Some(state.block_number),
            transaction_hash: Some(hash),
            log_index: Some(0),
        };
        state.logs.push(log);
        hash
    }

    fn ensure_online(state: &ChainState) -> Result<(), ChainError> {
        if state.offline {
            return Err(ChainError::Transport("node unreachable".to_owned()));
        }
        Ok(())
    }
}

fn next_hash(state: &mut ChainState, salt: Address) -> TxHash {
    state.nonce += 1;
    let mut preimage = salt.to_vec();
    preimage.extend_from_slice(&state.nonce.to_be_bytes());
    keccak256(preimage)
}

#[async_trait]
impl RpcClient for InMemoryChain {
    async fn chain_id(&self) -> Result<u64, ChainError> {
        let state = self.state();
        Self::ensure_online(&state)?;
        Ok(state.chain_id)
    }

    async fn block_number(&self) -> Result<u64, ChainError> {
        let state = self.state();
        Self::ensure_online(&state)?;
        Ok(state.block_number)
    }

    async fn call(&self, req: CallRequest) -> Result<Bytes, ChainError> {
        let mut state = self.state();
        Self::ensure_online(&state)?;

        let selector = req
            .selector()
            .ok_or_else(|| ChainError::Transport("calldata shorter than a selector".to_owned()))?;
        *state.call_counts.entry(selector).or_default() += 1;

        state
            .calls
            .get(&(req.to, selector))
            .cloned()
            .unwrap_or_else(|| Err(ChainError::ExecutionReverted { reason: None }))
    }

    async fn transaction_receipt(&self, hash: TxHash) -> Result<Option<TxReceipt>, ChainError> {
        let mut state = self.state();
        Self::ensure_online(&state)?;
        state.receipt_polls += 1;
        Ok(state.receipts.get(&hash).cloned())
    }

    async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<RawLog>, ChainError> {
        let state = self.state();
        Self::ensure_online(&state)?;

        let logs = state
            .logs
            .iter()
            .filter(|log| log.address == filter.address)
            .filter(|log| match filter.topic0 {
                Some(topic) => log.topics.first() == Some(&topic),
                None => true,
            })
            .filter(|log| {
                log.block_number
                    .is_some_and(|block| block >= filter.from_block && block <= filter.to_block)
            })
            .cloned()
            .collect();
        Ok(logs)
    }
}

pub struct InMemoryWallet {
    accounts: Mutex<Vec<Address>>,
    chain_id: u64,
    chain: Option<Arc<InMemoryChain>>,
    rejecting: AtomicBool,
    sent: AtomicUsize,
    events: broadcast::Sender<ProviderEvent>,
}

impl InMemoryWallet {
    pub fn new(accounts: Vec<Address>, chain_id: u64) -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            accounts: Mutex::new(accounts),
            chain_id,
            chain: None,
            rejecting: AtomicBool::new(false),
            sent: AtomicUsize::new(0),
            events,
        }
    }

    /// Transactions sent through this wallet land on `chain`.
    pub fn with_chain(mut self, chain: Arc<InMemoryChain>) -> Self {
        self.chain = Some(chain);
        self
    }

    /// Simulates the user declining every prompt.
    pub fn set_rejecting(&self, rejecting: bool) {
        self.rejecting.store(rejecting, Ordering::SeqCst);
    }

    pub fn sent_count(&self) -> usize {
        self.sent.load(Ordering::SeqCst)
    }

    pub fn set_accounts(&self, accounts: Vec<Address>) {
        *self.accounts.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = accounts.clone();
        let _ = self.events.send(ProviderEvent::AccountsChanged(accounts));
    }

    pub fn emit(&self, event: ProviderEvent) {
        let _ = self.events.send(event);
    }
}

#[async_trait]
impl WalletProvider for InMemoryWallet {
    fn name(&self) -> &str {
        "in-memory"
    }

    async fn request_accounts(&self) -> Result<Vec<Address>, ChainError> {
        if self.rejecting.load(Ordering::SeqCst) {
            return Err(ChainError::UserRejected);
        }
        Ok(self
            .accounts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone())
    }

    async fn chain_id(&self) -> Result<u64, ChainError> {
        Ok(self.chain_id)
    }

    async fn disconnect(&self) -> Result<(), ChainError> {
        Ok(())
    }

    async fn send_transaction(&self, req: SendTxRequest) -> Result<TxHash, ChainError> {
        if self.rejecting.load(Ordering::SeqCst) {
            return Err(ChainError::UserRejected);
        }
        let Some(chain) = &self.chain else {
            return Err(ChainError::Transport("wallet has no node attached".to_owned()));
        };
        self.sent.fetch_add(1, Ordering::SeqCst);
        Ok(chain.submit(req))
    }

    fn subscribe(&self) -> broadcast::Receiver<ProviderEvent> {
        self.events.subscribe()
    }
}
