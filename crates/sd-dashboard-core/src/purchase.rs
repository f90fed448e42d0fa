//! ETH → SHDW purchase state machine.
//!
//! idle → validating → ready → submitted → confirming → succeeded | failed.
//! Wallet rejections and submission errors fall back to idle without a hash;
//! a mined-but-reverted transaction ends in failed with the revert reason
//! when one can be recovered.

use alloy_primitives::{Address, TxHash, U256};
use sd_api_types::{PurchaseState, PurchaseStatus};
use sd_chain_client::{RpcClient, TxReceipt};
use sd_contracts::ShadowIco;
use sd_contracts::units::parse_ether;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::DappError;
use crate::reader::{ContractReader, Field};
use crate::session::WalletSession;

/// Parses user input into a positive wei amount.
pub fn validate_amount(input: &str) -> Result<U256, DappError> {
    let wei = parse_ether(input)?;
    if wei.is_zero() {
        return Err(DappError::InvalidAmount("amount must be greater than zero".to_owned()));
    }
    Ok(wei)
}

struct SubmitGuard<'a>(&'a AtomicBool);

impl Drop for SubmitGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct PurchaseFlow {
    ico: ShadowIco,
    rpc: Arc<dyn RpcClient>,
    session: Arc<WalletSession>,
    reader: Arc<ContractReader>,
    state: watch::Sender<PurchaseState>,
    submitting: AtomicBool,
    confirmation_poll: Duration,
    cancel: CancellationToken,
    tracker: Mutex<Option<JoinHandle<()>>>,
}

impl PurchaseFlow {
    pub fn new(
        ico_address: Address,
        rpc: Arc<dyn RpcClient>,
        session: Arc<WalletSession>,
        reader: Arc<ContractReader>,
        cancel: CancellationToken,
    ) -> Self {
        let (state, _) = watch::channel(PurchaseState::default());
        Self {
            ico: ShadowIco::new(ico_address, rpc.clone()),
            rpc,
            session,
            reader,
            state,
            submitting: AtomicBool::new(false),
            confirmation_poll: Duration::from_secs(4),
            cancel,
            tracker: Mutex::new(None),
        }
    }

    pub fn with_confirmation_poll(mut self, interval: Duration) -> Self {
        self.confirmation_poll = interval;
        self
    }

    pub fn state(&self) -> PurchaseState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<PurchaseState> {
        self.state.subscribe()
    }

    fn busy(&self) -> bool {
        let status = self.state.borrow().status;
        status.is_in_flight() || status.is_terminal() || self.submitting.load(Ordering::SeqCst)
    }

    /// Records new input and validates it. Rejected while a purchase is
    /// pending or its outcome has not been dismissed.
    pub fn set_amount(&self, input: &str) -> Result<PurchaseState, DappError> {
        if self.busy() {
            return Err(DappError::PurchaseInProgress);
        }

        self.state.send_modify(|state| {
            state.amount_input = input.to_owned();
            state.status = PurchaseStatus::Validating;
            state.error = None;
        });

        let validated = validate_amount(input);
        self.state.send_modify(|state| match &validated {
            Ok(wei) => {
                state.parsed_wei = Some(*wei);
                state.status = PurchaseStatus::Ready;
            }
            Err(err) => {
                state.parsed_wei = None;
                state.status = PurchaseStatus::Idle;
                state.error = Some(err.to_string());
            }
        });
        Ok(self.state())
    }

    /// Tokens the current amount buys at the cached sale rate.
    pub fn estimate_tokens(&self) -> Option<U256> {
        let wei = self.state.borrow().parsed_wei?;
        let rate = self.reader.read(Field::SaleRate).value?.as_amount()?;
        wei.checked_mul(rate)
    }

    pub async fn submit(self: &Arc<Self>) -> Result<TxHash, DappError> {
        let buyer = self
            .session
            .current()
            .active_address()
            .ok_or(DappError::NotConnected)?;

        if self.busy() || self.submitting.swap(true, Ordering::SeqCst) {
            return Err(DappError::PurchaseInProgress);
        }
        let _guard = SubmitGuard(&self.submitting);

        let input = self.state.borrow().amount_input.clone();
        let wei = match validate_amount(&input) {
            Ok(wei) => wei,
            Err(err) => {
                self.state.send_modify(|state| {
                    state.parsed_wei = None;
                    state.status = PurchaseStatus::Idle;
                    state.error = Some(err.to_string());
                });
                return Err(err);
            }
        };

        let wallet = self.session.provider();
        let hash = match self.ico.buy_tokens(wallet.as_ref(), buyer, wei).await {
            Ok(hash) => hash,
            Err(err) => {
                let err = DappError::from(err);
                warn!(%buyer, "purchase not submitted: {}", err);
                self.state.send_modify(|state| {
                    state.status = PurchaseStatus::Idle;
                    state.tx_hash = None;
                    state.error = Some(err.to_string());
                });
                return Err(err);
            }
        };

        self.state.send_modify(|state| {
            state.status = PurchaseStatus::Submitted;
            state.tx_hash = Some(hash);
            state.error = None;
        });
        info!(%hash, %buyer, wei = %wei, "purchase submitted");

        let flow = self.clone();
        let tracker = tokio::spawn(async move { flow.track(hash, buyer, wei).await });
        *self.tracker.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(tracker);
        Ok(hash)
    }

    /// Waits for confirmation tracking of the last submission to end.
    pub async fn join_tracking(&self) {
        let tracker = self
            .tracker
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        let Some(tracker) = tracker else {
            return;
        };
        if let Err(err) = tracker.await {
            warn!("purchase tracking ended abnormally: {}", err);
        }
    }

    async fn track(self: Arc<Self>, hash: TxHash, buyer: Address, wei: U256) {
        self.update_for(hash, |state| state.status = PurchaseStatus::Confirming);

        let Some(receipt) = self.await_receipt(hash).await else {
            debug!(%hash, "stopped waiting for purchase confirmation");
            return;
        };

        if receipt.success {
            info!(%hash, block = ?receipt.block_number, "purchase confirmed");
            self.update_for(hash, |state| {
                state.status = PurchaseStatus::Succeeded;
                state.error = None;
            });
            return;
        }

        let reason = self
            .ico
            .purchase_revert_reason(buyer, wei, receipt.block_number)
            .await;
        let err = DappError::ExecutionReverted { reason };
        warn!(%hash, "purchase reverted: {}", err);
        self.update_for(hash, |state| {
            state.status = PurchaseStatus::Failed;
            state.error = Some(err.to_string());
        });
    }

    async fn await_receipt(&self, hash: TxHash) -> Option<TxReceipt> {
        let mut ticker = tokio::time::interval(self.confirmation_poll);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return None,
                _ = ticker.tick() => {}
            }
            match self.rpc.transaction_receipt(hash).await {
                Ok(Some(receipt)) => return Some(receipt),
                Ok(None) => {}
                Err(err) => warn!(%hash, "receipt poll failed: {}", err),
            }
        }
    }

    fn update_for(&self, hash: TxHash, apply: impl FnOnce(&mut PurchaseState)) {
        self.state.send_if_modified(|state| {
            if state.tx_hash != Some(hash) {
                return false;
            }
            apply(state);
            true
        });
    }

    /// Clears a finished purchase. Rejected while one is pending.
    pub fn reset(&self) -> Result<(), DappError> {
        if self.state.borrow().status.is_in_flight() || self.submitting.load(Ordering::SeqCst) {
            return Err(DappError::PurchaseInProgress);
        }
        self.state.send_replace(PurchaseState::default());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{BUYER, ether, seeded_chain, wallet_on};
    use alloy_sol_types::{SolCall, SolValue};
    use sd_chain_client::{ChainError, InMemoryChain, InMemoryWallet, TxOutcome};
    use sd_contracts::{IShadowIco, SHADOW_ICO_ADDRESS, SHADOW_TOKEN_ADDRESS};

    struct Harness {
        chain: Arc<InMemoryChain>,
        wallet: Arc<InMemoryWallet>,
        session: Arc<WalletSession>,
        flow: Arc<PurchaseFlow>,
    }

    async fn harness(connected: bool) -> Harness {
        let chain = seeded_chain();
        let wallet = wallet_on(&chain);
        let session = Arc::new(WalletSession::new(wallet.clone()));
        if connected {
            session.connect().await.unwrap();
        }
        let reader = Arc::new(ContractReader::new(
            SHADOW_TOKEN_ADDRESS,
            SHADOW_ICO_ADDRESS,
            chain.clone(),
            session.subscribe(),
        ));
        reader.refresh(Field::SaleRate).await;
        let flow = Arc::new(
            PurchaseFlow::new(
                SHADOW_ICO_ADDRESS,
                chain.clone(),
                session.clone(),
                reader,
                CancellationToken::new(),
            )
            .with_confirmation_poll(Duration::from_millis(100)),
        );
        Harness {
            chain,
            wallet,
            session,
            flow,
        }
    }

    async fn settle(flow: &PurchaseFlow) -> PurchaseState {
        let mut states = flow.subscribe();
        let settled = states.wait_for(|state| state.status.is_terminal()).await.unwrap();
        settled.clone()
    }

    #[tokio::test]
    async fn estimate_follows_input_and_rate() {
        let h = harness(true).await;
        h.flow.set_amount("2").unwrap();
        assert_eq!(h.flow.estimate_tokens(), Some(ether(2000)));

        h.chain.set_call(
            SHADOW_ICO_ADDRESS,
            IShadowIco::rateCall::SELECTOR,
            U256::from(1500u64).abi_encode(),
        );
        h.flow.reader.refresh(Field::SaleRate).await;
        assert_eq!(h.flow.estimate_tokens(), Some(ether(3000)));

        h.flow.set_amount("0.5").unwrap();
        assert_eq!(h.flow.estimate_tokens(), Some(ether(750)));
    }

    #[tokio::test]
    async fn amount_estimate_uses_sale_rate() {
        let h = harness(true).await;
        let state = h.flow.set_amount("2.5").unwrap();

        assert_eq!(state.status, PurchaseStatus::Ready);
        assert!(state.can_submit());
        assert_eq!(state.parsed_wei, Some(U256::from(2_500_000_000_000_000_000u128)));
        assert_eq!(h.flow.estimate_tokens(), Some(ether(2500)));
    }

    #[tokio::test]
    async fn zero_and_malformed_amounts_disable_submission() {
        let h = harness(true).await;

        for input in ["0", "", "abc", "-1", "0.0000000000000000001"] {
            let state = h.flow.set_amount(input).unwrap();
            assert_eq!(state.status, PurchaseStatus::Idle, "input {input:?}");
            assert!(!state.can_submit());
            assert!(state.error.is_some());
        }

        assert!(matches!(h.flow.submit().await, Err(DappError::InvalidAmount(_))));
        assert_eq!(h.wallet.sent_count(), 0);
        assert!(h.chain.transactions().is_empty());
    }

    #[tokio::test]
    async fn submit_requires_a_session() {
        let h = harness(false).await;
        h.flow.set_amount("1").unwrap();

        assert_eq!(h.flow.submit().await, Err(DappError::NotConnected));
        assert_eq!(h.wallet.sent_count(), 0);
    }

    #[tokio::test]
    async fn rejected_prompt_returns_to_idle_without_hash() {
        let h = harness(true).await;
        h.flow.set_amount("1").unwrap();
        h.wallet.set_rejecting(true);

        assert_eq!(h.flow.submit().await, Err(DappError::UserRejected));
        let state = h.flow.state();
        assert_eq!(state.status, PurchaseStatus::Idle);
        assert_eq!(state.tx_hash, None);
        assert!(state.can_submit());
        assert!(h.chain.transactions().is_empty());
    }

    #[tokio::test]
    async fn successful_purchase_reaches_succeeded() {
        let h = harness(true).await;
        h.flow.set_amount("1").unwrap();

        let hash = h.flow.submit().await.unwrap();
        let submitted = h.flow.state();
        assert_eq!(submitted.status, PurchaseStatus::Submitted);
        assert_eq!(submitted.tx_hash, Some(hash));

        let done = settle(&h.flow).await;
        assert_eq!(done.status, PurchaseStatus::Succeeded);
        assert_eq!(done.tx_hash, Some(hash));

        let sent = h.chain.transactions();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].from, BUYER);
        assert_eq!(sent[0].value, ether(1));

        h.flow.reset().unwrap();
        assert_eq!(h.flow.state(), PurchaseState::default());
    }

    #[tokio::test]
    async fn reverted_purchase_reports_reason() {
        let h = harness(true).await;
        h.chain.set_next_outcome(TxOutcome::Reverted);
        h.chain.set_call_error(
            SHADOW_ICO_ADDRESS,
            IShadowIco::buyTokensCall::SELECTOR,
            ChainError::ExecutionReverted {
                reason: Some("ICO has ended".to_owned()),
            },
        );
        h.flow.set_amount("1").unwrap();

        h.flow.submit().await.unwrap();
        let done = settle(&h.flow).await;
        assert_eq!(done.status, PurchaseStatus::Failed);
        assert_eq!(done.error.as_deref(), Some("transaction failed: ICO has ended"));
        assert!(done.tx_hash.is_some());
    }

    #[tokio::test]
    async fn pending_purchase_blocks_new_input() {
        let h = harness(true).await;
        h.chain.set_next_outcome(TxOutcome::Pending);
        h.flow.set_amount("1").unwrap();
        let hash = h.flow.submit().await.unwrap();

        assert_eq!(h.flow.set_amount("2"), Err(DappError::PurchaseInProgress));
        assert_eq!(h.flow.submit().await, Err(DappError::PurchaseInProgress));
        assert_eq!(h.flow.reset(), Err(DappError::PurchaseInProgress));
        assert_eq!(h.wallet.sent_count(), 1);

        h.chain.confirm(hash, true);
        assert_eq!(settle(&h.flow).await.status, PurchaseStatus::Succeeded);

        // Outcome must be dismissed before the next purchase.
        assert_eq!(h.flow.set_amount("2"), Err(DappError::PurchaseInProgress));
        h.flow.reset().unwrap();
        assert!(h.flow.set_amount("2").unwrap().can_submit());
        assert!(h.session.current().connected);
    }
}
