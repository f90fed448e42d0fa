//! Live sale activity.
//!
//! Two watchers follow `TokensPurchased` and `ETHWithdrawn` on the sale
//! contract and prepend what they see to a bounded, newest-first log.

use alloy_primitives::{Address, U256};
use sd_api_types::{LogKind, TransactionLogEntry};
use sd_chain_client::RpcClient;
use sd_contracts::IShadowIco::{ETHWithdrawn, TokensPurchased};
use sd_contracts::events::{DecodedLog, watch_event};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::format::epoch_ms;

pub const LOG_CAPACITY: usize = 10;

#[derive(Debug, Clone)]
pub struct TransactionLog {
    entries: VecDeque<TransactionLogEntry>,
    capacity: usize,
}

impl Default for TransactionLog {
    fn default() -> Self {
        Self::with_capacity(LOG_CAPACITY)
    }
}

impl TransactionLog {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity + 1),
            capacity,
        }
    }

    /// Prepends `entry`, evicting the oldest entry beyond capacity.
    pub fn push(&mut self, entry: TransactionLogEntry) {
        self.entries.push_front(entry);
        self.entries.truncate(self.capacity);
    }

    pub fn entries(&self) -> Vec<TransactionLogEntry> {
        self.entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn purchase_entry(log: &DecodedLog<TokensPurchased>, observed_at_epoch_ms: u128) -> Option<TransactionLogEntry> {
    Some(TransactionLogEntry {
        id: log.transaction_hash?,
        kind: LogKind::Purchase,
        actor: log.event.buyer,
        eth_amount: log.event.ethAmount,
        token_amount: log.event.tokenAmount,
        observed_at_epoch_ms,
    })
}

fn withdrawal_entry(log: &DecodedLog<ETHWithdrawn>, observed_at_epoch_ms: u128) -> Option<TransactionLogEntry> {
    Some(TransactionLogEntry {
        id: log.transaction_hash?,
        kind: LogKind::Withdrawal,
        actor: log.event.owner,
        eth_amount: log.event.amount,
        token_amount: U256::ZERO,
        observed_at_epoch_ms,
    })
}

pub struct EventFeed {
    rpc: Arc<dyn RpcClient>,
    ico_address: Address,
    poll_interval: Duration,
    log: Mutex<TransactionLog>,
    changes: watch::Sender<u64>,
}

impl EventFeed {
    pub fn new(rpc: Arc<dyn RpcClient>, ico_address: Address, poll_interval: Duration) -> Self {
        let (changes, _) = watch::channel(0);
        Self {
            rpc,
            ico_address,
            poll_interval,
            log: Mutex::new(TransactionLog::default()),
            changes,
        }
    }

    fn log(&self) -> MutexGuard<'_, TransactionLog> {
        self.log.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Newest first.
    pub fn entries(&self) -> Vec<TransactionLogEntry> {
        self.log().entries()
    }

    pub fn changes(&self) -> watch::Receiver<u64> {
        self.changes.subscribe()
    }

    fn record<E>(
        &self,
        batch: Vec<DecodedLog<E>>,
        to_entry: fn(&DecodedLog<E>, u128) -> Option<TransactionLogEntry>,
    ) {
        let observed_at = epoch_ms();
        let mut added = 0;
        {
            let mut log = self.log();
            for decoded in &batch {
                match to_entry(decoded, observed_at) {
                    Some(entry) => {
                        log.push(entry);
                        added += 1;
                    }
                    None => warn!(block = ?decoded.block_number, "skipping log without a transaction hash"),
                }
            }
        }
        if added > 0 {
            debug!(added, "activity log updated");
            self.changes.send_modify(|version| *version = version.wrapping_add(1));
        }
    }

    pub fn record_purchases(&self, batch: Vec<DecodedLog<TokensPurchased>>) {
        self.record(batch, purchase_entry);
    }

    pub fn record_withdrawals(&self, batch: Vec<DecodedLog<ETHWithdrawn>>) {
        self.record(batch, withdrawal_entry);
    }

    /// Starts both watchers. They run until the returned subscription is
    /// dropped or shut down, or `parent` is cancelled.
    pub async fn subscribe(self: &Arc<Self>, parent: &CancellationToken) -> FeedSubscription {
        let id = Uuid::new_v4();
        let cancel = parent.child_token();

        let feed = self.clone();
        let purchases = watch_event::<TokensPurchased, _>(
            self.rpc.clone(),
            self.ico_address,
            self.poll_interval,
            cancel.clone(),
            move |batch| feed.record_purchases(batch),
        )
        .await;

        let feed = self.clone();
        let withdrawals = watch_event::<ETHWithdrawn, _>(
            self.rpc.clone(),
            self.ico_address,
            self.poll_interval,
            cancel.clone(),
            move |batch| feed.record_withdrawals(batch),
        )
        .await;

        info!(subscription = %id, ico = %self.ico_address, "watching sale events");
        FeedSubscription {
            id,
            cancel,
            tasks: vec![purchases, withdrawals],
        }
    }
}

/// Keeps the feed's watchers alive. Dropping it stops them.
pub struct FeedSubscription {
    id: Uuid,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl FeedSubscription {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Stops the watchers and waits for them to exit.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        for task in std::mem::take(&mut self.tasks) {
            if let Err(err) = task.await {
                warn!(subscription = %self.id, "event watcher ended abnormally: {}", err);
            }
        }
        debug!(subscription = %self.id, "feed subscription closed");
    }
}

impl Drop for FeedSubscription {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{relative_time, short_address};
    use crate::test_support::{BUYER, OWNER, ether};
    use alloy_sol_types::SolEvent;
    use sd_chain_client::InMemoryChain;
    use sd_contracts::SHADOW_ICO_ADDRESS;
    use sd_contracts::units::{format_ether, format_token_amount};

    fn purchase(chain: &InMemoryChain, buyer: Address, eth: U256, tokens: U256) {
        let event = TokensPurchased {
            buyer,
            ethAmount: eth,
            tokenAmount: tokens,
        };
        let data = event.encode_log_data();
        chain.push_log(SHADOW_ICO_ADDRESS, data.topics().to_vec(), data.data);
    }

    fn withdrawal(chain: &InMemoryChain, owner: Address, amount: U256) {
        let data = ETHWithdrawn { owner, amount }.encode_log_data();
        chain.push_log(SHADOW_ICO_ADDRESS, data.topics().to_vec(), data.data);
    }

    fn decoded(n: u8) -> DecodedLog<TokensPurchased> {
        DecodedLog {
            event: TokensPurchased {
                buyer: Address::repeat_byte(n),
                ethAmount: U256::from(n),
                tokenAmount: U256::from(n) * U256::from(1000u64),
            },
            transaction_hash: Some(alloy_primitives::B256::repeat_byte(n)),
            block_number: Some(u64::from(n)),
        }
    }

    #[test]
    fn log_keeps_ten_newest_first() {
        let feed = EventFeed::new(Arc::new(InMemoryChain::new(1)), SHADOW_ICO_ADDRESS, Duration::from_secs(4));
        for n in 1..=11 {
            feed.record_purchases(vec![decoded(n)]);
        }

        let entries = feed.entries();
        assert_eq!(entries.len(), LOG_CAPACITY);
        assert_eq!(entries[0].actor, Address::repeat_byte(11));
        assert_eq!(entries[9].actor, Address::repeat_byte(2));
    }

    #[test]
    fn logs_without_hash_are_skipped() {
        let feed = EventFeed::new(Arc::new(InMemoryChain::new(1)), SHADOW_ICO_ADDRESS, Duration::from_secs(4));
        let mut orphan = decoded(1);
        orphan.transaction_hash = None;
        let changes = feed.changes();

        feed.record_purchases(vec![orphan, decoded(2)]);
        let entries = feed.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].actor, Address::repeat_byte(2));
        assert!(changes.has_changed().unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn watchers_record_purchases_and_withdrawals() {
        let chain = Arc::new(InMemoryChain::new(1));
        let feed = Arc::new(EventFeed::new(chain.clone(), SHADOW_ICO_ADDRESS, Duration::from_secs(4)));
        let cancel = CancellationToken::new();
        let subscription = feed.subscribe(&cancel).await;

        purchase(&chain, BUYER, ether(1), ether(1000));
        withdrawal(&chain, OWNER, ether(3));
        tokio::time::sleep(Duration::from_secs(5)).await;

        let entries = feed.entries();
        assert_eq!(entries.len(), 2);
        let bought = entries.iter().find(|e| e.kind == LogKind::Purchase).unwrap();
        assert_eq!(short_address(&bought.actor), "0x1111...1111");
        assert_eq!(format_ether(bought.eth_amount), "1.0");
        assert_eq!(format_token_amount(bought.token_amount), "1000");
        assert_eq!(relative_time(bought.observed_at_epoch_ms, epoch_ms()), "Just now");

        let withdrawn = entries.iter().find(|e| e.kind == LogKind::Withdrawal).unwrap();
        assert_eq!(withdrawn.actor, OWNER);
        assert_eq!(withdrawn.eth_amount, ether(3));
        assert_eq!(withdrawn.token_amount, U256::ZERO);

        subscription.shutdown().await;
        purchase(&chain, BUYER, ether(2), ether(2000));
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(feed.entries().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_subscription_stops_watchers() {
        let chain = Arc::new(InMemoryChain::new(1));
        let feed = Arc::new(EventFeed::new(chain.clone(), SHADOW_ICO_ADDRESS, Duration::from_secs(4)));
        let subscription = feed.subscribe(&CancellationToken::new()).await;
        assert!(!subscription.id().is_nil());
        drop(subscription);

        purchase(&chain, BUYER, ether(1), ether(1000));
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(feed.entries().is_empty());
    }
}
