use alloy_primitives::Address;
use sd_chain_client::{RpcClient, WalletProvider};
use sd_contracts::{
    SCROLL_SEPOLIA_CHAIN_ID, SCROLL_SEPOLIA_NAME, SHADOW_ICO_ADDRESS, SHADOW_TOKEN_ADDRESS,
};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::feed::{EventFeed, FeedSubscription};
use crate::purchase::PurchaseFlow;
use crate::reader::ContractReader;
use crate::session::WalletSession;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DashboardSettings {
    pub network_name: String,
    pub chain_id: u64,
    pub token_address: Address,
    pub ico_address: Address,
    pub event_poll_interval: Duration,
    pub confirmation_poll_interval: Duration,
}

impl Default for DashboardSettings {
    fn default() -> Self {
        Self {
            network_name: SCROLL_SEPOLIA_NAME.to_owned(),
            chain_id: SCROLL_SEPOLIA_CHAIN_ID,
            token_address: SHADOW_TOKEN_ADDRESS,
            ico_address: SHADOW_ICO_ADDRESS,
            event_poll_interval: Duration::from_secs(4),
            confirmation_poll_interval: Duration::from_secs(4),
        }
    }
}

#[derive(Default)]
struct Running {
    tasks: Vec<JoinHandle<()>>,
    subscription: Option<FeedSubscription>,
}

/// The whole page: session, reader, purchase flow and activity feed wired
/// to one node and one wallet, all stopped by a single token.
pub struct Dashboard {
    settings: DashboardSettings,
    session: Arc<WalletSession>,
    reader: Arc<ContractReader>,
    purchase: Arc<PurchaseFlow>,
    feed: Arc<EventFeed>,
    cancel: CancellationToken,
    running: Mutex<Option<Running>>,
}

impl Dashboard {
    pub fn new(settings: DashboardSettings, rpc: Arc<dyn RpcClient>, wallet: Arc<dyn WalletProvider>) -> Self {
        let cancel = CancellationToken::new();
        let session = Arc::new(WalletSession::new(wallet));
        let reader = Arc::new(ContractReader::new(
            settings.token_address,
            settings.ico_address,
            rpc.clone(),
            session.subscribe(),
        ));
        let purchase = Arc::new(
            PurchaseFlow::new(
                settings.ico_address,
                rpc.clone(),
                session.clone(),
                reader.clone(),
                cancel.child_token(),
            )
            .with_confirmation_poll(settings.confirmation_poll_interval),
        );
        let feed = Arc::new(EventFeed::new(rpc, settings.ico_address, settings.event_poll_interval));

        Self {
            settings,
            session,
            reader,
            purchase,
            feed,
            cancel,
            running: Mutex::new(None),
        }
    }

    pub fn settings(&self) -> &DashboardSettings {
        &self.settings
    }

    pub fn session(&self) -> &Arc<WalletSession> {
        &self.session
    }

    pub fn reader(&self) -> &Arc<ContractReader> {
        &self.reader
    }

    pub fn purchase(&self) -> &Arc<PurchaseFlow> {
        &self.purchase
    }

    pub fn feed(&self) -> &Arc<EventFeed> {
        &self.feed
    }

    /// Connected to a chain other than the configured one.
    pub fn wrong_network(&self) -> bool {
        let session = self.session.current();
        session.connected && session.chain_id.is_some_and(|id| id != self.settings.chain_id)
    }

    fn running(&self) -> MutexGuard<'_, Option<Running>> {
        self.running.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Launches background work. Calling it again is a no-op.
    pub async fn start(&self) {
        {
            let mut running = self.running();
            if running.is_some() || self.cancel.is_cancelled() {
                return;
            }
            *running = Some(Running::default());
        }

        let mut tasks = self.reader.spawn(&self.cancel);
        tasks.push(self.session.spawn_listener(self.cancel.child_token()));
        let subscription = self.feed.subscribe(&self.cancel).await;

        if let Some(running) = self.running().as_mut() {
            running.tasks = tasks;
            running.subscription = Some(subscription);
        }
        info!(
            network = %self.settings.network_name,
            chain_id = self.settings.chain_id,
            token = %self.settings.token_address,
            ico = %self.settings.ico_address,
            "dashboard started"
        );
    }

    /// Cancels every task, including purchase tracking, and waits for them.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        self.purchase.join_tracking().await;
        let Some(running) = self.running().take() else {
            return;
        };

        if let Some(subscription) = running.subscription {
            subscription.shutdown().await;
        }
        for task in running.tasks {
            if let Err(err) = task.await {
                warn!("dashboard task ended abnormally: {}", err);
            }
        }
        info!("dashboard stopped");
    }
}
