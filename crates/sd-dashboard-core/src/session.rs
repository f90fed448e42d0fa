//! Wallet session.
//!
//! The only component allowed to connect or disconnect the wallet. Everyone
//! else observes the [`Session`] through [`WalletSession::subscribe`] and
//! re-derives address-dependent state when it changes.

use sd_api_types::Session;
use sd_chain_client::{ProviderEvent, WalletProvider};
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::DappError;

pub struct WalletSession {
    provider: Arc<dyn WalletProvider>,
    state: watch::Sender<Session>,
}

impl WalletSession {
    pub fn new(provider: Arc<dyn WalletProvider>) -> Self {
        let (state, _) = watch::channel(Session::default());
        Self { provider, state }
    }

    pub fn current(&self) -> Session {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Session> {
        self.state.subscribe()
    }

    /// The wallet itself, for components that need it to sign.
    pub fn provider(&self) -> Arc<dyn WalletProvider> {
        self.provider.clone()
    }

    pub async fn connect(&self) -> Result<Session, DappError> {
        let accounts = self.provider.request_accounts().await.map_err(|err| {
            warn!(wallet = self.provider.name(), "wallet connection failed: {}", err);
            DappError::from(err)
        })?;
        let Some(address) = accounts.first().copied() else {
            return Err(DappError::UserRejected);
        };

        let chain_id = match self.provider.chain_id().await {
            Ok(chain_id) => Some(chain_id),
            Err(err) => {
                warn!("wallet did not report a chain id: {}", err);
                None
            }
        };

        let session = Session::connected(address, chain_id);
        self.state.send_replace(session.clone());
        info!(%address, ?chain_id, wallet = self.provider.name(), "wallet connected");
        Ok(session)
    }

    /// Clears the session. Safe to call when already disconnected.
    pub async fn disconnect(&self) {
        if let Err(err) = self.provider.disconnect().await {
            warn!("wallet disconnect failed, clearing session anyway: {}", err);
        }
        if self.clear() {
            info!("wallet disconnected");
        }
    }

    fn clear(&self) -> bool {
        self.state.send_if_modified(|session| {
            if *session == Session::default() {
                return false;
            }
            *session = Session::default();
            true
        })
    }

    pub fn apply_provider_event(&self, event: ProviderEvent) {
        match event {
            ProviderEvent::AccountsChanged(accounts) => match accounts.first().copied() {
                Some(address) => {
                    self.state.send_if_modified(|session| {
                        if !session.connected || session.address == Some(address) {
                            return false;
                        }
                        info!(%address, "active account changed");
                        session.address = Some(address);
                        true
                    });
                }
                None => {
                    if self.clear() {
                        info!("wallet removed all accounts");
                    }
                }
            },
            ProviderEvent::ChainChanged(chain_id) => {
                self.state.send_if_modified(|session| {
                    if !session.connected || session.chain_id == Some(chain_id) {
                        return false;
                    }
                    info!(chain_id, "wallet switched chain");
                    session.chain_id = Some(chain_id);
                    true
                });
            }
            ProviderEvent::Disconnected => {
                if self.clear() {
                    info!("wallet provider disconnected");
                }
            }
        }
    }

    /// Follows provider notifications until `cancel` fires.
    pub fn spawn_listener(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let session = self.clone();
        let mut events = self.provider.subscribe();

        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    _ = cancel.cancelled() => break,
                    event = events.recv() => event,
                };
                match event {
                    Ok(event) => session.apply_provider_event(event),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "missed wallet notifications");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            debug!("wallet listener stopped");
        })
    }
}
