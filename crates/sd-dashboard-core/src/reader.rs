//! Cached, policy-driven contract reads.
//!
//! Each [`Field`] lives in its own slot with a freshness policy. Every refresh
//! takes a ticket from the slot; a completion is applied only when its ticket
//! is still the newest one issued, so a slow response can never overwrite a
//! newer value. Failed refreshes keep the previous value.

use alloy_primitives::{Address, U256};
use sd_api_types::Session;
use sd_chain_client::{ChainError, RpcClient};
use sd_contracts::{ShadowIco, ShadowToken};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    TokenName,
    TokenSymbol,
    TotalSupply,
    SaleRate,
    Owner,
    CallerBalance,
}

impl Field {
    pub const ALL: [Field; 6] = [
        Field::TokenName,
        Field::TokenSymbol,
        Field::TotalSupply,
        Field::SaleRate,
        Field::Owner,
        Field::CallerBalance,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Field::TokenName => "token_name",
            Field::TokenSymbol => "token_symbol",
            Field::TotalSupply => "total_supply",
            Field::SaleRate => "sale_rate",
            Field::Owner => "owner",
            Field::CallerBalance => "caller_balance",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldPolicy {
    /// How long a fetched value counts as fresh. `None` never goes stale.
    pub freshness: Option<Duration>,
    /// Unconditional refresh period while the reader runs.
    pub refresh_every: Option<Duration>,
    /// Disabled unless a wallet session is connected.
    pub requires_session: bool,
}

impl FieldPolicy {
    pub fn for_field(field: Field) -> Self {
        const MINUTE: Duration = Duration::from_secs(60);

        match field {
            Field::TokenName | Field::TokenSymbol => Self {
                freshness: None,
                refresh_every: None,
                requires_session: false,
            },
            Field::TotalSupply => Self {
                freshness: Some(Duration::from_secs(30)),
                refresh_every: Some(Duration::from_secs(10)),
                requires_session: false,
            },
            Field::SaleRate | Field::Owner => Self {
                freshness: Some(5 * MINUTE),
                refresh_every: None,
                requires_session: false,
            },
            Field::CallerBalance => Self {
                freshness: Some(Duration::from_secs(10)),
                refresh_every: Some(Duration::from_secs(5)),
                requires_session: true,
            },
        }
    }

    /// How often the background driver looks at the field, if at all.
    fn cadence(&self) -> Option<Duration> {
        self.refresh_every.or(self.freshness)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Text(String),
    Amount(U256),
    Account(Address),
}

impl FieldValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_amount(&self) -> Option<U256> {
        match self {
            FieldValue::Amount(amount) => Some(*amount),
            _ => None,
        }
    }

    pub fn as_account(&self) -> Option<Address> {
        match self {
            FieldValue::Account(account) => Some(*account),
            _ => None,
        }
    }
}

/// What a renderer sees for one field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldRead {
    pub value: Option<FieldValue>,
    pub is_loading: bool,
    pub enabled: bool,
    pub fetched_at: Option<Instant>,
}

impl FieldRead {
    fn disabled() -> Self {
        Self {
            value: None,
            is_loading: false,
            enabled: false,
            fetched_at: None,
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Settled {
    Applied,
    Failed,
    Superseded,
}

#[derive(Debug, Default)]
struct FieldSlot {
    value: Option<FieldValue>,
    fetched_at: Option<Instant>,
    issued: u64,
    in_flight: bool,
    /// Account the cached value belongs to, for session-scoped fields.
    scope: Option<Address>,
}

impl FieldSlot {
    fn begin(&mut self) -> u64 {
        self.issued += 1;
        self.in_flight = true;
        self.issued
    }

    fn settle(&mut self, ticket: u64, result: Result<FieldValue, ChainError>, now: Instant) -> Settled {
        if ticket != self.issued {
            return Settled::Superseded;
        }
        self.in_flight = false;
        match result {
            Ok(value) => {
                self.value = Some(value);
                self.fetched_at = Some(now);
                Settled::Applied
            }
            Err(_) => Settled::Failed,
        }
    }

    /// Forgets the cached value and orphans any in-flight request.
    fn rescope(&mut self, scope: Option<Address>) {
        *self = FieldSlot {
            issued: self.issued + 1,
            scope,
            ..FieldSlot::default()
        };
    }

    fn is_stale(&self, policy: &FieldPolicy, now: Instant) -> bool {
        match self.fetched_at {
            None => true,
            Some(at) => policy
                .freshness
                .is_some_and(|window| now.duration_since(at) >= window),
        }
    }

    fn snapshot(&self) -> FieldRead {
        FieldRead {
            value: self.value.clone(),
            is_loading: self.in_flight,
            enabled: true,
            fetched_at: self.fetched_at,
        }
    }
}

/// Releases a slot whose refresh was dropped before it settled, so later
/// reads do not wait on a request that will never complete.
struct InFlightGuard<'a> {
    reader: &'a ContractReader,
    field: Field,
    ticket: u64,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        let released = {
            let mut slots = self.reader.slots();
            match slots.get_mut(&self.field) {
                Some(slot) if slot.issued == self.ticket && slot.in_flight => {
                    slot.in_flight = false;
                    true
                }
                _ => false,
            }
        };
        if released {
            debug!(field = self.field.as_str(), ticket = self.ticket, "abandoned read released");
            self.reader.notify();
        }
    }
}

pub struct ContractReader {
    token: ShadowToken,
    ico: ShadowIco,
    session: watch::Receiver<Session>,
    policies: HashMap<Field, FieldPolicy>,
    slots: Mutex<HashMap<Field, FieldSlot>>,
    changes: watch::Sender<u64>,
    retry_delay: Duration,
}

impl ContractReader {
    pub fn new(
        token_address: Address,
        ico_address: Address,
        rpc: Arc<dyn RpcClient>,
        session: watch::Receiver<Session>,
    ) -> Self {
        let (changes, _) = watch::channel(0);
        Self {
            token: ShadowToken::new(token_address, rpc.clone()),
            ico: ShadowIco::new(ico_address, rpc),
            session,
            policies: Field::ALL
                .iter()
                .map(|&field| (field, FieldPolicy::for_field(field)))
                .collect(),
            slots: Mutex::new(HashMap::new()),
            changes,
            retry_delay: Duration::from_secs(2),
        }
    }

    pub fn with_policy(mut self, field: Field, policy: FieldPolicy) -> Self {
        self.policies.insert(field, policy);
        self
    }

    /// Delay between attempts for fields fetched once.
    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    pub fn policy(&self, field: Field) -> FieldPolicy {
        self.policies
            .get(&field)
            .copied()
            .unwrap_or_else(|| FieldPolicy::for_field(field))
    }

    /// Ticks whenever any field's visible state changes.
    pub fn changes(&self) -> watch::Receiver<u64> {
        self.changes.subscribe()
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<Field, FieldSlot>> {
        self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn notify(&self) {
        self.changes.send_modify(|version| *version = version.wrapping_add(1));
    }

    /// Account a field is scoped to, or `Err(())` when the field is disabled.
    fn scope_for(&self, policy: &FieldPolicy) -> Result<Option<Address>, ()> {
        if !policy.requires_session {
            return Ok(None);
        }
        match self.session.borrow().active_address() {
            Some(address) => Ok(Some(address)),
            None => Err(()),
        }
    }

    /// Current cached state, without touching the network.
    pub fn read(&self, field: Field) -> FieldRead {
        let policy = self.policy(field);
        let Ok(scope) = self.scope_for(&policy) else {
            return FieldRead::disabled();
        };

        let slots = self.slots();
        match slots.get(&field) {
            Some(slot) if slot.scope == scope => slot.snapshot(),
            // Nothing fetched yet for this field, or only for another account.
            _ => FieldRead {
                value: None,
                is_loading: false,
                enabled: true,
                fetched_at: None,
            },
        }
    }

    /// Fetches the field now and returns its value afterwards, which is the
    /// previous value when the fetch failed or was superseded.
    pub async fn refresh(&self, field: Field) -> Option<FieldValue> {
        let policy = self.policy(field);
        let scope = self.scope_for(&policy).ok()?;

        let ticket = {
            let mut slots = self.slots();
            let slot = slots.entry(field).or_default();
            if slot.scope != scope {
                slot.rescope(scope);
            }
            slot.begin()
        };
        self.notify();

        let _guard = InFlightGuard {
            reader: self,
            field,
            ticket,
        };
        let result = self.fetch(field, scope).await;
        if let Err(err) = &result {
            warn!(field = field.as_str(), "contract read failed, keeping cached value: {}", err);
        }

        let (settled, value) = {
            let mut slots = self.slots();
            let slot = slots.entry(field).or_default();
            let settled = slot.settle(ticket, result, Instant::now());
            let value = (slot.scope == scope).then(|| slot.value.clone()).flatten();
            (settled, value)
        };
        match settled {
            Settled::Superseded => debug!(field = field.as_str(), ticket, "discarding superseded read"),
            Settled::Applied | Settled::Failed => self.notify(),
        }
        value
    }

    /// Refreshes the field only when it is stale, then reads it.
    pub async fn ensure_fresh(&self, field: Field) -> FieldRead {
        let policy = self.policy(field);
        let Ok(scope) = self.scope_for(&policy) else {
            return FieldRead::disabled();
        };

        let needs_fetch = {
            let slots = self.slots();
            match slots.get(&field) {
                Some(slot) if slot.scope == scope => {
                    !slot.in_flight && slot.is_stale(&policy, Instant::now())
                }
                _ => true,
            }
        };
        if needs_fetch {
            self.refresh(field).await;
        }
        self.read(field)
    }

    async fn fetch(&self, field: Field, scope: Option<Address>) -> Result<FieldValue, ChainError> {
        match field {
            Field::TokenName => self.token.name().await.map(FieldValue::Text),
            Field::TokenSymbol => self.token.symbol().await.map(FieldValue::Text),
            Field::TotalSupply => self.token.total_supply().await.map(FieldValue::Amount),
            Field::SaleRate => self.ico.rate().await.map(FieldValue::Amount),
            Field::Owner => self.ico.owner().await.map(FieldValue::Account),
            Field::CallerBalance => {
                let Some(account) = scope else {
                    return Err(ChainError::Transport("balance read without an account".to_owned()));
                };
                self.token.balance_of(account).await.map(FieldValue::Amount)
            }
        }
    }

    /// Starts one driver per field plus a session follower. Every task stops
    /// when `cancel` fires; reads still in flight at that point are dropped.
    pub fn spawn(self: &Arc<Self>, cancel: &CancellationToken) -> Vec<JoinHandle<()>> {
        let mut tasks: Vec<JoinHandle<()>> = Field::ALL
            .iter()
            .map(|&field| tokio::spawn(self.clone().drive(field, cancel.clone())))
            .collect();
        tasks.push(tokio::spawn(self.clone().follow_session(cancel.clone())));
        tasks
    }

    async fn drive(self: Arc<Self>, field: Field, cancel: CancellationToken) {
        let policy = self.policy(field);
        match policy.cadence() {
            None => self.fetch_once(field, &cancel).await,
            Some(period) => self.poll(field, policy, period, &cancel).await,
        }
        debug!(field = field.as_str(), "field driver stopped");
    }

    async fn fetch_once(&self, field: Field, cancel: &CancellationToken) {
        loop {
            let value = tokio::select! {
                _ = cancel.cancelled() => return,
                value = self.refresh(field) => value,
            };
            if value.is_some() {
                return;
            }
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(self.retry_delay) => {}
            }
        }
    }

    async fn poll(&self, field: Field, policy: FieldPolicy, period: Duration, cancel: &CancellationToken) {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = ticker.tick() => {}
            }
            if self.scope_for(&policy).is_err() {
                continue;
            }

            if policy.refresh_every.is_some() {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = self.refresh(field) => {}
                }
            } else {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = self.ensure_fresh(field) => {}
                }
            }
        }
    }

    /// Drops session-scoped values when the account changes and fetches
    /// them for the new account right away.
    async fn follow_session(self: Arc<Self>, cancel: CancellationToken) {
        let mut session = self.session.clone();
        let scoped: Vec<Field> = Field::ALL
            .into_iter()
            .filter(|&field| self.policy(field).requires_session)
            .collect();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                changed = session.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
            let address = session.borrow_and_update().active_address();

            let rescoped = {
                let mut slots = self.slots();
                let mut rescoped = false;
                for field in &scoped {
                    let slot = slots.entry(*field).or_default();
                    if slot.scope != address {
                        slot.rescope(address);
                        rescoped = true;
                    }
                }
                rescoped
            };
            if !rescoped {
                continue;
            }
            self.notify();

            if address.is_some() {
                for field in &scoped {
                    tokio::select! {
                        _ = cancel.cancelled() => return,
                        _ = self.refresh(*field) => {}
                    }
                }
            }
        }
        debug!("session follower stopped");
    }
}
