pub use alloy_primitives::{Address, TxHash, U256};
use serde::{Deserialize, Serialize};

/// Wallet connection state shared by every dashboard component.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Session {
    pub address: Option<Address>,
    pub connected: bool,
    pub chain_id: Option<u64>,
}

impl Session {
    pub fn connected(address: Address, chain_id: Option<u64>) -> Self {
        Self {
            address: Some(address),
            connected: true,
            chain_id,
        }
    }

    /// Address usable for account-scoped reads; `None` unless connected.
    pub fn active_address(&self) -> Option<Address> {
        if self.connected { self.address } else { None }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum LogKind {
    Purchase,
    Withdrawal,
}

/// One row of the recent-activity log. Never mutated after insertion.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TransactionLogEntry {
    pub id: TxHash,
    pub kind: LogKind,
    pub actor: Address,
    pub eth_amount: U256,
    pub token_amount: U256,
    pub observed_at_epoch_ms: u128,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PurchaseStatus {
    #[default]
    Idle,
    Validating,
    Ready,
    Submitted,
    Confirming,
    Succeeded,
    Failed,
}

impl PurchaseStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }

    pub fn is_in_flight(self) -> bool {
        matches!(self, Self::Submitted | Self::Confirming)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PurchaseState {
    pub amount_input: String,
    pub parsed_wei: Option<U256>,
    pub tx_hash: Option<TxHash>,
    pub status: PurchaseStatus,
    pub error: Option<String>,
}

impl PurchaseState {
    /// A valid amount is held and nothing is pending. A rejected wallet
    /// prompt leaves the flow idle with its amount intact, so retrying is
    /// allowed without editing the input.
    pub fn can_submit(&self) -> bool {
        self.parsed_wei.is_some()
            && matches!(self.status, PurchaseStatus::Idle | PurchaseStatus::Ready)
    }
}

// ── HTTP wire types ──────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionResponse {
    pub connected: bool,
    pub address: Option<String>,
    pub short_address: Option<String>,
    pub chain_id: Option<u64>,
    pub expected_chain_id: u64,
    pub wrong_network: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkResponse {
    pub network: String,
    pub chain_id: u64,
    pub token_address: String,
    pub ico_address: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FieldResponse {
    pub value: Option<String>,
    pub is_loading: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContractInfoResponse {
    pub token_address: String,
    pub ico_address: String,
    pub network: String,
    pub token_name: FieldResponse,
    pub token_symbol: FieldResponse,
    pub total_supply: FieldResponse,
    pub sale_rate: FieldResponse,
    pub owner: FieldResponse,
    /// Absent while no wallet is connected.
    pub balance: Option<FieldResponse>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PurchaseAmountRequest {
    pub amount: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PurchaseResponse {
    pub amount_input: String,
    pub status: PurchaseStatus,
    pub tx_hash: Option<String>,
    pub error: Option<String>,
    pub rate: Option<String>,
    pub estimated_tokens: Option<String>,
    pub can_submit: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionEntryResponse {
    pub id: String,
    pub kind: LogKind,
    pub actor: String,
    pub actor_short: String,
    pub eth_amount: String,
    pub token_amount: String,
    pub observed_at_epoch_ms: u128,
    pub observed: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionsResponse {
    pub transactions: Vec<TransactionEntryResponse>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disconnected_session_has_no_active_address() {
        let mut session = Session::connected(Address::repeat_byte(0x11), Some(534351));
        assert_eq!(session.active_address(), Some(Address::repeat_byte(0x11)));

        session.connected = false;
        assert_eq!(session.active_address(), None);
        assert_eq!(Session::default().active_address(), None);
    }

    #[test]
    fn only_succeeded_and_failed_are_terminal() {
        assert!(PurchaseStatus::Succeeded.is_terminal());
        assert!(PurchaseStatus::Failed.is_terminal());
        assert!(!PurchaseStatus::Confirming.is_terminal());
        assert!(PurchaseStatus::Submitted.is_in_flight());
        assert!(!PurchaseStatus::Ready.is_in_flight());
    }

    #[test]
    fn submit_needs_valid_amount_and_idle_flow() {
        let mut state = PurchaseState::default();
        assert!(!state.can_submit());

        state.parsed_wei = Some(U256::from(1u64));
        state.status = PurchaseStatus::Ready;
        assert!(state.can_submit());

        state.status = PurchaseStatus::Confirming;
        assert!(!state.can_submit());
    }

    #[test]
    fn purchase_status_serializes_snake_case() {
        let json = serde_json::to_string(&PurchaseStatus::Confirming).unwrap();
        assert_eq!(json, "\"confirming\"");
        let kind = serde_json::to_string(&LogKind::Withdrawal).unwrap();
        assert_eq!(kind, "\"withdrawal\"");
    }
}
