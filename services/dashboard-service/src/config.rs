use alloy_primitives::Address;
use anyhow::{Context, Result, ensure};
use sd_contracts::{
    SCROLL_SEPOLIA_CHAIN_ID, SCROLL_SEPOLIA_NAME, SCROLL_SEPOLIA_RPC_URL, SHADOW_ICO_ADDRESS,
    SHADOW_TOKEN_ADDRESS,
};
use sd_dashboard_core::DashboardSettings;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ServiceConfig {
    pub(crate) rpc_url: String,
    pub(crate) wallet_url: Option<String>,
    pub(crate) token_address: Address,
    pub(crate) ico_address: Address,
    pub(crate) chain_id: u64,
    pub(crate) bind_addr: SocketAddr,
    pub(crate) poll_interval: Duration,
    pub(crate) rpc_timeout: Duration,
}

impl ServiceConfig {
    pub(crate) fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str| lookup(key).map(|raw| raw.trim().to_owned()).filter(|raw| !raw.is_empty());

        Ok(Self {
            rpc_url: var("SHADOW_RPC_URL").unwrap_or_else(|| SCROLL_SEPOLIA_RPC_URL.to_owned()),
            wallet_url: var("SHADOW_WALLET_URL"),
            token_address: parse_or(var("SHADOW_TOKEN_ADDRESS"), "SHADOW_TOKEN_ADDRESS", SHADOW_TOKEN_ADDRESS)?,
            ico_address: parse_or(var("SHADOW_ICO_ADDRESS"), "SHADOW_ICO_ADDRESS", SHADOW_ICO_ADDRESS)?,
            chain_id: parse_or(var("SHADOW_CHAIN_ID"), "SHADOW_CHAIN_ID", SCROLL_SEPOLIA_CHAIN_ID)?,
            bind_addr: parse_or(
                var("SHADOW_BIND_ADDR"),
                "SHADOW_BIND_ADDR",
                SocketAddr::from(([0, 0, 0, 0], 8080)),
            )?,
            poll_interval: parse_millis(var("SHADOW_POLL_INTERVAL_MS"), "SHADOW_POLL_INTERVAL_MS", 4_000)?,
            rpc_timeout: parse_millis(var("SHADOW_RPC_TIMEOUT_MS"), "SHADOW_RPC_TIMEOUT_MS", 15_000)?,
        })
    }

    pub(crate) fn network_name(&self) -> String {
        if self.chain_id == SCROLL_SEPOLIA_CHAIN_ID {
            SCROLL_SEPOLIA_NAME.to_owned()
        } else {
            format!("chain {}", self.chain_id)
        }
    }

    pub(crate) fn dashboard_settings(&self) -> DashboardSettings {
        DashboardSettings {
            network_name: self.network_name(),
            chain_id: self.chain_id,
            token_address: self.token_address,
            ico_address: self.ico_address,
            event_poll_interval: self.poll_interval,
            confirmation_poll_interval: self.poll_interval,
        }
    }
}

fn parse_or<T>(raw: Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match raw {
        Some(raw) => raw.parse().with_context(|| format!("invalid {key}: {raw:?}")),
        None => Ok(default),
    }
}

/// Millisecond durations must be positive: a zero period would stall the
/// pollers and a zero timeout would fail every request.
fn parse_millis(raw: Option<String>, key: &str, default: u64) -> Result<Duration> {
    let millis: u64 = parse_or(raw, key, default)?;
    ensure!(millis > 0, "invalid {key}: must be greater than zero");
    Ok(Duration::from_millis(millis))
}
