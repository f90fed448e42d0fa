//! Bindings for the Shadow token and its ICO sale contract.
//!
//! The ABI surface is declared with `sol!`; [`ShadowToken`] and [`ShadowIco`]
//! wrap it over an [`RpcClient`] so callers deal in typed values only.

use alloy_primitives::{Address, TxHash, U256, address};
use alloy_sol_types::{SolCall, sol};
use sd_chain_client::{CallRequest, ChainError, RpcClient, SendTxRequest, WalletProvider};
use std::sync::Arc;

pub mod events;
pub mod units;

pub const SCROLL_SEPOLIA_CHAIN_ID: u64 = 534351;
pub const SCROLL_SEPOLIA_NAME: &str = "Scroll Sepolia";
pub const SCROLL_SEPOLIA_RPC_URL: &str = "https://sepolia-rpc.scroll.io";

pub const SHADOW_TOKEN_ADDRESS: Address = address!("D2Ce9C0B385fB2f8b0F1254933142dDd36a4f99f");
pub const SHADOW_ICO_ADDRESS: Address = address!("8B2Af207A99Aa28bc37c8834c40B432AE01d654C");

/// Both ETH and SHDW use 18 decimals.
pub const TOKEN_DECIMALS: u8 = 18;

sol! {
    /// ERC-20 view surface of the Shadow token.
    #[derive(Debug, PartialEq, Eq)]
    interface IShadow {
        function name() external view returns (string memory);
        function symbol() external view returns (string memory);
        function totalSupply() external view returns (uint256);
        function balanceOf(address account) external view returns (uint256);
    }

    /// Fixed-rate sale contract minting SHDW for ETH.
    #[derive(Debug, PartialEq, Eq)]
    interface IShadowIco {
        event TokensPurchased(address indexed buyer, uint256 ethAmount, uint256 tokenAmount);
        event ETHWithdrawn(address indexed owner, uint256 amount);

        function rate() external view returns (uint256);
        function owner() external view returns (address);
        function buyTokens() external payable;
    }
}

async fn read<C: SolCall>(rpc: &dyn RpcClient, to: Address, call: C) -> Result<C::Return, ChainError> {
    let output = rpc.call(CallRequest::new(to, call.abi_encode())).await?;
    C::abi_decode_returns(&output)
        .map_err(|err| ChainError::Decode(format!("{}: {err}", C::SIGNATURE)))
}

#[derive(Clone)]
pub struct ShadowToken {
    address: Address,
    rpc: Arc<dyn RpcClient>,
}

impl ShadowToken {
    pub fn new(address: Address, rpc: Arc<dyn RpcClient>) -> Self {
        Self { address, rpc }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub async fn name(&self) -> Result<String, ChainError> {
        read(self.rpc.as_ref(), self.address, IShadow::nameCall {}).await
    }

    pub async fn symbol(&self) -> Result<String, ChainError> {
        read(self.rpc.as_ref(), self.address, IShadow::symbolCall {}).await
    }

    pub async fn total_supply(&self) -> Result<U256, ChainError> {
        read(self.rpc.as_ref(), self.address, IShadow::totalSupplyCall {}).await
    }

    pub async fn balance_of(&self, account: Address) -> Result<U256, ChainError> {
        read(self.rpc.as_ref(), self.address, IShadow::balanceOfCall { account }).await
    }
}

#[derive(Clone)]
pub struct ShadowIco {
    address: Address,
    rpc: Arc<dyn RpcClient>,
}

impl ShadowIco {
    pub fn new(address: Address, rpc: Arc<dyn RpcClient>) -> Self {
        Self { address, rpc }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    /// Tokens minted per whole ETH.
    pub async fn rate(&self) -> Result<U256, ChainError> {
        read(self.rpc.as_ref(), self.address, IShadowIco::rateCall {}).await
    }

    pub async fn owner(&self) -> Result<Address, ChainError> {
        read(self.rpc.as_ref(), self.address, IShadowIco::ownerCall {}).await
    }

    pub fn buy_tokens_request(&self, buyer: Address, value: U256) -> SendTxRequest {
        SendTxRequest {
            from: buyer,
            to: self.address,
            value,
            data: IShadowIco::buyTokensCall {}.abi_encode().into(),
        }
    }

    /// Sends `buyTokens()` through the wallet, paying `value` wei.
    pub async fn buy_tokens(
        &self,
        wallet: &dyn WalletProvider,
        buyer: Address,
        value: U256,
    ) -> Result<TxHash, ChainError> {
        wallet
            .send_transaction(self.buy_tokens_request(buyer, value))
            .await
    }

    /// Replays a purchase at `block` to recover why it reverted.
    pub async fn purchase_revert_reason(
        &self,
        buyer: Address,
        value: U256,
        block: Option<u64>,
    ) -> Option<String> {
        let mut req = CallRequest::new(self.address, IShadowIco::buyTokensCall {}.abi_encode())
            .with_from(buyer)
            .with_value(value);
        if let Some(block) = block {
            req = req.at_block(block);
        }

        match self.rpc.call(req).await {
            Err(ChainError::ExecutionReverted { reason }) => reason,
            _ => None,
        }
    }
}
