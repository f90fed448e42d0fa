use anyhow::Context;
use axum::{
    Json, Router,
    http::StatusCode,
    routing::{get, post, put},
};
use sd_chain_client::{NoWalletProvider, RpcClient, WalletProvider};
use sd_chain_jsonrpc::{JsonRpcClient, JsonRpcWallet};
use sd_dashboard_core::{Dashboard, DappError};
use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

mod activity;
mod config;
mod contract;
mod purchase;
mod wallet;

use config::ServiceConfig;

#[derive(Debug, Serialize)]
struct HealthResponse {
    service: &'static str,
    status: &'static str,
}

#[derive(Debug, Serialize)]
struct VersionResponse {
    service: &'static str,
    version: &'static str,
}

#[derive(Debug, Serialize)]
pub(crate) struct ErrorResponse {
    error: String,
}

pub(crate) type ApiResult<T> = Result<Json<T>, (StatusCode, Json<ErrorResponse>)>;

pub(crate) struct AppState {
    pub(crate) dashboard: Dashboard,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = ServiceConfig::from_env()?;
    let background = CancellationToken::new();

    let rpc: Arc<dyn RpcClient> = Arc::new(
        JsonRpcClient::new(Some(config.rpc_url.clone()), config.rpc_timeout)
            .context("failed to build RPC client")?,
    );

    let wallet: Arc<dyn WalletProvider> = match &config.wallet_url {
        Some(url) => {
            let wallet = Arc::new(
                JsonRpcWallet::new(url, config.rpc_timeout).context("failed to build wallet client")?,
            );
            wallet
                .clone()
                .spawn_watcher(config.poll_interval, background.clone());
            info!("using wallet endpoint {}", wallet.endpoint());
            wallet
        }
        None => {
            warn!("SHADOW_WALLET_URL not set; wallet connection is unavailable");
            Arc::new(NoWalletProvider::default())
        }
    };

    let state = Arc::new(AppState {
        dashboard: Dashboard::new(config.dashboard_settings(), rpc, wallet),
    });
    state.dashboard.start().await;

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;
    info!("dashboard-service listening on {}", config.bind_addr);

    axum::serve(listener, router(state.clone()))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    background.cancel();
    state.dashboard.shutdown().await;
    Ok(())
}

pub(crate) fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/version", get(version))
        .route("/network", get(contract::network))
        .route("/contract/info", get(contract::contract_info))
        .route("/wallet/connect", post(wallet::wallet_connect))
        .route("/wallet/disconnect", post(wallet::wallet_disconnect))
        .route("/wallet/session", get(wallet::wallet_session))
        .route("/purchase", get(purchase::purchase_state))
        .route("/purchase/amount", put(purchase::purchase_amount))
        .route("/purchase/submit", post(purchase::purchase_submit))
        .route("/purchase/reset", post(purchase::purchase_reset))
        .route("/transactions", get(activity::transactions))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for Ctrl-C, running until killed: {}", err);
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        service: "dashboard-service",
        status: "ok",
    })
}

async fn version() -> Json<VersionResponse> {
    Json(VersionResponse {
        service: "dashboard-service",
        version: env!("CARGO_PKG_VERSION"),
    })
}

pub(crate) fn dapp_error(err: DappError) -> (StatusCode, Json<ErrorResponse>) {
    let status = match &err {
        DappError::ProviderUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        DappError::UserRejected => StatusCode::FORBIDDEN,
        DappError::NotConnected => StatusCode::UNAUTHORIZED,
        DappError::InvalidAmount(_) => StatusCode::BAD_REQUEST,
        DappError::Transport(_) | DappError::Decode(_) => StatusCode::BAD_GATEWAY,
        DappError::ExecutionReverted { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        DappError::PurchaseInProgress => StatusCode::CONFLICT,
    };
    (
        status,
        Json(ErrorResponse {
            error: err.to_string(),
        }),
    )
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use alloy_sol_types::{SolCall, SolValue};
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use alloy_primitives::address;
    use sd_api_types::{Address, U256};
    use sd_chain_client::{InMemoryChain, InMemoryWallet};
    use sd_contracts::{IShadow, IShadowIco, SHADOW_ICO_ADDRESS, SHADOW_TOKEN_ADDRESS};
    use sd_dashboard_core::DashboardSettings;
    use tower::ServiceExt;

    pub(crate) const BUYER: Address = address!("1111111111111111111111111111111111111111");

    pub(crate) fn ether(whole: u64) -> U256 {
        U256::from(whole) * U256::from(10u64).pow(U256::from(18u64))
    }

    pub(crate) fn seeded_chain() -> Arc<InMemoryChain> {
        let chain = Arc::new(InMemoryChain::new(534351));
        let token = |selector, output: Vec<u8>| chain.set_call(SHADOW_TOKEN_ADDRESS, selector, output);
        token(IShadow::nameCall::SELECTOR, "Shadow".to_owned().abi_encode());
        token(IShadow::symbolCall::SELECTOR, "SHDW".to_owned().abi_encode());
        token(IShadow::totalSupplyCall::SELECTOR, ether(1_000_000).abi_encode());
        token(IShadow::balanceOfCall::SELECTOR, ether(5).abi_encode());
        chain.set_call(
            SHADOW_ICO_ADDRESS,
            IShadowIco::rateCall::SELECTOR,
            U256::from(1000u64).abi_encode(),
        );
        chain.set_call(
            SHADOW_ICO_ADDRESS,
            IShadowIco::ownerCall::SELECTOR,
            Address::repeat_byte(0x42).abi_encode(),
        );
        chain
    }

    pub(crate) fn app_with(chain: Arc<InMemoryChain>, wallet: Arc<dyn WalletProvider>) -> (Arc<AppState>, Router) {
        let state = Arc::new(AppState {
            dashboard: Dashboard::new(DashboardSettings::default(), chain, wallet),
        });
        (state.clone(), router(state))
    }

    pub(crate) fn app() -> (Arc<AppState>, Router, Arc<InMemoryChain>) {
        let chain = seeded_chain();
        let wallet = Arc::new(InMemoryWallet::new(vec![BUYER], 534351).with_chain(chain.clone()));
        let (state, router) = app_with(chain.clone(), wallet);
        (state, router, chain)
    }

    pub(crate) async fn send(
        router: &Router,
        method: &str,
        uri: &str,
        body: Option<serde_json::Value>,
    ) -> (StatusCode, serde_json::Value) {
        let request = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => request
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => request.body(Body::empty()).unwrap(),
        };

        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }
}
