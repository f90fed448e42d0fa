use axum::{Json, extract::State};
use sd_api_types::SessionResponse;
use sd_dashboard_core::Dashboard;
use sd_dashboard_core::format::short_address;
use std::sync::Arc;

use crate::{AppState, ApiResult, dapp_error};

pub(crate) fn session_response(dashboard: &Dashboard) -> SessionResponse {
    let session = dashboard.session().current();
    SessionResponse {
        connected: session.connected,
        address: session.address.map(|address| address.to_checksum(None)),
        short_address: session.address.as_ref().map(short_address),
        chain_id: session.chain_id,
        expected_chain_id: dashboard.settings().chain_id,
        wrong_network: dashboard.wrong_network(),
    }
}

pub(crate) async fn wallet_connect(State(state): State<Arc<AppState>>) -> ApiResult<SessionResponse> {
    state
        .dashboard
        .session()
        .connect()
        .await
        .map_err(dapp_error)?;
    Ok(Json(session_response(&state.dashboard)))
}

pub(crate) async fn wallet_disconnect(State(state): State<Arc<AppState>>) -> Json<SessionResponse> {
    state.dashboard.session().disconnect().await;
    Json(session_response(&state.dashboard))
}

pub(crate) async fn wallet_session(State(state): State<Arc<AppState>>) -> Json<SessionResponse> {
    Json(session_response(&state.dashboard))
}
