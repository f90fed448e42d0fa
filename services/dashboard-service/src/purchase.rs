use axum::{Json, extract::State};
use sd_api_types::{PurchaseAmountRequest, PurchaseResponse};
use sd_contracts::units::format_token_amount;
use sd_dashboard_core::{Dashboard, Field};
use std::sync::Arc;
use tracing::info;

use crate::{AppState, ApiResult, dapp_error};

async fn purchase_response(dashboard: &Dashboard) -> PurchaseResponse {
    let rate = dashboard
        .reader()
        .ensure_fresh(Field::SaleRate)
        .await
        .value
        .and_then(|value| value.as_amount());
    let purchase = dashboard.purchase();
    let state = purchase.state();

    PurchaseResponse {
        can_submit: state.can_submit() && dashboard.session().current().connected,
        amount_input: state.amount_input,
        status: state.status,
        tx_hash: state.tx_hash.map(|hash| hash.to_string()),
        error: state.error,
        rate: rate.map(|rate| rate.to_string()),
        estimated_tokens: purchase.estimate_tokens().map(format_token_amount),
    }
}

pub(crate) async fn purchase_state(State(state): State<Arc<AppState>>) -> Json<PurchaseResponse> {
    Json(purchase_response(&state.dashboard).await)
}

/// Invalid amounts are not request errors: the flow records them and the
/// response carries the message with submission disabled.
pub(crate) async fn purchase_amount(
    State(state): State<Arc<AppState>>,
    Json(request): Json<PurchaseAmountRequest>,
) -> ApiResult<PurchaseResponse> {
    state
        .dashboard
        .purchase()
        .set_amount(&request.amount)
        .map_err(dapp_error)?;
    Ok(Json(purchase_response(&state.dashboard).await))
}

pub(crate) async fn purchase_submit(State(state): State<Arc<AppState>>) -> ApiResult<PurchaseResponse> {
    let hash = state
        .dashboard
        .purchase()
        .submit()
        .await
        .map_err(dapp_error)?;
    info!(%hash, "purchase accepted by wallet");
    Ok(Json(purchase_response(&state.dashboard).await))
}

pub(crate) async fn purchase_reset(State(state): State<Arc<AppState>>) -> ApiResult<PurchaseResponse> {
    state.dashboard.purchase().reset().map_err(dapp_error)?;
    Ok(Json(purchase_response(&state.dashboard).await))
}
