use axum::{Json, extract::State};
use sd_api_types::{ContractInfoResponse, FieldResponse, NetworkResponse};
use sd_contracts::units::format_token_amount;
use sd_dashboard_core::{ContractReader, Field, FieldRead, FieldValue};
use std::sync::Arc;

use crate::AppState;

fn render(value: &FieldValue, field: Field) -> String {
    match value {
        FieldValue::Text(text) => text.clone(),
        FieldValue::Account(account) => account.to_checksum(None),
        // The sale rate is a plain multiplier, not an 18-decimal amount.
        FieldValue::Amount(amount) if field == Field::SaleRate => amount.to_string(),
        FieldValue::Amount(amount) => format_token_amount(*amount),
    }
}

fn field_response(read: FieldRead, field: Field) -> FieldResponse {
    FieldResponse {
        value: read.value.as_ref().map(|value| render(value, field)),
        is_loading: read.is_loading,
    }
}

async fn fresh(reader: &ContractReader, field: Field) -> FieldResponse {
    field_response(reader.ensure_fresh(field).await, field)
}

pub(crate) async fn network(State(state): State<Arc<AppState>>) -> Json<NetworkResponse> {
    let settings = state.dashboard.settings();
    Json(NetworkResponse {
        network: settings.network_name.clone(),
        chain_id: settings.chain_id,
        token_address: settings.token_address.to_checksum(None),
        ico_address: settings.ico_address.to_checksum(None),
    })
}

/// Token and sale facts. Stale fields are refreshed first; a field whose
/// read fails keeps its last known value.
pub(crate) async fn contract_info(State(state): State<Arc<AppState>>) -> Json<ContractInfoResponse> {
    let reader = state.dashboard.reader();
    let settings = state.dashboard.settings();

    let token_name = fresh(reader, Field::TokenName).await;
    let token_symbol = fresh(reader, Field::TokenSymbol).await;
    let total_supply = fresh(reader, Field::TotalSupply).await;
    let sale_rate = fresh(reader, Field::SaleRate).await;
    let owner = fresh(reader, Field::Owner).await;

    let balance = reader.ensure_fresh(Field::CallerBalance).await;
    let balance = balance
        .enabled
        .then(|| field_response(balance, Field::CallerBalance));

    Json(ContractInfoResponse {
        token_address: settings.token_address.to_checksum(None),
        ico_address: settings.ico_address.to_checksum(None),
        network: settings.network_name.clone(),
        token_name,
        token_symbol,
        total_supply,
        sale_rate,
        owner,
        balance,
    })
}
