use axum::{Json, extract::State};
use sd_api_types::{TransactionEntryResponse, TransactionLogEntry, TransactionsResponse};
use sd_contracts::units::{format_ether, format_token_amount};
use sd_dashboard_core::format::{epoch_ms, relative_time, short_address};
use std::sync::Arc;

use crate::AppState;

fn entry_response(entry: TransactionLogEntry, now_ms: u128) -> TransactionEntryResponse {
    TransactionEntryResponse {
        id: entry.id.to_string(),
        kind: entry.kind,
        actor: entry.actor.to_checksum(None),
        actor_short: short_address(&entry.actor),
        eth_amount: format_ether(entry.eth_amount),
        token_amount: format_token_amount(entry.token_amount),
        observed_at_epoch_ms: entry.observed_at_epoch_ms,
        observed: relative_time(entry.observed_at_epoch_ms, now_ms),
    }
}

/// Most recent sale activity, newest first.
pub(crate) async fn transactions(State(state): State<Arc<AppState>>) -> Json<TransactionsResponse> {
    let now_ms = epoch_ms();
    let transactions = state
        .dashboard
        .feed()
        .entries()
        .into_iter()
        .map(|entry| entry_response(entry, now_ms))
        .collect();
    Json(TransactionsResponse { transactions })
}

#[cfg(test)]
mod tests {
    use crate::test_support::*;
    use alloy_primitives::B256;
    use axum::http::StatusCode;
    use sd_api_types::U256;
    use sd_contracts::IShadowIco::{ETHWithdrawn, TokensPurchased};
    use sd_contracts::events::DecodedLog;

    #[tokio::test]
    async fn activity_is_formatted_newest_first() {
        let (state, router, _) = app();
        let feed = state.dashboard.feed();
        feed.record_purchases(vec![DecodedLog {
            event: TokensPurchased {
                buyer: BUYER,
                ethAmount: ether(1),
                tokenAmount: ether(1000),
            },
            transaction_hash: Some(B256::repeat_byte(0xaa)),
            block_number: Some(7),
        }]);
        feed.record_withdrawals(vec![DecodedLog {
            event: ETHWithdrawn {
                owner: BUYER,
                amount: U256::from(250_000_000_000_000_000u64),
            },
            transaction_hash: Some(B256::repeat_byte(0xbb)),
            block_number: Some(8),
        }]);

        let (status, body) = send(&router, "GET", "/transactions", None).await;
        assert_eq!(status, StatusCode::OK);

        let rows = body["transactions"].as_array().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["kind"], "withdrawal");
        assert_eq!(rows[0]["eth_amount"], "0.25");
        assert_eq!(rows[0]["token_amount"], "0");

        assert_eq!(rows[1]["kind"], "purchase");
        assert_eq!(rows[1]["actor_short"], "0x1111...1111");
        assert_eq!(rows[1]["eth_amount"], "1.0");
        assert_eq!(rows[1]["token_amount"], "1000");
        assert_eq!(rows[1]["observed"], "Just now");
    }
}
