//! Polling contract-event watcher.
//!
//! Mirrors what an injected provider's `watchContractEvent` does: remember the
//! head block, and on every tick fetch matching logs for the blocks that
//! appeared since, delivering them to the callback as one batch.

use alloy_primitives::{Address, LogData, TxHash};
use alloy_sol_types::SolEvent;
use sd_chain_client::{ChainError, LogFilter, RawLog, RpcClient};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedLog<E> {
    pub event: E,
    pub transaction_hash: Option<TxHash>,
    pub block_number: Option<u64>,
}

pub fn decode_log<E: SolEvent>(log: &RawLog) -> Result<DecodedLog<E>, ChainError> {
    let data = LogData::new(log.topics.clone(), log.data.clone())
        .ok_or_else(|| ChainError::Decode(format!("{}: too many topics", E::SIGNATURE)))?;
    let event = E::decode_log_data(&data)
        .map_err(|err| ChainError::Decode(format!("{}: {err}", E::SIGNATURE)))?;

    Ok(DecodedLog {
        event,
        transaction_hash: log.transaction_hash,
        block_number: log.block_number,
    })
}

/// Watches `E` events emitted by `address` until `cancel` fires.
///
/// Only events mined after the call are reported. Node failures are logged
/// and retried on the next tick without moving the cursor, so a transient
/// outage delays events instead of dropping them.
///
/// The cursor starts at the first head block the node reports. If the node is
/// unreachable when watching starts, events mined before it answers again are
/// not reported, since the block that was current at the call is unknown.
pub async fn watch_event<E, F>(
    rpc: Arc<dyn RpcClient>,
    address: Address,
    poll_interval: Duration,
    cancel: CancellationToken,
    mut on_logs: F,
) -> JoinHandle<()>
where
    E: SolEvent + Send + 'static,
    F: FnMut(Vec<DecodedLog<E>>) + Send + 'static,
{
    let mut cursor = match rpc.block_number().await {
        Ok(head) => Some(head),
        Err(err) => {
            warn!(event = E::SIGNATURE, "failed to read head block, will retry: {}", err);
            None
        }
    };

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let head = match rpc.block_number().await {
                Ok(head) => head,
                Err(err) => {
                    warn!(event = E::SIGNATURE, "block number poll failed: {}", err);
                    continue;
                }
            };

            let Some(last) = cursor else {
                cursor = Some(head);
                continue;
            };
            if head <= last {
                continue;
            }

            let filter = LogFilter {
                address,
                topic0: Some(E::SIGNATURE_HASH),
                from_block: last + 1,
                to_block: head,
            };
            let logs = match rpc.get_logs(&filter).await {
                Ok(logs) => logs,
                Err(err) => {
                    warn!(event = E::SIGNATURE, "log poll failed: {}", err);
                    continue;
                }
            };
            cursor = Some(head);

            let batch: Vec<DecodedLog<E>> = logs
                .iter()
                .filter_map(|log| match decode_log::<E>(log) {
                    Ok(decoded) => Some(decoded),
                    Err(err) => {
                        warn!("skipping undecodable log: {}", err);
                        None
                    }
                })
                .collect();

            if cancel.is_cancelled() {
                break;
            }
            if !batch.is_empty() {
                debug!(event = E::SIGNATURE, count = batch.len(), head, "delivering logs");
                on_logs(batch);
            }
        }

        debug!(event = E::SIGNATURE, "event watcher stopped");
    })
}
