use sd_chain_client::ChainError;
use sd_contracts::units::UnitsError;
use thiserror::Error;

/// Every failure the dashboard surfaces to the user. None of them is fatal:
/// each is scoped to the operation that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DappError {
    #[error("no compatible wallet found; install or configure a wallet to continue")]
    ProviderUnavailable,
    #[error("the request was rejected in the wallet")]
    UserRejected,
    #[error("connect your wallet first")]
    NotConnected,
    #[error("invalid amount: {0}")]
    InvalidAmount(String),
    #[error("network error: {0}")]
    Transport(String),
    #[error("transaction failed{}", failure_suffix(.reason))]
    ExecutionReverted { reason: Option<String> },
    #[error("a purchase is already in progress")]
    PurchaseInProgress,
    #[error("unexpected answer from the node: {0}")]
    Decode(String),
}

fn failure_suffix(reason: &Option<String>) -> String {
    match reason {
        Some(reason) => format!(": {reason}"),
        None => " on chain".to_owned(),
    }
}

impl From<ChainError> for DappError {
    fn from(err: ChainError) -> Self {
        match err {
            ChainError::ProviderUnavailable => Self::ProviderUnavailable,
            ChainError::UserRejected => Self::UserRejected,
            ChainError::ExecutionReverted { reason } => Self::ExecutionReverted { reason },
            ChainError::Transport(message) => Self::Transport(message),
            ChainError::Decode(message) => Self::Decode(message),
        }
    }
}

impl From<UnitsError> for DappError {
    fn from(err: UnitsError) -> Self {
        Self::InvalidAmount(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chain_errors_keep_their_category() {
        assert_eq!(DappError::from(ChainError::UserRejected), DappError::UserRejected);
        assert_eq!(
            DappError::from(ChainError::Transport("timed out".to_owned())),
            DappError::Transport("timed out".to_owned())
        );
    }

    #[test]
    fn revert_messages_are_human_readable() {
        let generic = DappError::ExecutionReverted { reason: None };
        assert_eq!(generic.to_string(), "transaction failed on chain");

        let specific = DappError::ExecutionReverted {
            reason: Some("ICO has ended".to_owned()),
        };
        assert_eq!(specific.to_string(), "transaction failed: ICO has ended");
    }
}
