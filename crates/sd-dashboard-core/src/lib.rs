//! Client logic of the Shadow ICO dashboard: wallet session, cached contract
//! reads, the purchase state machine and the live activity feed.

pub mod dashboard;
pub mod error;
pub mod feed;
pub mod format;
pub mod purchase;
pub mod reader;
pub mod session;

#[cfg(test)]
pub(crate) mod test_support;

pub use dashboard::{Dashboard, DashboardSettings};
pub use error::DappError;
pub use feed::{EventFeed, FeedSubscription, LOG_CAPACITY, TransactionLog};
pub use purchase::{PurchaseFlow, validate_amount};
pub use reader::{ContractReader, Field, FieldPolicy, FieldRead, FieldValue};
pub use session::WalletSession;
