//! Services module for settlement-service.

pub mod database;
pub mod metrics;
pub mod notifier;
pub mod store;

pub use database::Database;
pub use metrics::{get_metrics, init_metrics};
pub use notifier::{LogNotifier, MailNotifier, NotificationKind, Notifier, NotifyError};
pub use store::{MemorySettlementStore, SettlementStore, StoreError};
