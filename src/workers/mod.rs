pub mod reconciliation;
pub mod webhook_dispatch;
pub mod webhook_retry;
