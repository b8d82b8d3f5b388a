pub mod notifier;
pub mod reconciliation;
pub mod reversal;
