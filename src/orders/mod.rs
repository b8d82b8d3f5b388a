//! The order record as seen by the reconciliation engine.
//!
//! Orders are owned by the surrounding commerce system; this module only
//! defines the gateway interface the engine consumes. Every mutation is
//! atomic per call.

pub mod memory;

pub use memory::InMemoryOrderGateway;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OrderStatus {
    Pending,
    Processing,
    OnHold,
    Completed,
    Refunded,
    Failed,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Processing => "processing",
            OrderStatus::OnHold => "on-hold",
            OrderStatus::Completed => "completed",
            OrderStatus::Refunded => "refunded",
            OrderStatus::Failed => "failed",
        }
    }

    /// `completed` is terminal for reconciliation: no callback may move an
    /// order out of it. Reversal is an explicit action, not reconciliation.
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Completed)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = OrderError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "pending" => Ok(OrderStatus::Pending),
            "processing" => Ok(OrderStatus::Processing),
            "on-hold" | "on_hold" => Ok(OrderStatus::OnHold),
            "completed" => Ok(OrderStatus::Completed),
            "refunded" => Ok(OrderStatus::Refunded),
            "failed" => Ok(OrderStatus::Failed),
            _ => Err(OrderError::Store(format!("unknown order status: {}", value))),
        }
    }
}

/// Snapshot of an order as returned by the gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRecord {
    pub id: String,
    pub status: OrderStatus,
    pub total: f64,
    pub billing_phone: String,
    pub payment_method: String,
    pub transaction_id: Option<String>,
    /// Provider correlation id (MerchantRequestID / OriginatorConversationID).
    pub tracking_id: Option<String>,
}

#[derive(Debug, Clone, Error)]
pub enum OrderError {
    #[error("order {0} not found")]
    NotFound(String),
    #[error("order store error: {0}")]
    Store(String),
}

#[async_trait]
pub trait OrderGateway: Send + Sync {
    async fn find_by_id(&self, id: &str) -> Result<Option<OrderRecord>, OrderError>;

    async fn find_by_tracking_id(
        &self,
        tracking_id: &str,
    ) -> Result<Option<OrderRecord>, OrderError>;

    async fn set_status(&self, id: &str, status: OrderStatus) -> Result<(), OrderError>;

    async fn set_transaction_id(&self, id: &str, transaction_id: &str) -> Result<(), OrderError>;

    async fn set_tracking_id(&self, id: &str, tracking_id: &str) -> Result<(), OrderError>;

    async fn add_note(&self, id: &str, note: &str) -> Result<(), OrderError>;

    async fn latest_note(&self, id: &str) -> Result<Option<String>, OrderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_strings() {
        for status in [
            OrderStatus::Pending,
            OrderStatus::Processing,
            OrderStatus::OnHold,
            OrderStatus::Completed,
            OrderStatus::Refunded,
            OrderStatus::Failed,
        ] {
            assert_eq!(OrderStatus::from_str(status.as_str()).unwrap(), status);
        }
    }

    #[test]
    fn only_completed_is_terminal() {
        assert!(OrderStatus::Completed.is_terminal());
        assert!(!OrderStatus::OnHold.is_terminal());
        assert!(!OrderStatus::Refunded.is_terminal());
    }

    #[test]
    fn on_hold_serializes_with_dash() {
        let json = serde_json::to_string(&OrderStatus::OnHold).unwrap();
        assert_eq!(json, "\"on-hold\"");
    }
}
