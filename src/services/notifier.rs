//! External side-channel notified after a payment completes.
//!
//! Fire-and-forget: reconciliation never waits on, or fails because of,
//! the notifier.

use crate::orders::OrderRecord;
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use tracing::info;

#[async_trait]
pub trait PaymentNotifier: Send + Sync {
    async fn payment_received(&self, order: &OrderRecord, metadata: &HashMap<String, JsonValue>);
}

/// Default sink: structured log only.
pub struct LogNotifier;

#[async_trait]
impl PaymentNotifier for LogNotifier {
    async fn payment_received(&self, order: &OrderRecord, metadata: &HashMap<String, JsonValue>) {
        info!(
            order_id = %order.id,
            receipt = metadata
                .get("MpesaReceiptNumber")
                .and_then(|v| v.as_str())
                .unwrap_or(""),
            "🔔 NOTIFICATION: payment received"
        );
    }
}
