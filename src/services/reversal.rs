//! Reversal flow driven by order-status events from the surrounding order
//! system.
//!
//! A successful submission stores the provider's
//! `OriginatorConversationID` as the new tracking id so the asynchronous
//! `result` callback can correlate, and moves the order to `refunded`. A
//! rejected submission moves the order to `failed` and leaves the
//! transaction id untouched.

use crate::mpesa::c2b::{C2bClient, DEFAULT_RECEIVER_TYPE};
use crate::mpesa::tenant::TenantConfig;
use crate::orders::{OrderError, OrderGateway, OrderStatus};
use std::sync::Arc;
use tracing::{info, warn};

const REVERSAL_REMARKS: &str = "Transaction Reversal";

pub struct ReversalService {
    c2b: Arc<C2bClient>,
    orders: Arc<dyn OrderGateway>,
}

impl ReversalService {
    pub fn new(c2b: Arc<C2bClient>, orders: Arc<dyn OrderGateway>) -> Self {
        Self { c2b, orders }
    }

    /// Handle a status-change event for one order. Returns `Ok(true)` when a
    /// reversal was submitted and accepted; provider rejections are absorbed
    /// into the order state (`failed`) rather than surfaced.
    pub async fn on_status_event(
        &self,
        tenant: &TenantConfig,
        order_id: &str,
    ) -> Result<bool, OrderError> {
        let Some(order) = self.orders.find_by_id(order_id).await? else {
            warn!(order_id, "status event for unknown order");
            return Ok(false);
        };
        if order.payment_method != "mpesa" {
            return Ok(false);
        }
        let Some(transaction_id) = order.transaction_id.as_deref() else {
            warn!(order_id, "no transaction to reverse");
            return Ok(false);
        };

        let amount = order.total.round() as i64;
        match self
            .c2b
            .reverse(
                tenant,
                transaction_id,
                amount,
                &order.billing_phone,
                DEFAULT_RECEIVER_TYPE,
                REVERSAL_REMARKS,
                REVERSAL_REMARKS,
            )
            .await
        {
            Ok(accepted) => {
                self.orders
                    .set_tracking_id(&order.id, &accepted.originator_conversation_id)
                    .await?;
                self.orders
                    .set_status(&order.id, OrderStatus::Refunded)
                    .await?;
                info!(
                    order_id = %order.id,
                    originator_conversation_id = %accepted.originator_conversation_id,
                    "reversal submitted"
                );
                Ok(true)
            }
            Err(e) => {
                let fault = e.fault_body();
                let message = fault
                    .get("errorMessage")
                    .and_then(|v| v.as_str())
                    .unwrap_or("reversal failed")
                    .to_string();
                self.orders.set_status(&order.id, OrderStatus::Failed).await?;
                self.orders.add_note(&order.id, &message).await?;
                warn!(order_id = %order.id, error = %message, "reversal rejected");
                Ok(false)
            }
        }
    }
}
