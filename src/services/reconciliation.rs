//! The reconciliation state machine.
//!
//! Callbacks may arrive late, duplicated or out of order; the provider
//! retries anything it could not deliver. Correctness rests on two rules:
//! a `completed` order is never mutated again by reconciliation, and the
//! guard-check plus the following writes run under a per-order mutex so two
//! callbacks for the same order cannot interleave between them.

use crate::mpesa::tenant::TenantConfig;
use crate::mpesa::wire::{C2bConfirmation, ResultBody, StkCallback};
use crate::orders::{OrderError, OrderGateway, OrderRecord, OrderStatus};
use crate::services::notifier::PaymentNotifier;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

/// Per-order-id serialization for the guard/write window.
#[derive(Default)]
struct OrderLocks {
    inner: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl OrderLocks {
    fn for_order(&self, order_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut inner = self.inner.lock().expect("order lock map poisoned");
        inner.entry(order_id.to_string()).or_default().clone()
    }
}

pub struct ReconciliationEngine {
    orders: Arc<dyn OrderGateway>,
    notifier: Arc<dyn PaymentNotifier>,
    locks: OrderLocks,
}

impl ReconciliationEngine {
    pub fn new(orders: Arc<dyn OrderGateway>, notifier: Arc<dyn PaymentNotifier>) -> Self {
        Self {
            orders,
            notifier,
            locks: OrderLocks::default(),
        }
    }

    /// Apply an STK reconcile callback. Returns `Ok(true)` when the callback
    /// was recognized and applied (including the on-hold outcome), and
    /// `Ok(false)` for no-ops: unknown order, or an order already completed.
    pub async fn reconcile(
        &self,
        tenant: &TenantConfig,
        callback: &StkCallback,
        explicit_order: Option<&str>,
    ) -> Result<bool, OrderError> {
        let Some(order) = self
            .resolve(explicit_order, &callback.merchant_request_id)
            .await?
        else {
            warn!(
                merchant_request_id = %callback.merchant_request_id,
                "reconcile callback for unknown order"
            );
            return Ok(false);
        };

        let lock = self.locks.for_order(&order.id);
        let _guard = lock.lock().await;
        // Re-read under the lock so the terminal guard sees the latest write.
        let Some(order) = self.orders.find_by_id(&order.id).await? else {
            return Ok(false);
        };
        if order.status.is_terminal() {
            info!(order_id = %order.id, "duplicate reconcile on completed order ignored");
            return Ok(false);
        }

        let metadata = callback
            .callback_metadata
            .as_ref()
            .filter(|_| callback.result_code == 0);
        match metadata.and_then(|meta| meta.receipt_number().map(|receipt| (meta, receipt))) {
            Some((meta, receipt)) => {
                let phone = meta.phone_number().unwrap_or_default();
                self.orders.set_transaction_id(&order.id, &receipt).await?;
                self.orders
                    .set_status(&order.id, tenant.completion_status)
                    .await?;
                self.orders
                    .add_note(
                        &order.id,
                        &format!(
                            "Full M-Pesa payment received from {}. Transaction ID {}.",
                            phone, receipt
                        ),
                    )
                    .await?;
                info!(order_id = %order.id, receipt = %receipt, "payment reconciled");
                self.notify(&order, meta.flatten());
            }
            None => {
                self.orders.set_status(&order.id, OrderStatus::OnHold).await?;
                self.orders
                    .add_note(
                        &order.id,
                        &format!(
                            "(M-Pesa error) {}: {}.",
                            callback.result_code, callback.result_desc
                        ),
                    )
                    .await?;
                info!(
                    order_id = %order.id,
                    result_code = callback.result_code,
                    "payment put on hold"
                );
            }
        }
        Ok(true)
    }

    /// Apply a C2B confirmation: compare what was paid against what is due.
    /// Returns `Ok(true)` when the order is settled (fully or over-paid) and
    /// `Ok(false)` for partial payments, unknown orders and duplicates.
    pub async fn confirm(
        &self,
        tenant: &TenantConfig,
        confirmation: &C2bConfirmation,
    ) -> Result<bool, OrderError> {
        let Some(order_id) = confirmation
            .bill_ref_number
            .as_deref()
            .filter(|id| !id.trim().is_empty())
        else {
            warn!("C2B confirmation without a bill reference");
            return Ok(false);
        };
        let Some(order) = self.orders.find_by_id(order_id).await? else {
            warn!(order_id, "C2B confirmation for unknown order");
            return Ok(false);
        };

        let lock = self.locks.for_order(&order.id);
        let _guard = lock.lock().await;
        let Some(order) = self.orders.find_by_id(&order.id).await? else {
            return Ok(false);
        };
        if order.status.is_terminal() {
            return Ok(false);
        }

        let phone = confirmation.msisdn.clone().unwrap_or_default();
        let receipt = &confirmation.trans_id;
        let balance = order.total.round() as i64 - confirmation.trans_amount.round() as i64;

        if balance > 0 {
            self.orders.set_status(&order.id, OrderStatus::OnHold).await?;
            self.orders
                .add_note(
                    &order.id,
                    &format!("M-Pesa payment from {} incomplete", phone),
                )
                .await?;
            info!(order_id = %order.id, balance, "partial payment, order on hold");
            return Ok(false);
        }

        let note = if balance == 0 {
            format!(
                "Full M-Pesa payment received from {}. Transaction ID {}",
                phone, receipt
            )
        } else {
            format!(
                "{} has overpaid by {}. Transaction ID {}",
                phone,
                balance.abs(),
                receipt
            )
        };
        self.orders.set_transaction_id(&order.id, receipt).await?;
        self.orders
            .set_status(&order.id, tenant.completion_status)
            .await?;
        self.orders.add_note(&order.id, &note).await?;
        info!(order_id = %order.id, receipt = %receipt, balance, "manual payment confirmed");
        self.notify(&order, confirmation.notification_metadata());
        Ok(true)
    }

    /// Queue timeout: the provider gave up on the prompt, put the order back
    /// to `pending` so the customer can retry.
    pub async fn timeout(&self, callback: &StkCallback) -> Result<bool, OrderError> {
        let Some(order) = self
            .orders
            .find_by_tracking_id(&callback.merchant_request_id)
            .await?
        else {
            return Ok(false);
        };

        let lock = self.locks.for_order(&order.id);
        let _guard = lock.lock().await;
        let Some(order) = self.orders.find_by_id(&order.id).await? else {
            return Ok(false);
        };
        if order.status.is_terminal() {
            return Ok(false);
        }

        self.orders.set_status(&order.id, OrderStatus::Pending).await?;
        self.orders
            .add_note(&order.id, "M-Pesa payment timed out")
            .await?;
        info!(order_id = %order.id, "payment timed out, order back to pending");
        Ok(true)
    }

    /// Asynchronous result of a reversal/status query, correlated by the
    /// stored `OriginatorConversationID`.
    pub async fn reversal_result(&self, result: &ResultBody) -> Result<bool, OrderError> {
        let Some(order) = self
            .orders
            .find_by_tracking_id(&result.originator_conversation_id)
            .await?
        else {
            warn!(
                originator_conversation_id = %result.originator_conversation_id,
                "result callback for unknown order"
            );
            return Ok(false);
        };

        let lock = self.locks.for_order(&order.id);
        let _guard = lock.lock().await;

        if result.result_code == 0 {
            // Each parameter is keyed by its declared Name; ReceiptNo backs
            // up a missing top-level TransactionID.
            let parameters = result.parameters_by_name();
            let receipt = result.transaction_id.clone().or_else(|| {
                parameters
                    .get("ReceiptNo")
                    .map(crate::mpesa::wire::scalar_to_string)
            });
            if let Some(receipt) = receipt.as_deref() {
                self.orders.set_transaction_id(&order.id, receipt).await?;
            }
            self.orders
                .set_status(&order.id, OrderStatus::Refunded)
                .await?;
            let note = match parameters
                .get("TransactionStatus")
                .map(crate::mpesa::wire::scalar_to_string)
            {
                Some(status) => format!("{} ({})", result.result_desc, status),
                None => result.result_desc.clone(),
            };
            self.orders.add_note(&order.id, &note).await?;
            info!(order_id = %order.id, "reversal confirmed, order refunded");
        } else {
            self.orders
                .set_status(&order.id, OrderStatus::Processing)
                .await?;
            self.orders
                .add_note(
                    &order.id,
                    &format!("{}: {}", result.result_code, result.result_desc),
                )
                .await?;
            warn!(
                order_id = %order.id,
                result_code = result.result_code,
                "reversal did not complete"
            );
        }
        Ok(true)
    }

    async fn resolve(
        &self,
        explicit_order: Option<&str>,
        merchant_request_id: &str,
    ) -> Result<Option<OrderRecord>, OrderError> {
        if let Some(id) = explicit_order {
            if let Some(order) = self.orders.find_by_id(id).await? {
                return Ok(Some(order));
            }
        }
        self.orders.find_by_tracking_id(merchant_request_id).await
    }

    fn notify(&self, order: &OrderRecord, metadata: HashMap<String, JsonValue>) {
        let notifier = self.notifier.clone();
        let order = order.clone();
        tokio::spawn(async move {
            notifier.payment_received(&order, &metadata).await;
        });
    }
}
