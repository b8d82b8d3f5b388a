//! The single webhook surface.
//!
//! One endpoint, dispatched on the `action` query parameter. Every branch
//! answers 200 with a JSON body: the provider treats anything else as a
//! delivery failure and retries, so internal failures are converted into
//! acknowledgments and idempotency is left to the reconciliation engine.

use crate::api::AppState;
use crate::mpesa::c2b::C2bAck;
use crate::mpesa::error::MpesaError;
use crate::mpesa::tenant::{TenantConfig, TenantResolver};
use crate::mpesa::wire::{decode_confirmation, decode_result, decode_stk_callback};
use crate::orders::OrderGateway;
use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use tracing::{info, warn};

/// Closed set of webhook actions. Unrecognized or missing actions map to
/// `Unknown`, which is acknowledged like a validation ping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookAction {
    Request,
    Validate,
    Confirm,
    Reconcile,
    Register,
    Status,
    Result,
    Timeout,
    Unknown,
}

impl WebhookAction {
    pub fn parse(action: Option<&str>) -> Self {
        match action.map(str::trim) {
            Some("request") => WebhookAction::Request,
            Some("validate") => WebhookAction::Validate,
            Some("confirm") => WebhookAction::Confirm,
            Some("reconcile") => WebhookAction::Reconcile,
            Some("register") => WebhookAction::Register,
            Some("status") => WebhookAction::Status,
            Some("result") => WebhookAction::Result,
            Some("timeout") => WebhookAction::Timeout,
            _ => WebhookAction::Unknown,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WebhookQuery {
    pub action: Option<String>,
    pub sign: Option<String>,
    pub order: Option<String>,
    pub tenant: Option<u64>,
}

pub async fn handle_webhook(
    State(state): State<AppState>,
    Query(query): Query<WebhookQuery>,
    body: String,
) -> Json<JsonValue> {
    Json(dispatch(&state, &query, &body).await)
}

/// POST /lipwa/request — the storefront's "resend prompt" button.
pub async fn handle_resend(State(state): State<AppState>, body: String) -> Json<JsonValue> {
    let query = WebhookQuery {
        action: Some("request".to_string()),
        ..WebhookQuery::default()
    };
    Json(dispatch(&state, &query, &body).await)
}

pub async fn dispatch(state: &AppState, query: &WebhookQuery, body: &str) -> JsonValue {
    let action = WebhookAction::parse(query.action.as_deref());
    let tenant = match state.resolver.resolve(query.tenant.unwrap_or(0)).await {
        Ok(tenant) => tenant,
        Err(e) => {
            warn!(error = %e, "tenant resolution failed");
            return e.fault_body();
        }
    };

    match action {
        WebhookAction::Request => request_action(state, &tenant, query, body).await,
        WebhookAction::Validate => validate_action(state, body),
        WebhookAction::Confirm => confirm_action(state, &tenant, body).await,
        WebhookAction::Reconcile => reconcile_action(state, &tenant, query, body).await,
        WebhookAction::Register => register_action(state, &tenant).await,
        WebhookAction::Status => status_action(state, &tenant, body).await,
        WebhookAction::Result => result_action(state, body).await,
        WebhookAction::Timeout => timeout_action(state, body).await,
        WebhookAction::Unknown => {
            warn!(action = ?query.action, "unknown webhook action, answering as validate");
            validate_action(state, body)
        }
    }
}

/// Resend the payment prompt for an existing order and persist the fresh
/// tracking id.
async fn request_action(
    state: &AppState,
    tenant: &TenantConfig,
    query: &WebhookQuery,
    body: &str,
) -> JsonValue {
    let order_id = serde_json::from_str::<JsonValue>(body)
        .ok()
        .and_then(|v| v.get("order").map(crate::mpesa::wire::scalar_to_string))
        .or_else(|| query.order.clone());
    let Some(order_id) = order_id else {
        return json!({ "Error": "No order specified" });
    };
    let order = match state.orders.find_by_id(&order_id).await {
        Ok(Some(order)) => order,
        Ok(None) => return MpesaError::OrderNotFound.fault_body(),
        Err(e) => {
            warn!(order_id = %order_id, error = %e, "order lookup failed");
            return MpesaError::OrderNotFound.fault_body();
        }
    };

    let reference = tenant.account_reference_for(&order.id);
    let description = format!("{} Purchase", tenant.trading_name);
    match state
        .stk
        .initiate(
            tenant,
            &order.billing_phone,
            order.total,
            &reference,
            &description,
            "LipwaPesa",
        )
        .await
    {
        Ok(accepted) => {
            let merchant_request_id = accepted.merchant_request_id.clone();
            match state
                .orders
                .set_tracking_id(&order.id, &merchant_request_id)
                .await
            {
                Ok(()) => {
                    let _ = state
                        .orders
                        .add_note(
                            &order.id,
                            &format!(
                                "STK push resent. Awaiting M-Pesa confirmation of payment for request {}.",
                                merchant_request_id
                            ),
                        )
                        .await;
                }
                Err(e) => {
                    warn!(order_id = %order.id, error = %e, "failed to persist tracking id");
                }
            }
            let mut response = serde_json::json!({
                "MerchantRequestID": accepted.merchant_request_id,
                "CheckoutRequestID": accepted.checkout_request_id,
                "ResponseDescription": accepted.response_description,
                "CustomerMessage": accepted.customer_message,
            });
            if tenant.debug {
                if let Some(requested) = state.debug.last(&reference) {
                    response["requested"] = requested;
                }
            }
            response
        }
        Err(e) => e.fault_body(),
    }
}

fn validate_action(state: &AppState, body: &str) -> JsonValue {
    let payload: JsonValue = serde_json::from_str(body).unwrap_or_else(|_| json!({}));
    // No verification hook wired: the provider requires a fast ack.
    let ack = state.c2b.validate(&payload, None);
    serde_json::to_value(ack).unwrap_or_else(|_| json!({}))
}

async fn confirm_action(state: &AppState, tenant: &TenantConfig, body: &str) -> JsonValue {
    let confirmation = match decode_confirmation(body) {
        Ok(confirmation) => confirmation,
        Err(MpesaError::MalformedPayload { message }) => {
            warn!(error = %message, "malformed C2B confirmation");
            return json!({ "Error": "No response data received" });
        }
        Err(e) => return e.fault_body(),
    };

    match state.engine.confirm(tenant, &confirmation).await {
        Ok(true) => serde_json::to_value(C2bAck::success()).unwrap_or_else(|_| json!({})),
        Ok(false) => serde_json::to_value(C2bAck::failed()).unwrap_or_else(|_| json!({})),
        Err(e) => {
            warn!(error = %e, "confirmation processing failed");
            serde_json::to_value(C2bAck::failed()).unwrap_or_else(|_| json!({}))
        }
    }
}

async fn reconcile_action(
    state: &AppState,
    tenant: &TenantConfig,
    query: &WebhookQuery,
    body: &str,
) -> JsonValue {
    let signed = query
        .sign
        .as_deref()
        .map(|sign| tenant.signature_matches(sign))
        .unwrap_or(false);
    if !signed {
        // Reject silently; never reveal what was expected.
        warn!(
            tenant_id = tenant.tenant_id,
            error = %MpesaError::SignatureMismatch,
            "reconcile callback rejected"
        );
        return reconcile_ack(false);
    }

    let callback = match decode_stk_callback(body) {
        Ok(callback) => callback,
        Err(e) => {
            warn!(error = %e, "malformed reconcile payload");
            return reconcile_ack(false);
        }
    };

    match state
        .engine
        .reconcile(tenant, &callback, query.order.as_deref())
        .await
    {
        Ok(applied) => reconcile_ack(applied),
        Err(e) => {
            warn!(error = %e, "reconciliation failed");
            reconcile_ack(false)
        }
    }
}

async fn register_action(state: &AppState, tenant: &TenantConfig) -> JsonValue {
    match state.c2b.register_urls(tenant).await {
        Ok(outcome) => {
            let status = if outcome.success { "success" } else { "error" };
            json!({ "status": status, "message": outcome.message })
        }
        Err(e) => {
            let fault = e.fault_body();
            let message = fault
                .get("errorMessage")
                .and_then(|v| v.as_str())
                .unwrap_or("Could not register M-PESA URLs, try again later.")
                .to_string();
            json!({ "status": "error", "message": message })
        }
    }
}

async fn status_action(state: &AppState, tenant: &TenantConfig, body: &str) -> JsonValue {
    let transaction = serde_json::from_str::<JsonValue>(body)
        .ok()
        .and_then(|v| v.get("transaction").and_then(|t| t.as_str().map(String::from)));
    let Some(transaction) = transaction else {
        return json!({ "Error": "No transaction specified" });
    };
    match state.c2b.transaction_status(tenant, &transaction).await {
        Ok(submission) => submission,
        Err(e) => e.fault_body(),
    }
}

async fn result_action(state: &AppState, body: &str) -> JsonValue {
    let result = match decode_result(body) {
        Ok(result) => result,
        Err(e) => {
            warn!(error = %e, "malformed result payload");
            return json!({ "Error": "No response data received" });
        }
    };

    match state.engine.reversal_result(&result).await {
        Ok(applied) => {
            info!(applied, "result callback processed");
            serde_json::to_value(C2bAck::success()).unwrap_or_else(|_| json!({}))
        }
        Err(e) => {
            warn!(error = %e, "result processing failed");
            serde_json::to_value(C2bAck::failed()).unwrap_or_else(|_| json!({}))
        }
    }
}

async fn timeout_action(state: &AppState, body: &str) -> JsonValue {
    let callback = match decode_stk_callback(body) {
        Ok(callback) => callback,
        Err(e) => {
            warn!(error = %e, "malformed timeout payload");
            return json!({ "Error": "No response data received" });
        }
    };

    match state.engine.timeout(&callback).await {
        Ok(_) => serde_json::to_value(C2bAck::success()).unwrap_or_else(|_| json!({})),
        Err(e) => {
            warn!(error = %e, "timeout processing failed");
            serde_json::to_value(C2bAck::failed()).unwrap_or_else(|_| json!({}))
        }
    }
}

fn reconcile_ack(applied: bool) -> JsonValue {
    if applied {
        json!({ "resultCode": 0, "resultDesc": "Reconciliation successful" })
    } else {
        json!({ "resultCode": 1, "resultDesc": "Reconciliation failed" })
    }
}
