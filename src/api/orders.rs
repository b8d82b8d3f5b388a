//! Order-facing routes: receipt lookup for the storefront's polling page
//! and the order-status event that triggers reversals.

use crate::api::AppState;
use crate::mpesa::tenant::TenantResolver;
use crate::orders::OrderGateway;
use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use tracing::warn;

#[derive(Debug, Deserialize)]
pub struct ReceiptQuery {
    pub order: Option<String>,
}

/// GET /lipwa/receipt?order=<id> — transaction id and latest note for an
/// order, polled by the storefront while the customer waits for the prompt.
pub async fn handle_receipt(
    State(state): State<AppState>,
    Query(query): Query<ReceiptQuery>,
) -> Json<JsonValue> {
    let Some(order_id) = query.order else {
        return Json(json!({ "receipt": "" }));
    };
    let order = match state.orders.find_by_id(&order_id).await {
        Ok(Some(order)) => order,
        _ => return Json(json!({ "receipt": "" })),
    };
    let note = state.orders.latest_note(&order_id).await.ok().flatten();
    Json(json!({
        "receipt": order.transaction_id.unwrap_or_default(),
        "note": note,
        "status": order.status,
    }))
}

#[derive(Debug, Deserialize)]
pub struct StatusEvent {
    pub order: String,
    pub status: String,
    #[serde(default)]
    pub tenant: Option<u64>,
}

/// POST /events/order-status — consumed from the surrounding order system.
/// A configured status on an order paid through this gateway triggers a
/// transaction reversal.
pub async fn handle_status_event(
    State(state): State<AppState>,
    Json(event): Json<StatusEvent>,
) -> Json<JsonValue> {
    if !state.reversal_statuses.contains(&event.status) {
        return Json(json!({ "reversed": false }));
    }
    let tenant = match state.resolver.resolve(event.tenant.unwrap_or(0)).await {
        Ok(tenant) => tenant,
        Err(e) => {
            warn!(error = %e, "tenant resolution failed");
            return Json(e.fault_body());
        }
    };

    match state.reversal.on_status_event(&tenant, &event.order).await {
        Ok(reversed) => Json(json!({ "reversed": reversed })),
        Err(e) => {
            warn!(order_id = %event.order, error = %e, "status event failed");
            Json(json!({ "reversed": false }))
        }
    }
}
