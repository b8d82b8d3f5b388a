//! Webhook dispatch behavior: action parsing, the signature gate and the
//! always-acknowledge contract for malformed deliveries.

use Lipwa_backend::api::webhooks::{dispatch, WebhookQuery};
use Lipwa_backend::api::AppState;
use Lipwa_backend::mpesa::c2b::C2bClient;
use Lipwa_backend::mpesa::http::MpesaHttpClient;
use Lipwa_backend::mpesa::stk::{DebugStore, StkClient};
use Lipwa_backend::mpesa::tenant::{
    Environment, IdentifierType, StaticTenantResolver, TenantConfig,
};
use Lipwa_backend::mpesa::token::{HttpTokenFetcher, TokenCache};
use Lipwa_backend::mpesa::CallbackUrls;
use Lipwa_backend::orders::{InMemoryOrderGateway, OrderGateway, OrderRecord, OrderStatus};
use Lipwa_backend::services::notifier::LogNotifier;
use Lipwa_backend::services::reconciliation::ReconciliationEngine;
use Lipwa_backend::services::reversal::ReversalService;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn tenant() -> TenantConfig {
    TenantConfig {
        tenant_id: 0,
        env: Environment::Sandbox,
        app_key: "key".to_string(),
        app_secret: "secret".to_string(),
        head_office: "174379".to_string(),
        shortcode: "174379".to_string(),
        id_type: IdentifierType::Paybill,
        passkey: "passkey".to_string(),
        initiator: "test".to_string(),
        initiator_password: "pw".to_string(),
        account_reference: String::new(),
        signature: "sekrit".to_string(),
        completion_status: OrderStatus::Completed,
        trading_name: "Duka".to_string(),
        debug: false,
    }
}

fn state() -> (AppState, Arc<InMemoryOrderGateway>) {
    let http = MpesaHttpClient::new(Duration::from_secs(5)).unwrap();
    let tokens = Arc::new(TokenCache::new(Arc::new(HttpTokenFetcher::new(
        http.clone(),
    ))));
    let urls = CallbackUrls::new("https://shop.example.com");
    let debug = Arc::new(DebugStore::new());
    let stk = Arc::new(StkClient::new(
        http.clone(),
        tokens.clone(),
        urls.clone(),
        debug.clone(),
    ));
    let c2b = Arc::new(C2bClient::new(http, tokens, urls, "certs"));
    let orders = Arc::new(InMemoryOrderGateway::new());
    let engine = Arc::new(ReconciliationEngine::new(
        orders.clone(),
        Arc::new(LogNotifier),
    ));
    let reversal = Arc::new(ReversalService::new(c2b.clone(), orders.clone()));
    let state = AppState {
        resolver: Arc::new(StaticTenantResolver::new(tenant())),
        stk,
        c2b,
        engine,
        reversal,
        orders: orders.clone(),
        debug,
        reversal_statuses: vec!["cancelled".to_string()],
    };
    (state, orders)
}

fn pending_order(id: &str) -> OrderRecord {
    OrderRecord {
        id: id.to_string(),
        status: OrderStatus::Pending,
        total: 1000.0,
        billing_phone: "254712345678".to_string(),
        payment_method: "mpesa".to_string(),
        transaction_id: None,
        tracking_id: Some(format!("mr-{}", id)),
    }
}

fn reconcile_body(merchant_request_id: &str) -> String {
    json!({
        "Body": {
            "stkCallback": {
                "MerchantRequestID": merchant_request_id,
                "CheckoutRequestID": "ws_CO_191220191020363925",
                "ResultCode": 0,
                "ResultDesc": "The service request is processed successfully.",
                "CallbackMetadata": {
                    "Item": [
                        { "Name": "Amount", "Value": 1000.0 },
                        { "Name": "MpesaReceiptNumber", "Value": "ABC123" },
                        { "Name": "PhoneNumber", "Value": 254712345678_i64 }
                    ]
                }
            }
        }
    })
    .to_string()
}

fn query(action: &str, sign: Option<&str>) -> WebhookQuery {
    WebhookQuery {
        action: Some(action.to_string()),
        sign: sign.map(String::from),
        order: None,
        tenant: None,
    }
}

#[tokio::test]
async fn reconcile_with_valid_signature_applies_the_callback() {
    let (state, orders) = state();
    orders.insert(pending_order("42")).await;

    let response = dispatch(&state, &query("reconcile", Some("sekrit")), &reconcile_body("mr-42"))
        .await;
    assert_eq!(response["resultCode"], 0);

    let record = orders.find_by_id("42").await.unwrap().unwrap();
    assert_eq!(record.status, OrderStatus::Completed);
    assert_eq!(record.transaction_id.as_deref(), Some("ABC123"));
}

#[tokio::test]
async fn reconcile_with_wrong_signature_mutates_nothing() {
    let (state, orders) = state();
    orders.insert(pending_order("42")).await;

    let response = dispatch(&state, &query("reconcile", Some("wrong")), &reconcile_body("mr-42"))
        .await;
    assert_eq!(response["resultCode"], 1);
    // The expected signature is never echoed back.
    assert!(!response.to_string().contains("sekrit"));

    let record = orders.find_by_id("42").await.unwrap().unwrap();
    assert_eq!(record.status, OrderStatus::Pending);
    assert!(record.transaction_id.is_none());
}

#[tokio::test]
async fn reconcile_without_signature_is_rejected() {
    let (state, orders) = state();
    orders.insert(pending_order("42")).await;

    let response = dispatch(&state, &query("reconcile", None), &reconcile_body("mr-42")).await;
    assert_eq!(response["resultCode"], 1);
    assert_eq!(
        orders.find_by_id("42").await.unwrap().unwrap().status,
        OrderStatus::Pending
    );
}

#[tokio::test]
async fn malformed_reconcile_payload_still_gets_an_ack() {
    let (state, _) = state();
    let response = dispatch(&state, &query("reconcile", Some("sekrit")), "not json").await;
    assert_eq!(response["resultCode"], 1);
}

#[tokio::test]
async fn validate_acks_success_without_a_hook() {
    let (state, _) = state();
    let response = dispatch(
        &state,
        &query("validate", None),
        &json!({ "TransAmount": "100" }).to_string(),
    )
    .await;
    assert_eq!(response["ResultCode"], 0);
    assert_eq!(response["ResultDesc"], "Success");
}

#[tokio::test]
async fn unknown_action_falls_back_to_validate() {
    let (state, _) = state();
    let response = dispatch(&state, &query("bonga", None), "").await;
    assert_eq!(response["ResultCode"], 0);
}

#[tokio::test]
async fn confirm_settles_a_fully_paid_order() {
    let (state, orders) = state();
    orders.insert(pending_order("42")).await;

    let body = json!({
        "TransID": "RKTQDM7W6S",
        "TransTime": "20191122063845",
        "TransAmount": "1000.00",
        "BillRefNumber": "42",
        "MSISDN": "254712345678",
        "FirstName": "JOHN"
    })
    .to_string();
    let response = dispatch(&state, &query("confirm", None), &body).await;
    assert_eq!(response["ResultCode"], 0);

    let record = orders.find_by_id("42").await.unwrap().unwrap();
    assert_eq!(record.status, OrderStatus::Completed);
}

#[tokio::test]
async fn confirm_with_an_empty_body_reports_missing_data() {
    let (state, _) = state();
    let response = dispatch(&state, &query("confirm", None), "").await;
    assert_eq!(response["Error"], "No response data received");
}

#[tokio::test]
async fn timeout_action_resets_the_order() {
    let (state, orders) = state();
    orders.insert(pending_order("42")).await;
    orders.set_status("42", OrderStatus::OnHold).await.unwrap();

    let body = json!({
        "Body": {
            "stkCallback": {
                "MerchantRequestID": "mr-42",
                "ResultCode": 1037,
                "ResultDesc": "DS timeout"
            }
        }
    })
    .to_string();
    let response = dispatch(&state, &query("timeout", None), &body).await;
    assert_eq!(response["ResultCode"], 0);
    assert_eq!(
        orders.find_by_id("42").await.unwrap().unwrap().status,
        OrderStatus::Pending
    );
}

#[tokio::test]
async fn result_action_refunds_by_tracking_id() {
    let (state, orders) = state();
    let mut order = pending_order("42");
    order.status = OrderStatus::Completed;
    orders.insert(order).await;

    let body = json!({
        "Result": {
            "ResultType": 0,
            "ResultCode": 0,
            "ResultDesc": "The service request has been accepted successfully.",
            "OriginatorConversationID": "mr-42",
            "TransactionID": "LGR019G3J2"
        }
    })
    .to_string();
    let response = dispatch(&state, &query("result", None), &body).await;
    assert_eq!(response["ResultCode"], 0);

    let record = orders.find_by_id("42").await.unwrap().unwrap();
    assert_eq!(record.status, OrderStatus::Refunded);
    assert_eq!(record.transaction_id.as_deref(), Some("LGR019G3J2"));
}

#[tokio::test]
async fn request_without_an_order_is_an_error_ack() {
    let (state, _) = state();
    let response = dispatch(&state, &query("request", None), "{}").await;
    assert_eq!(response["Error"], "No order specified");

    let response = dispatch(
        &state,
        &query("request", None),
        &json!({ "order": "404" }).to_string(),
    )
    .await;
    assert_eq!(response["errorCode"], 1);
    assert_eq!(response["errorMessage"], "Order not found");
}

#[tokio::test]
async fn unknown_tenant_resolution_is_a_fault_body() {
    let (state, _) = state();
    let mut q = query("validate", None);
    q.tenant = Some(9);
    let response = dispatch(&state, &q, "").await;
    assert_eq!(response["errorCode"], 1);
}
