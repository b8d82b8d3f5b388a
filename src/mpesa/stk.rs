//! STK push (push-payment) initiation.
//!
//! Builds and signs the `processrequest` call: phone in international
//! format, `YYYYMMDDHHmmss` timestamp, password derived from the store
//! shortcode and passkey. The provider's answer is the
//! `{MerchantRequestID, CheckoutRequestID}` pair; persisting it on the
//! order is the caller's job.

use crate::mpesa::error::{MpesaError, MpesaResult};
use crate::mpesa::http::{provider_fault, MpesaHttpClient};
use crate::mpesa::tenant::TenantConfig;
use crate::mpesa::token::TokenCache;
use crate::mpesa::CallbackUrls;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::Local;
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::info;

/// Country prefix substituted for a leading `0`.
const COUNTRY_PREFIX: &str = "254";

/// `0712345678` -> `254712345678`, `+254712345678` -> `254712345678`.
pub fn normalize_phone(phone: &str) -> String {
    let stripped = phone.trim().replace('+', "");
    match stripped.strip_prefix('0') {
        Some(rest) => format!("{}{}", COUNTRY_PREFIX, rest),
        None => stripped,
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StkAccepted {
    #[serde(rename = "MerchantRequestID")]
    pub merchant_request_id: String,
    #[serde(rename = "CheckoutRequestID")]
    pub checkout_request_id: String,
    #[serde(rename = "ResponseDescription", default)]
    pub response_description: Option<String>,
    #[serde(rename = "CustomerMessage", default)]
    pub customer_message: Option<String>,
}

/// Injected store for the last outbound request body per account reference;
/// read back when a tenant runs in debug mode.
#[derive(Default)]
pub struct DebugStore {
    inner: Mutex<HashMap<String, JsonValue>>,
}

impl DebugStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, key: &str, body: JsonValue) {
        let mut inner = self.inner.lock().expect("debug store poisoned");
        inner.insert(key.to_string(), body);
    }

    pub fn last(&self, key: &str) -> Option<JsonValue> {
        let inner = self.inner.lock().expect("debug store poisoned");
        inner.get(key).cloned()
    }
}

pub struct StkClient {
    http: MpesaHttpClient,
    tokens: Arc<TokenCache>,
    urls: CallbackUrls,
    debug: Arc<DebugStore>,
}

impl StkClient {
    pub fn new(
        http: MpesaHttpClient,
        tokens: Arc<TokenCache>,
        urls: CallbackUrls,
        debug: Arc<DebugStore>,
    ) -> Self {
        Self {
            http,
            tokens,
            urls,
            debug,
        }
    }

    pub async fn initiate(
        &self,
        tenant: &TenantConfig,
        phone: &str,
        amount: f64,
        reference: &str,
        description: &str,
        remark: &str,
    ) -> MpesaResult<StkAccepted> {
        let token = self.tokens.get(tenant).await?;
        let phone = normalize_phone(phone);
        let timestamp = Local::now().format("%Y%m%d%H%M%S").to_string();
        let password = BASE64.encode(format!(
            "{}{}{}",
            tenant.head_office, tenant.passkey, timestamp
        ));

        let body = json!({
            "BusinessShortCode": tenant.head_office,
            "Password": password,
            "Timestamp": timestamp,
            "TransactionType": tenant.id_type.transaction_type(),
            "Amount": amount.round() as i64,
            "PartyA": phone,
            "PartyB": tenant.shortcode,
            "PhoneNumber": phone,
            "CallBackURL": self.urls.reconcile(tenant),
            "AccountReference": reference,
            "TransactionDesc": description,
            "Remark": remark,
        });
        if tenant.debug {
            self.debug.record(reference, body.clone());
        }

        let url = format!("{}/mpesa/stkpush/v1/processrequest", tenant.env.base_url());
        let raw = self.http.post_bearer(&url, token.bearer(), &body).await?;
        if let Some(fault) = provider_fault(&raw) {
            return Err(fault);
        }

        let accepted: StkAccepted =
            serde_json::from_value(raw).map_err(|e| MpesaError::MalformedPayload {
                message: format!("unexpected stkpush response: {}", e),
            })?;
        info!(
            tenant_id = tenant.tenant_id,
            merchant_request_id = %accepted.merchant_request_id,
            "STK push accepted"
        );
        Ok(accepted)
    }

    pub fn debug_request(&self, reference: &str) -> Option<JsonValue> {
        self.debug.last(reference)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_phone_gets_country_prefix() {
        assert_eq!(normalize_phone("0712345678"), "254712345678");
    }

    #[test]
    fn international_prefix_is_stripped() {
        assert_eq!(normalize_phone("+254712345678"), "254712345678");
    }

    #[test]
    fn already_normalized_numbers_pass_through() {
        assert_eq!(normalize_phone("254712345678"), "254712345678");
        assert_eq!(normalize_phone(" 254712345678 "), "254712345678");
    }

    #[test]
    fn debug_store_keeps_the_last_request_per_key() {
        let store = DebugStore::new();
        store.record("42", json!({ "Amount": 10 }));
        store.record("42", json!({ "Amount": 20 }));
        assert_eq!(store.last("42").unwrap()["Amount"], 20);
        assert!(store.last("43").is_none());
    }

    #[test]
    fn stk_accepted_decodes_provider_response() {
        let raw = json!({
            "MerchantRequestID": "29115-34620561-1",
            "CheckoutRequestID": "ws_CO_191220191020363925",
            "ResponseCode": "0",
            "ResponseDescription": "Success. Request accepted for processing",
            "CustomerMessage": "Success. Request accepted for processing"
        });
        let accepted: StkAccepted = serde_json::from_value(raw).unwrap();
        assert_eq!(accepted.merchant_request_id, "29115-34620561-1");
        assert_eq!(accepted.checkout_request_id, "ws_CO_191220191020363925");
    }
}
