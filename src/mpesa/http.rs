//! Thin outbound JSON client for the Daraja endpoints.
//!
//! Daraja reports application errors in the response body (`errorCode` /
//! `errorMessage`) on non-2xx statuses, so the client decodes the body
//! regardless of status and leaves fault detection to the callers.
//! Network-level failures become `Transport { errorCode: 1, .. }` values,
//! which callers treat exactly like provider-reported errors.

use crate::mpesa::error::{MpesaError, MpesaResult};
use reqwest::Client;
use serde_json::Value as JsonValue;
use std::time::Duration;

#[derive(Clone)]
pub struct MpesaHttpClient {
    client: Client,
}

impl MpesaHttpClient {
    pub fn new(timeout: Duration) -> MpesaResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| MpesaError::transport(format!("failed to initialize HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    pub async fn get_basic(
        &self,
        url: &str,
        username: &str,
        password: &str,
    ) -> MpesaResult<JsonValue> {
        let response = self
            .client
            .get(url)
            .basic_auth(username, Some(password))
            .send()
            .await
            .map_err(|e| MpesaError::transport(format!("provider request failed: {}", e)))?;
        Self::decode(response).await
    }

    pub async fn post_bearer(
        &self,
        url: &str,
        bearer_token: &str,
        body: &JsonValue,
    ) -> MpesaResult<JsonValue> {
        let response = self
            .client
            .post(url)
            .bearer_auth(bearer_token)
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| MpesaError::transport(format!("provider request failed: {}", e)))?;
        Self::decode(response).await
    }

    async fn decode(response: reqwest::Response) -> MpesaResult<JsonValue> {
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| MpesaError::transport(format!("provider response unreadable: {}", e)))?;
        serde_json::from_str(&text).map_err(|_| {
            MpesaError::transport(format!("invalid provider JSON response (HTTP {})", status))
        })
    }
}

/// Application-level fault reported by Daraja in the response body.
pub fn provider_fault(body: &JsonValue) -> Option<MpesaError> {
    let code = body.get("errorCode")?;
    let error_code = match code {
        JsonValue::String(s) => s.clone(),
        other => other.to_string(),
    };
    let error_message = body
        .get("errorMessage")
        .and_then(|v| v.as_str())
        .unwrap_or("provider rejected the request")
        .to_string();
    Some(MpesaError::Provider {
        error_code,
        error_message,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn fault_detection_reads_error_code_and_message() {
        let body = json!({
            "requestId": "4231-1-1",
            "errorCode": "404.001.03",
            "errorMessage": "Invalid Access Token"
        });
        match provider_fault(&body) {
            Some(MpesaError::Provider {
                error_code,
                error_message,
            }) => {
                assert_eq!(error_code, "404.001.03");
                assert_eq!(error_message, "Invalid Access Token");
            }
            other => panic!("unexpected fault: {:?}", other),
        }
    }

    #[test]
    fn clean_responses_are_not_faults() {
        let body = json!({ "MerchantRequestID": "29115-34620561-1" });
        assert!(provider_fault(&body).is_none());
    }
}
