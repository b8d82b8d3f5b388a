//! C2B (manual payment) surface: URL registration, validation and
//! confirmation acknowledgments, transaction status query and reversal.
//!
//! Reversal and status queries authenticate with a security credential:
//! the initiator password encrypted against the environment's public
//! certificate (PKCS1) and base64-encoded. If the certificate cannot be
//! read or encryption fails, no request leaves the process.

use crate::mpesa::error::{MpesaError, MpesaResult};
use crate::mpesa::http::{provider_fault, MpesaHttpClient};
use crate::mpesa::stk::normalize_phone;
use crate::mpesa::tenant::TenantConfig;
use crate::mpesa::token::TokenCache;
use crate::mpesa::CallbackUrls;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use openssl::rsa::Padding;
use openssl::x509::X509;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// Daraja receiver identifier used when reversing to the paying MSISDN.
pub const DEFAULT_RECEIVER_TYPE: u8 = 3;

/// Pluggable pre/post-transaction check, supplied by the caller.
pub type VerificationHook = dyn Fn(&JsonValue) -> bool + Send + Sync;

/// Synchronous `{ResultCode, ResultDesc}` acknowledgment the provider
/// requires from validation and confirmation endpoints.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct C2bAck {
    #[serde(rename = "ResultCode")]
    pub result_code: i64,
    #[serde(rename = "ResultDesc")]
    pub result_desc: String,
}

impl C2bAck {
    pub fn success() -> Self {
        Self {
            result_code: 0,
            result_desc: "Success".to_string(),
        }
    }

    pub fn failed() -> Self {
        Self {
            result_code: 1,
            result_desc: "Failed".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReversalAccepted {
    #[serde(rename = "OriginatorConversationID")]
    pub originator_conversation_id: String,
    #[serde(rename = "ConversationID", default)]
    pub conversation_id: Option<String>,
    #[serde(rename = "ResponseDescription", default)]
    pub response_description: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RegisterOutcome {
    pub success: bool,
    pub message: String,
}

pub struct C2bClient {
    http: MpesaHttpClient,
    tokens: Arc<TokenCache>,
    urls: CallbackUrls,
    cert_dir: PathBuf,
}

impl C2bClient {
    pub fn new(
        http: MpesaHttpClient,
        tokens: Arc<TokenCache>,
        urls: CallbackUrls,
        cert_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            http,
            tokens,
            urls,
            cert_dir: cert_dir.into(),
        }
    }

    /// Pre-transaction validation. The provider expects a fast ack; with no
    /// hook supplied every payment validates.
    pub fn validate(&self, payload: &JsonValue, hook: Option<&VerificationHook>) -> C2bAck {
        match hook {
            None => C2bAck::success(),
            Some(hook) if hook(payload) => C2bAck::success(),
            Some(_) => C2bAck::failed(),
        }
    }

    /// Post-transaction confirmation ack; same hook contract as `validate`.
    pub fn confirm(&self, payload: &JsonValue, hook: Option<&VerificationHook>) -> C2bAck {
        self.validate(payload, hook)
    }

    /// Tell the provider where to deliver C2B callbacks.
    pub async fn register_urls(&self, tenant: &TenantConfig) -> MpesaResult<RegisterOutcome> {
        let token = self.tokens.get(tenant).await?;
        let body = json!({
            "ShortCode": tenant.head_office,
            "ResponseType": "Cancelled",
            "ConfirmationURL": self.urls.confirm(tenant),
            "ValidationURL": self.urls.validate(tenant),
        });
        let url = format!("{}/mpesa/c2b/v1/registerurl", tenant.env.base_url());
        let raw = self.http.post_bearer(&url, token.bearer(), &body).await?;

        let outcome = match raw.get("ResponseDescription").and_then(|v| v.as_str()) {
            Some(description) => RegisterOutcome {
                success: true,
                message: description.to_string(),
            },
            None => RegisterOutcome {
                success: false,
                message: raw
                    .get("errorMessage")
                    .and_then(|v| v.as_str())
                    .unwrap_or("Could not register M-PESA URLs, try again later.")
                    .to_string(),
            },
        };
        info!(
            tenant_id = tenant.tenant_id,
            success = outcome.success,
            "C2B URL registration"
        );
        Ok(outcome)
    }

    /// Reverse a settled transaction. The provider confirms asynchronously
    /// through the `result`/`timeout` callbacks.
    #[allow(clippy::too_many_arguments)]
    pub async fn reverse(
        &self,
        tenant: &TenantConfig,
        transaction: &str,
        amount: i64,
        receiver: &str,
        receiver_type: u8,
        remarks: &str,
        occasion: &str,
    ) -> MpesaResult<ReversalAccepted> {
        // Fail closed: no credential, no request.
        let credential = self.security_credential(tenant)?;
        let token = self.tokens.get(tenant).await?;

        let body = json!({
            "CommandID": "TransactionReversal",
            "Initiator": tenant.initiator,
            "SecurityCredential": credential,
            "TransactionID": transaction,
            "Amount": amount,
            "ReceiverParty": normalize_phone(receiver),
            // Daraja's own field spelling.
            "RecieverIdentifierType": receiver_type,
            "ResultURL": self.urls.result(tenant),
            "QueueTimeOutURL": self.urls.timeout(tenant),
            "Remarks": remarks,
            "Occasion": occasion,
        });
        let url = format!("{}/mpesa/reversal/v1/request", tenant.env.base_url());
        let raw = self.http.post_bearer(&url, token.bearer(), &body).await?;
        if let Some(fault) = provider_fault(&raw) {
            warn!(tenant_id = tenant.tenant_id, transaction, "reversal rejected");
            return Err(fault);
        }
        serde_json::from_value(raw).map_err(|e| MpesaError::MalformedPayload {
            message: format!("unexpected reversal response: {}", e),
        })
    }

    /// Query a transaction's status; the answer arrives on the
    /// `result`/`timeout` callbacks, this returns the submission ack.
    pub async fn transaction_status(
        &self,
        tenant: &TenantConfig,
        transaction: &str,
    ) -> MpesaResult<JsonValue> {
        let credential = self.security_credential(tenant)?;
        let token = self.tokens.get(tenant).await?;

        let body = json!({
            "CommandID": "TransactionStatusQuery",
            "Initiator": tenant.initiator,
            "SecurityCredential": credential,
            "TransactionID": transaction,
            "PartyA": tenant.shortcode,
            "IdentifierType": tenant.id_type.code(),
            "ResultURL": self.urls.result(tenant),
            "QueueTimeOutURL": self.urls.timeout(tenant),
            "Remarks": "Transaction status query",
            "Occasion": "Transaction status query",
        });
        let url = format!(
            "{}/mpesa/transactionstatus/v1/query",
            tenant.env.base_url()
        );
        let raw = self.http.post_bearer(&url, token.bearer(), &body).await?;
        if let Some(fault) = provider_fault(&raw) {
            return Err(fault);
        }
        Ok(raw)
    }

    /// Initiator password encrypted with the environment certificate. The
    /// plaintext and ciphertext never reach logs or error messages.
    fn security_credential(&self, tenant: &TenantConfig) -> MpesaResult<String> {
        let path = self.cert_path(tenant);
        let pem = std::fs::read(&path).map_err(|e| MpesaError::Credential {
            message: format!("certificate unreadable at {}: {}", path.display(), e),
        })?;
        let cert = X509::from_pem(&pem).map_err(|_| MpesaError::Credential {
            message: format!("certificate at {} is not valid PEM", path.display()),
        })?;
        let rsa = cert
            .public_key()
            .and_then(|key| key.rsa())
            .map_err(|_| MpesaError::Credential {
                message: "certificate does not carry an RSA public key".to_string(),
            })?;

        let mut encrypted = vec![0u8; rsa.size() as usize];
        let written = rsa
            .public_encrypt(
                tenant.initiator_password.as_bytes(),
                &mut encrypted,
                Padding::PKCS1,
            )
            .map_err(|_| MpesaError::Credential {
                message: "initiator credential encryption failed".to_string(),
            })?;
        encrypted.truncate(written);
        Ok(BASE64.encode(encrypted))
    }

    fn cert_path(&self, tenant: &TenantConfig) -> PathBuf {
        Path::new(&self.cert_dir)
            .join(tenant.env.as_str())
            .join("cert.cer")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mpesa::tenant::test_tenant;
    use crate::mpesa::token::{HttpTokenFetcher, TokenCache};
    use std::time::Duration;

    fn client(cert_dir: &str) -> C2bClient {
        let http = MpesaHttpClient::new(Duration::from_secs(5)).unwrap();
        let tokens = Arc::new(TokenCache::new(Arc::new(HttpTokenFetcher::new(
            http.clone(),
        ))));
        C2bClient::new(
            http,
            tokens,
            CallbackUrls::new("https://shop.example.com"),
            cert_dir,
        )
    }

    #[test]
    fn validate_without_hook_always_succeeds() {
        let client = client("certs");
        let ack = client.validate(&json!({ "TransAmount": "50" }), None);
        assert_eq!(ack, C2bAck::success());
    }

    #[test]
    fn failing_hook_yields_result_code_one() {
        let client = client("certs");
        let reject: Box<VerificationHook> = Box::new(|_payload| false);
        let ack = client.confirm(&json!({}), Some(reject.as_ref()));
        assert_eq!(ack.result_code, 1);
        assert_eq!(ack.result_desc, "Failed");
    }

    #[test]
    fn hook_sees_the_payload() {
        let client = client("certs");
        let require_ref: Box<VerificationHook> =
            Box::new(|payload| payload.get("BillRefNumber").is_some());
        assert_eq!(
            client
                .validate(&json!({ "BillRefNumber": "42" }), Some(require_ref.as_ref()))
                .result_code,
            0
        );
        assert_eq!(
            client.validate(&json!({}), Some(require_ref.as_ref())).result_code,
            1
        );
    }

    #[tokio::test]
    async fn reversal_fails_closed_without_a_certificate() {
        let client = client("/nonexistent-cert-dir");
        let tenant = test_tenant();
        let err = client
            .reverse(&tenant, "LGR019G3J2", 1000, "0712345678", 3, "r", "r")
            .await
            .unwrap_err();
        assert!(matches!(err, MpesaError::Credential { .. }));
        assert!(!err.to_string().contains(&tenant.initiator_password));
    }
}
