//! Per-tenant Daraja credentials and endpoints.
//!
//! A `TenantConfig` is resolved once per request and passed explicitly into
//! every client call; nothing in this module reads ambient process state.

use crate::mpesa::error::{MpesaError, MpesaResult};
use crate::orders::OrderStatus;
use async_trait::async_trait;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Sandbox,
    Live,
}

impl Environment {
    pub fn base_url(&self) -> &'static str {
        match self {
            Environment::Sandbox => "https://sandbox.safaricom.co.ke",
            Environment::Live => "https://api.safaricom.co.ke",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Sandbox => "sandbox",
            Environment::Live => "live",
        }
    }
}

impl FromStr for Environment {
    type Err = MpesaError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "sandbox" => Ok(Environment::Sandbox),
            "live" | "production" => Ok(Environment::Live),
            _ => Err(MpesaError::Credential {
                message: format!("unknown environment: {}", value),
            }),
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Daraja organization identifier type. The numeric codes are the
/// provider's, not ours.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentifierType {
    Till,
    Paybill,
}

impl IdentifierType {
    pub fn code(&self) -> u8 {
        match self {
            IdentifierType::Till => 2,
            IdentifierType::Paybill => 4,
        }
    }

    /// STK push `TransactionType` for this identifier.
    pub fn transaction_type(&self) -> &'static str {
        match self {
            IdentifierType::Paybill => "CustomerPayBillOnline",
            IdentifierType::Till => "BuyGoodsOnline",
        }
    }
}

impl FromStr for IdentifierType {
    type Err = MpesaError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "till" | "2" => Ok(IdentifierType::Till),
            "paybill" | "4" => Ok(IdentifierType::Paybill),
            _ => Err(MpesaError::Credential {
                message: format!("unknown identifier type: {}", value),
            }),
        }
    }
}

/// Resolved credential bundle for one merchant/vendor. Immutable once
/// resolved; tenant 0 is the default (no marketplace) tenant.
#[derive(Clone)]
pub struct TenantConfig {
    pub tenant_id: u64,
    pub env: Environment,
    pub app_key: String,
    pub app_secret: String,
    /// Head-office/store shortcode used for credentials and registration.
    pub head_office: String,
    /// Business till/paybill customers actually pay into.
    pub shortcode: String,
    pub id_type: IdentifierType,
    pub passkey: String,
    pub initiator: String,
    pub initiator_password: String,
    /// Account reference template; empty means "use the order id".
    pub account_reference: String,
    /// Per-tenant webhook signing secret.
    pub signature: String,
    pub completion_status: OrderStatus,
    pub trading_name: String,
    pub debug: bool,
}

impl TenantConfig {
    pub fn account_reference_for(&self, order_id: &str) -> String {
        if self.account_reference.trim().is_empty() {
            order_id.to_string()
        } else {
            self.account_reference.clone()
        }
    }

    /// Constant-time comparison against the configured signing secret.
    pub fn signature_matches(&self, sign: &str) -> bool {
        secure_eq(self.signature.as_bytes(), sign.trim().as_bytes())
    }
}

// Credentials must never end up in logs; Debug prints identifiers only.
impl fmt::Debug for TenantConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TenantConfig")
            .field("tenant_id", &self.tenant_id)
            .field("env", &self.env)
            .field("head_office", &self.head_office)
            .field("shortcode", &self.shortcode)
            .field("id_type", &self.id_type)
            .field("app_secret", &"<redacted>")
            .field("passkey", &"<redacted>")
            .field("initiator_password", &"<redacted>")
            .field("signature", &"<redacted>")
            .finish()
    }
}

pub fn secure_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter()
        .zip(b.iter())
        .fold(0_u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}

/// External collaborator: given a tenant id, produce its credential bundle.
#[async_trait]
pub trait TenantResolver: Send + Sync {
    async fn resolve(&self, tenant_id: u64) -> MpesaResult<TenantConfig>;
}

/// Single-tenant resolver backed by the process configuration.
pub struct StaticTenantResolver {
    default: TenantConfig,
}

impl StaticTenantResolver {
    pub fn new(default: TenantConfig) -> Self {
        Self { default }
    }
}

#[async_trait]
impl TenantResolver for StaticTenantResolver {
    async fn resolve(&self, tenant_id: u64) -> MpesaResult<TenantConfig> {
        if tenant_id == 0 || tenant_id == self.default.tenant_id {
            return Ok(self.default.clone());
        }
        Err(MpesaError::Auth {
            message: format!("no credentials configured for tenant {}", tenant_id),
        })
    }
}

#[cfg(test)]
pub(crate) fn test_tenant() -> TenantConfig {
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
        initiator_password: "lipia".to_string(),
        account_reference: String::new(),
        signature: "sekrit".to_string(),
        completion_status: OrderStatus::Completed,
        trading_name: "Duka".to_string(),
        debug: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_comparison_is_exact() {
        let tenant = test_tenant();
        assert!(tenant.signature_matches("sekrit"));
        assert!(tenant.signature_matches(" sekrit "));
        assert!(!tenant.signature_matches("sekrit2"));
        assert!(!tenant.signature_matches(""));
    }

    #[test]
    fn account_reference_falls_back_to_order_id() {
        let mut tenant = test_tenant();
        assert_eq!(tenant.account_reference_for("883"), "883");
        tenant.account_reference = "DUKA".to_string();
        assert_eq!(tenant.account_reference_for("883"), "DUKA");
    }

    #[test]
    fn identifier_type_maps_to_transaction_type() {
        assert_eq!(
            IdentifierType::Paybill.transaction_type(),
            "CustomerPayBillOnline"
        );
        assert_eq!(IdentifierType::Till.transaction_type(), "BuyGoodsOnline");
        assert!(matches!(
            IdentifierType::from_str("4"),
            Ok(IdentifierType::Paybill)
        ));
    }

    #[test]
    fn debug_output_redacts_credentials() {
        let rendered = format!("{:?}", test_tenant());
        assert!(rendered.contains("<redacted>"));
        assert!(!rendered.contains("lipia"));
        assert!(!rendered.contains("sekrit"));
    }

    #[tokio::test]
    async fn static_resolver_serves_default_tenant_only() {
        let resolver = StaticTenantResolver::new(test_tenant());
        assert!(resolver.resolve(0).await.is_ok());
        assert!(resolver.resolve(7).await.is_err());
    }
}
