//! Daraja client stack: token lifecycle, STK push, C2B and reversal.

pub mod c2b;
pub mod error;
pub mod http;
pub mod stk;
pub mod tenant;
pub mod token;
pub mod wire;

use tenant::TenantConfig;

/// Builder for this engine's own public callback endpoints, handed to the
/// provider in outbound requests.
#[derive(Debug, Clone)]
pub struct CallbackUrls {
    base: String,
}

impl CallbackUrls {
    pub fn new(public_base_url: impl Into<String>) -> Self {
        let mut base = public_base_url.into();
        while base.ends_with('/') {
            base.pop();
        }
        Self { base }
    }

    pub fn validate(&self, tenant: &TenantConfig) -> String {
        self.action_url("validate", tenant)
    }

    pub fn confirm(&self, tenant: &TenantConfig) -> String {
        self.action_url("confirm", tenant)
    }

    pub fn reconcile(&self, tenant: &TenantConfig) -> String {
        self.action_url("reconcile", tenant)
    }

    pub fn result(&self, tenant: &TenantConfig) -> String {
        self.action_url("result", tenant)
    }

    pub fn timeout(&self, tenant: &TenantConfig) -> String {
        self.action_url("timeout", tenant)
    }

    fn action_url(&self, action: &str, tenant: &TenantConfig) -> String {
        format!(
            "{}/lipwa?action={}&sign={}&tenant={}",
            self.base, action, tenant.signature, tenant.tenant_id
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mpesa::tenant::test_tenant;

    #[test]
    fn urls_carry_action_signature_and_tenant() {
        let urls = CallbackUrls::new("https://shop.example.com/");
        let tenant = test_tenant();
        assert_eq!(
            urls.reconcile(&tenant),
            "https://shop.example.com/lipwa?action=reconcile&sign=sekrit&tenant=0"
        );
        assert!(urls.validate(&tenant).contains("action=validate"));
        assert!(urls.timeout(&tenant).contains("action=timeout"));
    }
}
