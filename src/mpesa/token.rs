//! Bearer token lifecycle.
//!
//! Provider tokens are valid for roughly an hour; we cache them for 55
//! minutes per tenant and make acquisition single-flight: the per-tenant
//! slot mutex is held across the credential exchange, and waiters re-check
//! the slot after acquiring it so a concurrently fetched token is reused
//! instead of clobbered. Failures are never cached.

use crate::mpesa::error::{MpesaError, MpesaResult};
use crate::mpesa::http::{provider_fault, MpesaHttpClient};
use crate::mpesa::tenant::TenantConfig;
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::debug;

pub const TOKEN_TTL: Duration = Duration::from_secs(55 * 60);

#[derive(Clone)]
pub struct AccessToken {
    value: String,
    expires_at: Instant,
}

impl AccessToken {
    pub fn new(value: impl Into<String>, ttl: Duration) -> Self {
        Self {
            value: value.into(),
            expires_at: Instant::now() + ttl,
        }
    }

    pub fn bearer(&self) -> &str {
        &self.value
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("value", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

#[async_trait]
pub trait TokenFetcher: Send + Sync {
    async fn fetch(&self, tenant: &TenantConfig) -> MpesaResult<AccessToken>;
}

/// Credential exchange against `/oauth/v1/generate`.
pub struct HttpTokenFetcher {
    http: MpesaHttpClient,
}

impl HttpTokenFetcher {
    pub fn new(http: MpesaHttpClient) -> Self {
        Self { http }
    }
}

#[async_trait]
impl TokenFetcher for HttpTokenFetcher {
    async fn fetch(&self, tenant: &TenantConfig) -> MpesaResult<AccessToken> {
        let url = format!(
            "{}/oauth/v1/generate?grant_type=client_credentials",
            tenant.env.base_url()
        );
        let body = self
            .http
            .get_basic(&url, &tenant.app_key, &tenant.app_secret)
            .await
            .map_err(|e| MpesaError::Auth {
                message: e.to_string(),
            })?;
        if let Some(fault) = provider_fault(&body) {
            return Err(MpesaError::Auth {
                message: fault.to_string(),
            });
        }
        let token = body
            .get("access_token")
            .and_then(|v| v.as_str())
            .ok_or_else(|| MpesaError::Auth {
                message: "token endpoint returned no access_token".to_string(),
            })?;
        Ok(AccessToken::new(token, TOKEN_TTL))
    }
}

type TokenSlot = Arc<tokio::sync::Mutex<Option<AccessToken>>>;

pub struct TokenCache {
    fetcher: Arc<dyn TokenFetcher>,
    slots: Mutex<HashMap<u64, TokenSlot>>,
}

impl TokenCache {
    pub fn new(fetcher: Arc<dyn TokenFetcher>) -> Self {
        Self {
            fetcher,
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub async fn get(&self, tenant: &TenantConfig) -> MpesaResult<AccessToken> {
        let slot = self.slot_for(tenant.tenant_id);
        // Holding the slot lock across the exchange is the single-flight
        // critical section; the outer map lock is never held across an await.
        let mut cached = slot.lock().await;
        if let Some(token) = cached.as_ref() {
            if !token.is_expired() {
                return Ok(token.clone());
            }
        }

        debug!(tenant_id = tenant.tenant_id, "access token refresh");
        let fresh = self.fetcher.fetch(tenant).await?;
        *cached = Some(fresh.clone());
        Ok(fresh)
    }

    fn slot_for(&self, tenant_id: u64) -> TokenSlot {
        let mut slots = self.slots.lock().expect("token slot map poisoned");
        slots.entry(tenant_id).or_default().clone()
    }
}
