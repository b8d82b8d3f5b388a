//! In-memory `OrderGateway` adapter.
//!
//! Used by the test suite and the default wiring when no external order
//! system is attached. Mutations take the write lock for the whole call, so
//! each gateway call is atomic.

use crate::orders::{OrderError, OrderGateway, OrderRecord, OrderStatus};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
struct StoredOrder {
    record: OrderRecord,
    notes: Vec<String>,
}

#[derive(Default)]
pub struct InMemoryOrderGateway {
    inner: RwLock<HashMap<String, StoredOrder>>,
}

impl InMemoryOrderGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, record: OrderRecord) {
        let mut inner = self.inner.write().await;
        inner.insert(
            record.id.clone(),
            StoredOrder {
                record,
                notes: Vec::new(),
            },
        );
    }

    pub async fn notes(&self, id: &str) -> Vec<String> {
        let inner = self.inner.read().await;
        inner
            .get(id)
            .map(|stored| stored.notes.clone())
            .unwrap_or_default()
    }

    async fn mutate<F>(&self, id: &str, apply: F) -> Result<(), OrderError>
    where
        F: FnOnce(&mut StoredOrder),
    {
        let mut inner = self.inner.write().await;
        let stored = inner
            .get_mut(id)
            .ok_or_else(|| OrderError::NotFound(id.to_string()))?;
        apply(stored);
        Ok(())
    }
}

#[async_trait]
impl OrderGateway for InMemoryOrderGateway {
    async fn find_by_id(&self, id: &str) -> Result<Option<OrderRecord>, OrderError> {
        let inner = self.inner.read().await;
        Ok(inner.get(id).map(|stored| stored.record.clone()))
    }

    async fn find_by_tracking_id(
        &self,
        tracking_id: &str,
    ) -> Result<Option<OrderRecord>, OrderError> {
        let inner = self.inner.read().await;
        Ok(inner
            .values()
            .find(|stored| stored.record.tracking_id.as_deref() == Some(tracking_id))
            .map(|stored| stored.record.clone()))
    }

    async fn set_status(&self, id: &str, status: OrderStatus) -> Result<(), OrderError> {
        self.mutate(id, |stored| stored.record.status = status).await
    }

    async fn set_transaction_id(&self, id: &str, transaction_id: &str) -> Result<(), OrderError> {
        self.mutate(id, |stored| {
            stored.record.transaction_id = Some(transaction_id.to_string())
        })
        .await
    }

    async fn set_tracking_id(&self, id: &str, tracking_id: &str) -> Result<(), OrderError> {
        self.mutate(id, |stored| {
            stored.record.tracking_id = Some(tracking_id.to_string())
        })
        .await
    }

    async fn add_note(&self, id: &str, note: &str) -> Result<(), OrderError> {
        self.mutate(id, |stored| stored.notes.push(note.to_string()))
            .await
    }

    async fn latest_note(&self, id: &str) -> Result<Option<String>, OrderError> {
        let inner = self.inner.read().await;
        Ok(inner
            .get(id)
            .and_then(|stored| stored.notes.last().cloned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order(id: &str) -> OrderRecord {
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

    #[tokio::test]
    async fn lookup_by_tracking_id_finds_the_order() {
        let gateway = InMemoryOrderGateway::new();
        gateway.insert(order("42")).await;

        let found = gateway.find_by_tracking_id("mr-42").await.unwrap();
        assert_eq!(found.unwrap().id, "42");
        assert!(gateway.find_by_tracking_id("mr-43").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn mutations_are_visible_in_later_snapshots() {
        let gateway = InMemoryOrderGateway::new();
        gateway.insert(order("42")).await;

        gateway
            .set_status("42", OrderStatus::Completed)
            .await
            .unwrap();
        gateway.set_transaction_id("42", "ABC123").await.unwrap();
        gateway.add_note("42", "paid in full").await.unwrap();

        let record = gateway.find_by_id("42").await.unwrap().unwrap();
        assert_eq!(record.status, OrderStatus::Completed);
        assert_eq!(record.transaction_id.as_deref(), Some("ABC123"));
        assert_eq!(
            gateway.latest_note("42").await.unwrap().as_deref(),
            Some("paid in full")
        );
    }

    #[tokio::test]
    async fn mutating_a_missing_order_errors() {
        let gateway = InMemoryOrderGateway::new();
        let err = gateway.set_status("99", OrderStatus::Failed).await;
        assert!(matches!(err, Err(OrderError::NotFound(_))));
    }
}
