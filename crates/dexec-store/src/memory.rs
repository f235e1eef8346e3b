//! In-memory store used by tests and DB-less development runs.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use dexec_schemas::Order;

use crate::{apply_patch, OrderPatch, OrderStore, StoreError};

/// `HashMap` behind a mutex. The lock is never held across an await point, so
/// per-id update serialization falls out of the map lock itself.
#[derive(Debug, Default)]
pub struct MemoryOrderStore {
    orders: Mutex<HashMap<Uuid, Order>>,
}

impl MemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored orders (test introspection).
    pub fn len(&self) -> usize {
        self.orders.lock().expect("order map poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl OrderStore for MemoryOrderStore {
    async fn save(&self, order: &Order) -> Result<(), StoreError> {
        let mut orders = self.orders.lock().expect("order map poisoned");
        if orders.contains_key(&order.order_id) {
            return Err(StoreError::Conflict(order.order_id));
        }
        orders.insert(order.order_id, order.clone());
        Ok(())
    }

    async fn update(&self, order_id: Uuid, patch: OrderPatch) -> Result<(), StoreError> {
        let mut orders = self.orders.lock().expect("order map poisoned");
        // Unknown id: silent no-op per the store contract.
        if let Some(order) = orders.get_mut(&order_id) {
            apply_patch(order, patch, Utc::now());
        }
        Ok(())
    }

    async fn get(&self, order_id: Uuid) -> Result<Option<Order>, StoreError> {
        let orders = self.orders.lock().expect("order map poisoned");
        Ok(orders.get(&order_id).cloned())
    }
}
