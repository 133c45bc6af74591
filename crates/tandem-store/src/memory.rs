use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use futures::future::BoxFuture;
use tokio::sync::Mutex;

use tandem_core::error::{Result, TandemError};
use tandem_core::order::Order;
use tandem_core::traits::OrderStore;

/// First order number handed out is one past this.
pub const ORDER_SEQUENCE_START: u64 = 1000;

/// Process-local order store.
pub struct MemoryOrderStore {
    orders: Mutex<BTreeMap<String, Order>>,
    counter: AtomicU64,
}

impl MemoryOrderStore {
    pub fn new() -> Self {
        Self {
            orders: Mutex::new(BTreeMap::new()),
            counter: AtomicU64::new(ORDER_SEQUENCE_START),
        }
    }

    /// Seed the store with existing orders, e.g. fixtures.
    pub fn with_orders(orders: impl IntoIterator<Item = Order>) -> Self {
        let map = orders
            .into_iter()
            .map(|o| (o.order_id.clone(), o))
            .collect();
        Self {
            orders: Mutex::new(map),
            counter: AtomicU64::new(ORDER_SEQUENCE_START),
        }
    }
}

impl Default for MemoryOrderStore {
    fn default() -> Self {
        Self::new()
    }
}

impl OrderStore for MemoryOrderStore {
    fn get_order(&self, order_id: &str) -> BoxFuture<'_, Result<Option<Order>>> {
        let order_id = order_id.to_string();
        Box::pin(async move { Ok(self.orders.lock().await.get(&order_id).cloned()) })
    }

    fn put_order(&self, order: Order) -> BoxFuture<'_, Result<Order>> {
        Box::pin(async move {
            let mut orders = self.orders.lock().await;
            let found = orders.get(&order.order_id).map(|o| o.version).unwrap_or(0);
            if found != order.version {
                return Err(TandemError::VersionConflict {
                    order_id: order.order_id,
                    expected: order.version,
                    found,
                });
            }
            let mut stored = order;
            stored.version += 1;
            orders.insert(stored.order_id.clone(), stored.clone());
            Ok(stored)
        })
    }

    fn next_order_id(&self) -> BoxFuture<'_, Result<String>> {
        Box::pin(async move {
            let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(format!("ORDER_{}", n))
        })
    }

    fn list_orders(&self) -> BoxFuture<'_, Result<Vec<Order>>> {
        Box::pin(async move { Ok(self.orders.lock().await.values().cloned().collect()) })
    }
}
