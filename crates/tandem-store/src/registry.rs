use std::sync::Arc;

use tracing::{debug, warn};

use tandem_core::error::{Result, TandemError};
use tandem_core::order::Order;
use tandem_core::traits::OrderStore;

const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Read-modify-write access to an [`OrderStore`].
///
/// Concurrent updates to the same order are serialized by the store's version
/// check; `modify` re-reads and retries when its write loses the race.
#[derive(Clone)]
pub struct OrderRegistry {
    store: Arc<dyn OrderStore>,
    max_attempts: u32,
}

impl OrderRegistry {
    pub fn new(store: Arc<dyn OrderStore>) -> Self {
        Self {
            store,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Allocate a fresh id and store an empty order under it.
    pub async fn create(&self) -> Result<Order> {
        let order_id = self.store.next_order_id().await?;
        let order = self.store.put_order(Order::new(order_id)).await?;
        debug!(order_id = %order.order_id, "Order created");
        Ok(order)
    }

    /// Load an order, failing with `OrderNotFound` if it does not exist.
    pub async fn fetch(&self, order_id: &str) -> Result<Order> {
        self.store
            .get_order(order_id)
            .await?
            .ok_or_else(|| TandemError::OrderNotFound(order_id.to_string()))
    }

    /// Apply `f` to the current order and store the result.
    ///
    /// `f` may run more than once if another writer updates the order
    /// concurrently. An error from `f` aborts without writing.
    pub async fn modify<F, T>(&self, order_id: &str, mut f: F) -> Result<(Order, T)>
    where
        F: FnMut(&mut Order) -> Result<T>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let mut order = self.fetch(order_id).await?;
            let value = f(&mut order)?;
            match self.store.put_order(order).await {
                Ok(stored) => return Ok((stored, value)),
                Err(e @ TandemError::VersionConflict { .. }) => {
                    if attempt >= self.max_attempts {
                        warn!(order_id, attempt, "Giving up on contended order update");
                        return Err(e);
                    }
                    debug!(order_id, attempt, "Order changed underneath update, retrying");
                }
                Err(e) => return Err(e),
            }
        }
    }

    pub fn store(&self) -> &Arc<dyn OrderStore> {
        &self.store
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryOrderStore;
    use futures::future::BoxFuture;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tandem_core::error::ErrorKind;
    use tandem_core::order::OrderStatus;

    fn registry() -> OrderRegistry {
        OrderRegistry::new(Arc::new(MemoryOrderStore::new()))
    }

    #[tokio::test]
    async fn test_create_and_fetch() {
        let reg = registry();
        let order = reg.create().await.unwrap();
        assert_eq!(order.order_id, "ORDER_1001");
        assert_eq!(order.status, OrderStatus::None);
        assert_eq!(reg.fetch("ORDER_1001").await.unwrap(), order);
    }

    #[tokio::test]
    async fn test_fetch_unknown_is_not_found() {
        let err = registry().fetch("ORDER_404").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_modify_error_does_not_write() {
        let reg = registry();
        let order = reg.create().await.unwrap();
        let err = reg
            .modify(&order.order_id, |o| o.approve())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
        assert_eq!(reg.fetch(&order.order_id).await.unwrap().version, 1);
    }

    #[tokio::test]
    async fn test_concurrent_adds_all_land() {
        let reg = registry();
        let id = reg.create().await.unwrap().order_id;

        let mut handles = Vec::new();
        for i in 0..8 {
            let reg = reg.clone().with_max_attempts(64);
            let id = id.clone();
            handles.push(tokio::spawn(async move {
                reg.modify(&id, |o| o.add_item(format!("P{:03}", i))).await
            }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }

        let order = reg.fetch(&id).await.unwrap();
        assert_eq!(order.cart.len(), 8);
        assert_eq!(order.version, 9);
    }

    /// Store whose writes always lose the race.
    struct AlwaysStale {
        inner: MemoryOrderStore,
        writes: AtomicU32,
    }

    impl OrderStore for AlwaysStale {
        fn get_order(&self, id: &str) -> BoxFuture<'_, Result<Option<Order>>> {
            self.inner.get_order(id)
        }
        fn put_order(&self, order: Order) -> BoxFuture<'_, Result<Order>> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move {
                Err(TandemError::VersionConflict {
                    order_id: order.order_id,
                    expected: order.version,
                    found: order.version + 1,
                })
            })
        }
        fn next_order_id(&self) -> BoxFuture<'_, Result<String>> {
            self.inner.next_order_id()
        }
        fn list_orders(&self) -> BoxFuture<'_, Result<Vec<Order>>> {
            self.inner.list_orders()
        }
    }

    #[tokio::test]
    async fn test_modify_gives_up_after_max_attempts() {
        let store = Arc::new(AlwaysStale {
            inner: MemoryOrderStore::with_orders([Order::new("ORDER_1")]),
            writes: AtomicU32::new(0),
        });
        let reg = OrderRegistry::new(store.clone()).with_max_attempts(3);
        let err = reg.modify("ORDER_1", |o| o.add_item("P001")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert_eq!(store.writes.load(Ordering::SeqCst), 3);
    }
}
