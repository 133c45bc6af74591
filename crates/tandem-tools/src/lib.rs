pub mod builtin;
pub mod catalog;
pub mod registry;

pub use builtin::keys;
pub use catalog::{StaticCatalog, StaticInventory, StaticRates};
pub use registry::{execute_with_timeout, ToolRegistry};

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Arc;

    use tandem_core::order::Order;
    use tandem_core::state::StateMap;
    use tandem_core::traits::{Capabilities, OrderStore};
    use tandem_core::types::{SessionId, ToolContext};
    use tandem_store::MemoryOrderStore;

    use crate::catalog::{StaticCatalog, StaticInventory, StaticRates};
    use crate::keys;

    /// Context with every capability backed by the built-in data and an
    /// empty order store.
    pub fn context() -> ToolContext {
        ToolContext {
            session_id: SessionId::new(),
            state: StateMap::new(),
            capabilities: Capabilities::new()
                .with_catalog(Arc::new(StaticCatalog::builtin()))
                .with_rates(Arc::new(StaticRates::builtin()))
                .with_inventory(Arc::new(StaticInventory::builtin()))
                .with_orders(Arc::new(MemoryOrderStore::new())),
        }
    }

    /// Context whose session already holds ORDER_1001 with the given cart.
    pub async fn context_with_order(cart: &[&str]) -> ToolContext {
        let mut ctx = context();
        let orders = ctx.capabilities.orders().unwrap().clone();
        let id = orders.next_order_id().await.unwrap();
        let mut order = Order::new(&id);
        for item in cart {
            order.add_item(*item).unwrap();
        }
        orders.put_order(order).await.unwrap();
        ctx.state.insert(keys::ORDER_ID.into(), serde_json::json!(id));
        ctx
    }
}
