//! The shop workflows, assembled from the built-in tools.

mod cart;
mod fulfillment;
mod search;

use tandem_core::config::AppConfig;
use tandem_core::error::Result;
use tandem_core::state::StateMap;
use tandem_core::types::Payload;
use tandem_tools::ToolRegistry;

use crate::leaf::ToolStep;
use crate::parallel::Parallel;
use crate::step::Step;

/// Builds workflow step trees over a tool registry.
pub struct Workflows<'a> {
    tools: &'a ToolRegistry,
    config: &'a AppConfig,
}

impl<'a> Workflows<'a> {
    pub fn new(tools: &'a ToolRegistry, config: &'a AppConfig) -> Self {
        Self { tools, config }
    }

    /// Look up a workflow by name.
    pub fn by_name(&self, name: &str) -> Option<Result<Step>> {
        match name {
            "fulfillment" => Some(self.fulfillment()),
            "approve" => Some(self.approve()),
            "advance" => Some(self.advance()),
            "cart" => Some(self.cart()),
            "search" => Some(self.search()),
            _ => None,
        }
    }

    /// Mark a priced order as placed. Input: an order id, or nothing to use
    /// the session's order.
    pub fn approve(&self) -> Result<Step> {
        Ok(Step::leaf(self.tool("approve_order")?.with_args(order_ref_args)))
    }

    /// Move a placed order one fulfillment stage along.
    pub fn advance(&self) -> Result<Step> {
        Ok(Step::leaf(self.tool("advance_order")?.with_args(order_ref_args)))
    }

    fn tool(&self, name: &str) -> Result<ToolStep> {
        ToolStep::from_registry(self.tools, name)
    }

    fn parallel(&self, name: &str, branches: Vec<Step>) -> Parallel {
        let engine = &self.config.engine;
        Parallel::new(name, branches)
            .with_fan_out(engine.fan_out)
            .with_merge(engine.merge)
            .with_max_concurrency(engine.max_parallel)
    }
}

/// Plain text input names a field; structured input passes through.
fn text_as(field: &str, input: &Payload) -> serde_json::Value {
    match input {
        Payload::Data(v) if v.is_object() => v.clone(),
        Payload::Text(s) if !s.trim().is_empty() => match serde_json::from_str::<serde_json::Value>(s) {
            Ok(v) if v.is_object() => v,
            _ => serde_json::json!({ field: s.trim() }),
        },
        _ => serde_json::json!({}),
    }
}

fn order_ref_args(input: &Payload, _state: &StateMap) -> Result<serde_json::Value> {
    Ok(text_as("order_id", input))
}

#[cfg(test)]
pub(crate) mod fixtures {
    use std::sync::Arc;

    use tandem_core::config::AppConfig;
    use tandem_core::order::Order;
    use tandem_core::traits::{Capabilities, OrderStore};
    use tandem_store::MemoryOrderStore;
    use tandem_tools::{StaticCatalog, StaticInventory, StaticRates, ToolRegistry};

    use crate::runner::Runner;

    pub struct Shop {
        pub config: AppConfig,
        pub tools: ToolRegistry,
        pub orders: Arc<MemoryOrderStore>,
        pub runner: Runner,
    }

    pub fn shop() -> Shop {
        let config = AppConfig::default();
        let orders = Arc::new(MemoryOrderStore::new());
        let capabilities = Capabilities::new()
            .with_catalog(Arc::new(StaticCatalog::builtin()))
            .with_rates(Arc::new(StaticRates::builtin()))
            .with_inventory(Arc::new(StaticInventory::builtin()))
            .with_orders(orders.clone());
        Shop {
            tools: ToolRegistry::with_builtins(&config.shop),
            config,
            orders,
            runner: Runner::new(capabilities),
        }
    }

    impl Shop {
        /// Store a fresh order holding `cart` and return its id.
        pub async fn order_with(&self, cart: &[&str]) -> String {
            let id = self.orders.next_order_id().await.unwrap();
            let mut order = Order::new(&id);
            for item in cart {
                order.add_item(*item).unwrap();
            }
            self.orders.put_order(order).await.unwrap();
            id
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionManager;
    use fixtures::shop;
    use serde_json::json;
    use tandem_core::error::ErrorKind;
    use tandem_core::order::OrderStatus;
    use tandem_core::traits::OrderStore;

    #[test]
    fn test_text_as() {
        assert_eq!(text_as("order_id", &Payload::text("ORDER_1")), json!({"order_id": "ORDER_1"}));
        assert_eq!(text_as("order_id", &Payload::text("")), json!({}));
        assert_eq!(
            text_as("order_id", &Payload::text(r#"{"order_id": "ORDER_2"}"#)),
            json!({"order_id": "ORDER_2"})
        );
        assert_eq!(text_as("query", &Payload::Data(json!({"query": "mouse"}))), json!({"query": "mouse"}));
    }

    #[test]
    fn test_by_name() {
        let shop = shop();
        let workflows = Workflows::new(&shop.tools, &shop.config);
        for name in ["fulfillment", "approve", "advance", "cart", "search"] {
            assert!(workflows.by_name(name).unwrap().is_ok(), "{}", name);
        }
        assert!(workflows.by_name("refund").is_none());
    }

    #[test]
    fn test_missing_tool_is_not_found() {
        let shop = shop();
        let empty = ToolRegistry::new();
        let workflows = Workflows::new(&empty, &shop.config);
        assert_eq!(workflows.approve().unwrap_err().kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_approve_then_advance() {
        let shop = shop();
        let id = shop.order_with(&["P002"]).await;
        let mut order = shop.orders.get_order(&id).await.unwrap().unwrap();
        order.set_address(tandem_test_utils::sample_address("NY")).unwrap();
        order.apply_pricing(tandem_core::pricing::finalize(19.99, 5.0, 1.6)).unwrap();
        shop.orders.put_order(order).await.unwrap();

        let workflows = Workflows::new(&shop.tools, &shop.config);
        let session = SessionManager::new().start();
        let outcome = shop.runner.run(&workflows.approve().unwrap(), &session, id.as_str()).await;
        assert!(outcome.is_success(), "{:?}", outcome.failure);
        let outcome = shop.runner.run(&workflows.advance().unwrap(), &session, "").await;
        assert!(outcome.is_success(), "{:?}", outcome.failure);

        let stored = shop.orders.get_order(&id).await.unwrap().unwrap();
        assert_eq!(stored.status, OrderStatus::Packaged);
    }

    #[tokio::test]
    async fn test_approve_unknown_order() {
        let shop = shop();
        let workflows = Workflows::new(&shop.tools, &shop.config);
        let session = SessionManager::new().start();
        let outcome = shop.runner.run(&workflows.approve().unwrap(), &session, "ORDER_404").await;
        assert_eq!(outcome.failure.unwrap().kind, ErrorKind::NotFound);
    }
}
