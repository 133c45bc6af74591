use futures::future::BoxFuture;
use serde::Deserialize;
use tracing::info;

use tandem_core::error::Result;
use tandem_core::order::{Address, Order};
use tandem_core::traits::Tool;
use tandem_core::types::{Capability, ToolContext, ToolOutput};

use super::{cart_subtotal, keys, parse_input, registry, resolve_order_id};

fn order_output(order: &Order) -> Result<ToolOutput> {
    let value = serde_json::to_value(order)?;
    Ok(ToolOutput::new(value.clone())
        .with_state(keys::ORDER_ID, serde_json::json!(order.order_id))
        .with_state(keys::ORDER, value))
}

#[derive(Deserialize)]
struct OrderRef {
    #[serde(default)]
    order_id: Option<String>,
}

// ── GetOrderTool ────────────────────────────────────────────────

/// Load the session's order, opening a new one if the session has none.
pub struct GetOrderTool;

impl Tool for GetOrderTool {
    fn name(&self) -> &str {
        "get_order"
    }
    fn description(&self) -> &str {
        "Get the current order. Opens a new empty order when no order id is given or in session state."
    }
    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "order_id": { "type": "string", "description": "Order to load. Omit to use the session's order." }
            }
        })
    }
    fn requires(&self) -> &[Capability] {
        &[Capability::Orders]
    }
    fn execute(&self, input: serde_json::Value, ctx: ToolContext) -> BoxFuture<'_, Result<ToolOutput>> {
        Box::pin(async move {
            let params: OrderRef = parse_input(input)?;
            let registry = registry(&ctx)?;
            let order = if params.order_id.is_none() && !ctx.state.contains_key(keys::ORDER_ID) {
                let order = registry.create().await?;
                info!(order_id = %order.order_id, "Opened new order");
                order
            } else {
                registry.fetch(&resolve_order_id(params.order_id, &ctx.state)?).await?
            };
            order_output(&order)
        })
    }
}

// ── AddToCartTool ───────────────────────────────────────────────

pub struct AddToCartTool;

#[derive(Deserialize)]
struct AddToCartInput {
    #[serde(default)]
    order_id: Option<String>,
    product_id: String,
}

impl Tool for AddToCartTool {
    fn name(&self) -> &str {
        "add_to_cart"
    }
    fn description(&self) -> &str {
        "Add a product to an order's cart. Only allowed before the order is priced."
    }
    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "order_id": { "type": "string" },
                "product_id": { "type": "string", "description": "Catalog id, e.g. P001" }
            },
            "required": ["product_id"]
        })
    }
    fn requires(&self) -> &[Capability] {
        &[Capability::Orders, Capability::Catalog]
    }
    fn execute(&self, input: serde_json::Value, ctx: ToolContext) -> BoxFuture<'_, Result<ToolOutput>> {
        Box::pin(async move {
            let params: AddToCartInput = parse_input(input)?;
            let order_id = resolve_order_id(params.order_id, &ctx.state)?;

            ctx.capabilities.catalog()?.get_product(&params.product_id).await?;

            let product_id = params.product_id;
            let (order, _) = registry(&ctx)?
                .modify(&order_id, |order| order.add_item(product_id.clone()))
                .await?;
            info!(order_id = %order.order_id, product_id = %product_id, "Added to cart");
            order_output(&order)
        })
    }
}

// ── PlaceOrderTool ──────────────────────────────────────────────

/// Set the shipping address and record the values pricing needs.
pub struct PlaceOrderTool {
    default_shipping_type: String,
}

impl PlaceOrderTool {
    pub fn new(default_shipping_type: impl Into<String>) -> Self {
        Self {
            default_shipping_type: default_shipping_type.into(),
        }
    }
}

#[derive(Deserialize)]
struct PlaceOrderInput {
    #[serde(default)]
    order_id: Option<String>,
    address: Address,
    #[serde(default)]
    shipping_type: Option<String>,
}

impl Tool for PlaceOrderTool {
    fn name(&self) -> &str {
        "place_order"
    }
    fn description(&self) -> &str {
        "Set the shipping address of an order. Allowed once, before pricing."
    }
    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "order_id": { "type": "string" },
                "address": {
                    "type": "object",
                    "properties": {
                        "name": { "type": "string" },
                        "address_1": { "type": "string" },
                        "address_2": { "type": "string" },
                        "city": { "type": "string" },
                        "state": { "type": "string", "description": "Two-letter state code" },
                        "postal_code": { "type": "string" }
                    },
                    "required": ["name", "address_1", "city", "state", "postal_code"]
                },
                "shipping_type": { "type": "string", "enum": ["standard", "express", "international"] }
            },
            "required": ["address"]
        })
    }
    fn requires(&self) -> &[Capability] {
        &[Capability::Orders, Capability::Catalog]
    }
    fn execute(&self, input: serde_json::Value, ctx: ToolContext) -> BoxFuture<'_, Result<ToolOutput>> {
        Box::pin(async move {
            let params: PlaceOrderInput = parse_input(input)?;
            let order_id = resolve_order_id(params.order_id, &ctx.state)?;
            let address = params.address;

            let registry = registry(&ctx)?;
            let catalog = ctx.capabilities.catalog()?;

            // Price the cart first so a catalog failure leaves the order untouched.
            let current = registry.fetch(&order_id).await?;
            let mut subtotal = cart_subtotal(catalog.as_ref(), &current.cart).await?;
            let (order, _) = registry
                .modify(&order_id, |order| order.set_address(address.clone()))
                .await?;
            if order.cart != current.cart {
                subtotal = cart_subtotal(catalog.as_ref(), &order.cart).await?;
            }
            let shipping_type = params
                .shipping_type
                .unwrap_or_else(|| self.default_shipping_type.clone());

            info!(order_id = %order.order_id, subtotal, "Order address set");
            Ok(order_output(&order)?
                .with_state(keys::SUBTOTAL, serde_json::json!(subtotal))
                .with_state(keys::SHIPPING_TYPE, serde_json::json!(shipping_type)))
        })
    }
}

// ── ApproveOrderTool ────────────────────────────────────────────

pub struct ApproveOrderTool;

impl Tool for ApproveOrderTool {
    fn name(&self) -> &str {
        "approve_order"
    }
    fn description(&self) -> &str {
        "Approve a priced order, moving it from pending to placed."
    }
    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "order_id": { "type": "string" }
            }
        })
    }
    fn requires(&self) -> &[Capability] {
        &[Capability::Orders]
    }
    fn execute(&self, input: serde_json::Value, ctx: ToolContext) -> BoxFuture<'_, Result<ToolOutput>> {
        Box::pin(async move {
            let params: OrderRef = parse_input(input)?;
            let order_id = resolve_order_id(params.order_id, &ctx.state)?;
            let (order, _) = registry(&ctx)?.modify(&order_id, |o| o.approve()).await?;
            info!(order_id = %order.order_id, status = %order.status, "Order approved");
            order_output(&order)
        })
    }
}

// ── AdvanceOrderTool ────────────────────────────────────────────

pub struct AdvanceOrderTool;

impl Tool for AdvanceOrderTool {
    fn name(&self) -> &str {
        "advance_order"
    }
    fn description(&self) -> &str {
        "Move a placed order one step along fulfillment (packaged, shipped, received)."
    }
    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "order_id": { "type": "string" }
            }
        })
    }
    fn requires(&self) -> &[Capability] {
        &[Capability::Orders]
    }
    fn execute(&self, input: serde_json::Value, ctx: ToolContext) -> BoxFuture<'_, Result<ToolOutput>> {
        Box::pin(async move {
            let params: OrderRef = parse_input(input)?;
            let order_id = resolve_order_id(params.order_id, &ctx.state)?;
            let (order, status) = registry(&ctx)?.modify(&order_id, |o| o.advance()).await?;
            info!(order_id = %order.order_id, %status, "Order advanced");
            order_output(&order)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{context, context_with_order};
    use serde_json::json;
    use tandem_core::error::{ErrorKind, TandemError};
    use tandem_core::order::OrderStatus;

    fn address(state: &str) -> serde_json::Value {
        json!({
            "name": "John Doe",
            "address_1": "123 Main St",
            "city": "Anytown",
            "state": state,
            "postal_code": "90210"
        })
    }

    #[tokio::test]
    async fn test_get_order_opens_new_order() {
        let ctx = context();
        let out = GetOrderTool.execute(json!({}), ctx).await.unwrap();
        assert_eq!(out.content["order_id"], "ORDER_1001");
        assert_eq!(out.state_delta.get(keys::ORDER_ID), Some(&json!("ORDER_1001")));
    }

    #[tokio::test]
    async fn test_get_order_malformed_session_id_rejected() {
        let mut ctx = context();
        ctx.state.insert(keys::ORDER_ID.into(), json!(42));
        let orders = ctx.capabilities.orders().unwrap().clone();

        let err = GetOrderTool.execute(json!({}), ctx).await.unwrap_err();
        assert!(matches!(err, TandemError::MissingState(ref k) if k == keys::ORDER_ID));
        assert!(orders.list_orders().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_get_order_unknown_is_not_found() {
        let err = GetOrderTool
            .execute(json!({"order_id": "ORDER_404"}), context())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_add_to_cart_uses_session_order() {
        let ctx = context_with_order(&[]).await;
        let out = AddToCartTool
            .execute(json!({"product_id": "P004"}), ctx)
            .await
            .unwrap();
        assert_eq!(out.content["cart"], json!(["P004"]));
    }

    #[tokio::test]
    async fn test_add_unknown_product_rejected() {
        let ctx = context_with_order(&[]).await;
        let err = AddToCartTool
            .execute(json!({"product_id": "P999"}), ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, TandemError::ProductNotFound(_)));
    }

    #[tokio::test]
    async fn test_place_order_records_subtotal() {
        let ctx = context_with_order(&["P001", "P004"]).await;
        let out = PlaceOrderTool::new("standard")
            .execute(json!({"address": address("CA")}), ctx)
            .await
            .unwrap();
        assert_eq!(out.state_delta.get(keys::SUBTOTAL), Some(&json!(312.98)));
        assert_eq!(out.state_delta.get(keys::SHIPPING_TYPE), Some(&json!("standard")));
        assert_eq!(out.content["address"]["state"], "CA");
    }

    #[tokio::test]
    async fn test_place_order_again_replaces_address() {
        let ctx = context_with_order(&["P001"]).await;
        let tool = PlaceOrderTool::new("standard");
        tool.execute(json!({"address": address("CA")}), ctx.clone())
            .await
            .unwrap();
        let out = tool
            .execute(json!({"address": address("NY")}), ctx.clone())
            .await
            .unwrap();
        assert_eq!(out.content["address"]["state"], "NY");
        assert_eq!(out.content["status"], "none");

        let orders = ctx.capabilities.orders().unwrap();
        let mut order = orders.get_order("ORDER_1001").await.unwrap().unwrap();
        order.status = OrderStatus::Pending;
        orders.put_order(order).await.unwrap();
        let err = tool
            .execute(json!({"address": address("TX")}), ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, TandemError::AddressAlreadySet { .. }));
    }

    #[tokio::test]
    async fn test_place_order_unknown_product_leaves_order_untouched() {
        let ctx = context_with_order(&["P404"]).await;
        let err = PlaceOrderTool::new("standard")
            .execute(json!({"address": address("CA")}), ctx.clone())
            .await
            .unwrap_err();
        assert!(matches!(err, TandemError::ProductNotFound(_)));

        let orders = ctx.capabilities.orders().unwrap();
        let order = orders.get_order("ORDER_1001").await.unwrap().unwrap();
        assert!(order.address.is_none());
        assert_eq!(order.version, 1);
    }

    #[tokio::test]
    async fn test_approve_unpriced_rejected() {
        let ctx = context_with_order(&["P001"]).await;
        let err = ApproveOrderTool.execute(json!({}), ctx).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
    }

    #[tokio::test]
    async fn test_unknown_order_not_found_everywhere() {
        let input = json!({"order_id": "ORDER_404", "product_id": "P001", "address": address("CA")});
        let tools: Vec<Box<dyn Tool>> = vec![
            Box::new(AddToCartTool),
            Box::new(PlaceOrderTool::new("standard")),
            Box::new(ApproveOrderTool),
            Box::new(AdvanceOrderTool),
        ];
        for tool in tools {
            let err = tool.execute(input.clone(), context()).await.unwrap_err();
            assert_eq!(err.kind(), ErrorKind::NotFound, "tool {}", tool.name());
        }
    }

    #[tokio::test]
    async fn test_advance_placed_order() {
        let ctx = context_with_order(&["P001"]).await;
        let orders = ctx.capabilities.orders().unwrap().clone();
        let mut order = orders.get_order("ORDER_1001").await.unwrap().unwrap();
        order.status = OrderStatus::Placed;
        orders.put_order(order).await.unwrap();

        let out = AdvanceOrderTool.execute(json!({}), ctx).await.unwrap();
        assert_eq!(out.content["status"], "packaged");
    }
}
