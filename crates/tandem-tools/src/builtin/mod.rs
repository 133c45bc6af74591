pub mod inventory;
pub mod orders;
pub mod pricing;
pub mod search;

use serde::de::DeserializeOwned;

use tandem_core::error::{Result, TandemError};
use tandem_core::pricing as money;
use tandem_core::state::{require_in, StateMap};
use tandem_core::traits::Catalog;
use tandem_core::types::ToolContext;
use tandem_store::OrderRegistry;

/// State keys shared by the shop tools and workflows.
pub mod keys {
    pub const ORDER_ID: &str = "order_id";
    pub const ORDER: &str = "order";
    pub const SUBTOTAL: &str = "subtotal";
    pub const SHIPPING_TYPE: &str = "shipping_type";
    pub const SHIPPING: &str = "shipping";
    pub const TAXES: &str = "taxes";
    pub const ORDER_COST: &str = "order_cost";
    pub const INVENTORY: &str = "inventory";
}

pub(crate) fn parse_input<T: DeserializeOwned>(input: serde_json::Value) -> Result<T> {
    serde_json::from_value(input).map_err(|e| TandemError::ToolValidation(e.to_string()))
}

/// Order id from the tool input, falling back to the session's current order.
pub(crate) fn resolve_order_id(explicit: Option<String>, state: &StateMap) -> Result<String> {
    match explicit {
        Some(id) => Ok(id),
        None => require_in(state, keys::ORDER_ID),
    }
}

pub(crate) fn registry(ctx: &ToolContext) -> Result<OrderRegistry> {
    Ok(OrderRegistry::new(ctx.capabilities.orders()?.clone()))
}

/// Sum of catalog prices for every cart line. Unknown products fail.
pub(crate) async fn cart_subtotal(catalog: &dyn Catalog, cart: &[String]) -> Result<f64> {
    let mut prices = Vec::with_capacity(cart.len());
    for id in cart {
        prices.push(catalog.get_product(id).await?.price);
    }
    Ok(money::round_cents(money::subtotal(prices)))
}
