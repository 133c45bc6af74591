use tandem_core::error::{Result, TandemError};
use tandem_core::state::{require_in, StateMap};
use tandem_core::types::Payload;
use tandem_tools::builtin::inventory::InventoryData;
use tandem_tools::keys;

use super::{text_as, Workflows};
use crate::leaf::no_args;
use crate::router::{Metric, Router};
use crate::sequential::Sequential;
use crate::step::Step;

impl Workflows<'_> {
    /// Add a product to the session's order, opening an order if needed and
    /// restocking the product when it runs low.
    ///
    /// Input: a product id, or `{product_id}`.
    pub fn cart(&self) -> Result<Step> {
        let get_order = Step::leaf(self.tool("get_order")?.with_args(no_args));

        let check_inventory = Step::leaf(
            self.tool("check_inventory")?
                .with_args(product_args)
                .with_output_key(keys::INVENTORY),
        );
        let reorder = Step::leaf(
            self.tool("reorder_product")?
                .named("reorder")
                .with_args(stocked_product_args)
                .with_output_key(keys::INVENTORY),
        );
        let possibly_reorder = Router::threshold(
            "possibly_reorder",
            Metric::from_fn(stock_count),
            f64::from(self.config.shop.reorder_threshold),
            Step::noop("in_stock"),
            reorder,
        );
        let inventory_data = Sequential::new(
            "inventory_data",
            vec![check_inventory, possibly_reorder.into()],
        );

        let cart_prep = self.parallel("cart_prep", vec![get_order, inventory_data.into()]);
        let add_item = Step::leaf(
            self.tool("add_to_cart")?
                .named("add_item")
                .with_args(stocked_product_args),
        );

        Ok(Sequential::new("cart_agent", vec![cart_prep.into(), add_item]).into())
    }
}

fn product_args(input: &Payload, _state: &StateMap) -> Result<serde_json::Value> {
    Ok(text_as("product_id", input))
}

/// The product whose stock was just checked.
fn stocked_product_args(_input: &Payload, state: &StateMap) -> Result<serde_json::Value> {
    let data: InventoryData = require_in(state, keys::INVENTORY)?;
    Ok(serde_json::json!({ "product_id": data.product_id }))
}

fn stock_count(state: &StateMap) -> Result<f64> {
    let data: InventoryData = require_in(state, keys::INVENTORY)
        .map_err(|_| TandemError::MissingState(format!("{}.count", keys::INVENTORY)))?;
    Ok(f64::from(data.count))
}
