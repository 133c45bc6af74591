use tandem_core::error::Result;
use tandem_core::order::Pricing;
use tandem_core::types::Event;
use tandem_tools::keys;

use super::Workflows;
use crate::leaf::{no_args, FnStep, ModelStep};
use crate::router::{Metric, Router};
use crate::sequential::Sequential;
use crate::step::Step;

const SUMMARY_INSTRUCTION: &str = "You are the order desk of an electronics shop. \
Summarize the priced order for the customer in two or three sentences: the items, \
the shipping cost, the tax, the total and that the order awaits approval.";

impl Workflows<'_> {
    /// Take an order from cart to priced.
    ///
    /// Input: `{order_id?, address, shipping_type?}`. The session's order is
    /// used when no id is given.
    pub fn fulfillment(&self) -> Result<Step> {
        let place_order = Step::leaf(self.tool("place_order")?);

        let shipping = Router::threshold(
            "shipping_router",
            Metric::key(keys::SUBTOTAL),
            self.config.shop.free_shipping_threshold,
            Step::leaf(
                self.tool("free_shipping")?
                    .with_args(no_args)
                    .with_output_key(keys::SHIPPING),
            ),
            Step::leaf(
                self.tool("calculate_shipping_cost")?
                    .named("shipping_cost")
                    .with_args(no_args)
                    .with_output_key(keys::SHIPPING),
            ),
        );
        let taxes = Step::leaf(
            self.tool("calculate_taxes_cost")?
                .named("taxes_cost")
                .with_args(no_args)
                .with_output_key(keys::TAXES),
        );
        let order_costs = self.parallel("order_costs", vec![shipping.into(), taxes]);

        let compute_order = Step::leaf(
            self.tool("compute_order_cost")?
                .named("compute_order")
                .with_args(no_args)
                .with_output_key(keys::ORDER_COST),
        );

        Ok(Sequential::new(
            "fulfillment",
            vec![place_order, order_costs.into(), compute_order, self.order_summary()],
        )
        .into())
    }

    fn order_summary(&self) -> Step {
        if self.config.model.is_some() {
            return Step::leaf(
                ModelStep::new("order_summary", SUMMARY_INSTRUCTION)
                    .with_state_keys(&[keys::ORDER, keys::ORDER_COST]),
            );
        }
        Step::leaf(FnStep::new("order_summary", |ctx| async move {
            let costs: Pricing = ctx.state.require(keys::ORDER_COST)?;
            let order_id: String = ctx.state.require(keys::ORDER_ID)?;
            Ok(vec![Event::new("order_summary", summary_text(&order_id, &costs))])
        }))
    }
}

fn summary_text(order_id: &str, costs: &Pricing) -> String {
    format!(
        "Order {} is priced and pending approval: subtotal ${:.2}, shipping ${:.2}, tax ${:.2}, total ${:.2}.",
        order_id, costs.subtotal, costs.shipping_cost, costs.tax_amount, costs.total_cost
    )
}
