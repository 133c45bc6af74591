use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tracing::debug;

use tandem_core::error::{Result, TandemError};
use tandem_core::order::Order;
use tandem_core::pricing;
use tandem_core::state::require_in;
use tandem_core::traits::Tool;
use tandem_core::types::{Capability, ToolContext, ToolOutput};

use super::{keys, parse_input, registry, resolve_order_id};
use crate::catalog::STANDARD_SHIPPING;

/// Result shape shared by both shipping paths.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShippingQuote {
    pub shipping_cost: f64,
    pub shipping_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaxQuote {
    pub state: String,
    pub tax_rate: f64,
    pub tax_amount: f64,
}

#[derive(Deserialize)]
struct ShippingInput {
    #[serde(default)]
    shipping_type: Option<String>,
}

fn shipping_type(explicit: Option<String>, ctx: &ToolContext) -> String {
    explicit
        .or_else(|| require_in::<String>(&ctx.state, keys::SHIPPING_TYPE).ok())
        .unwrap_or_else(|| STANDARD_SHIPPING.to_string())
}

fn shipping_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "shipping_type": { "type": "string", "description": "Defaults to the session's shipping type" }
        }
    })
}

// ── ShippingCostTool ────────────────────────────────────────────

pub struct ShippingCostTool;

impl Tool for ShippingCostTool {
    fn name(&self) -> &str {
        "calculate_shipping_cost"
    }
    fn description(&self) -> &str {
        "Flat shipping cost for a shipping type (standard, express, international)."
    }
    fn input_schema(&self) -> serde_json::Value {
        shipping_schema()
    }
    fn requires(&self) -> &[Capability] {
        &[Capability::Rates]
    }
    fn execute(&self, input: serde_json::Value, ctx: ToolContext) -> BoxFuture<'_, Result<ToolOutput>> {
        Box::pin(async move {
            let params: ShippingInput = parse_input(input)?;
            let shipping_type = shipping_type(params.shipping_type, &ctx);
            let shipping_cost = ctx.capabilities.rates()?.shipping_rate(&shipping_type).await?;
            let quote = ShippingQuote {
                shipping_cost,
                shipping_type,
            };
            Ok(ToolOutput::new(serde_json::to_value(quote)?))
        })
    }
}

// ── FreeShippingTool ────────────────────────────────────────────

pub struct FreeShippingTool;

impl Tool for FreeShippingTool {
    fn name(&self) -> &str {
        "free_shipping"
    }
    fn description(&self) -> &str {
        "Shipping quote for orders that qualify for free shipping."
    }
    fn input_schema(&self) -> serde_json::Value {
        shipping_schema()
    }
    fn execute(&self, input: serde_json::Value, ctx: ToolContext) -> BoxFuture<'_, Result<ToolOutput>> {
        Box::pin(async move {
            let params: ShippingInput = parse_input(input)?;
            let quote = ShippingQuote {
                shipping_cost: 0.0,
                shipping_type: shipping_type(params.shipping_type, &ctx),
            };
            Ok(ToolOutput::new(serde_json::to_value(quote)?))
        })
    }
}

// ── TaxesCostTool ───────────────────────────────────────────────

pub struct TaxesCostTool;

#[derive(Deserialize)]
struct TaxesInput {
    #[serde(default)]
    state: Option<String>,
    #[serde(default)]
    subtotal: Option<f64>,
}

impl Tool for TaxesCostTool {
    fn name(&self) -> &str {
        "calculate_taxes_cost"
    }
    fn description(&self) -> &str {
        "Sales tax on the order subtotal for the shipping address's state."
    }
    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "state": { "type": "string", "description": "Two-letter state code. Defaults to the order's address." },
                "subtotal": { "type": "number", "description": "Defaults to the session's subtotal." }
            }
        })
    }
    fn requires(&self) -> &[Capability] {
        &[Capability::Rates]
    }
    fn execute(&self, input: serde_json::Value, ctx: ToolContext) -> BoxFuture<'_, Result<ToolOutput>> {
        Box::pin(async move {
            let params: TaxesInput = parse_input(input)?;
            let state = match params.state {
                Some(s) => s,
                None => {
                    let order: Order = require_in(&ctx.state, keys::ORDER)?;
                    order
                        .address
                        .map(|a| a.state)
                        .ok_or(TandemError::AddressMissing(order.order_id))?
                }
            };
            let subtotal = match params.subtotal {
                Some(s) => s,
                None => require_in(&ctx.state, keys::SUBTOTAL)?,
            };

            let tax_rate = ctx.capabilities.rates()?.tax_rate(&state).await?;
            let quote = TaxQuote {
                tax_amount: pricing::tax_amount(subtotal, tax_rate),
                state,
                tax_rate,
            };
            Ok(ToolOutput::new(serde_json::to_value(quote)?))
        })
    }
}

// ── ComputeOrderCostTool ────────────────────────────────────────

/// Combine subtotal, shipping and tax into the total and mark the order pending.
pub struct ComputeOrderCostTool;

#[derive(Deserialize)]
struct ComputeInput {
    #[serde(default)]
    order_id: Option<String>,
}

impl Tool for ComputeOrderCostTool {
    fn name(&self) -> &str {
        "compute_order_cost"
    }
    fn description(&self) -> &str {
        "Total the order from the computed subtotal, shipping and taxes and mark it pending."
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
            let params: ComputeInput = parse_input(input)?;
            let order_id = resolve_order_id(params.order_id, &ctx.state)?;
            let subtotal: f64 = require_in(&ctx.state, keys::SUBTOTAL)?;
            let shipping: ShippingQuote = require_in(&ctx.state, keys::SHIPPING)?;
            let taxes: TaxQuote = require_in(&ctx.state, keys::TAXES)?;

            let costs = pricing::finalize(subtotal, shipping.shipping_cost, taxes.tax_amount);
            let (order, _) = registry(&ctx)?
                .modify(&order_id, |o| o.apply_pricing(costs))
                .await?;
            debug!(order_id = %order.order_id, total = costs.total_cost, "Order priced");

            let mut content = serde_json::to_value(costs)?;
            content["order_id"] = serde_json::json!(order.order_id);
            content["status"] = serde_json::json!(order.status);
            Ok(ToolOutput::new(content).with_state(keys::ORDER, serde_json::to_value(&order)?))
        })
    }
}
