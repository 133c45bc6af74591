use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tracing::info;

use tandem_core::error::Result;
use tandem_core::traits::Tool;
use tandem_core::types::{Capability, ToolContext, ToolOutput};

use super::parse_input;

/// Stock report for one product.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InventoryData {
    pub product_id: String,
    pub in_stock: bool,
    pub count: u32,
    #[serde(default)]
    pub reorder_status: Option<String>,
}

#[derive(Deserialize)]
struct ProductInput {
    product_id: String,
}

fn product_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "product_id": { "type": "string", "description": "Catalog id, e.g. P001" }
        },
        "required": ["product_id"]
    })
}

async fn inventory_data(product_id: String, ctx: &ToolContext) -> Result<InventoryData> {
    ctx.capabilities.catalog()?.get_product(&product_id).await?;
    let inventory = ctx.capabilities.inventory()?;
    let count = inventory.stock_count(&product_id).await?;
    let reorder_status = inventory.reorder_status(&product_id).await?;
    Ok(InventoryData {
        product_id,
        in_stock: count > 0,
        count,
        reorder_status,
    })
}

// ── CheckInventoryTool ──────────────────────────────────────────

pub struct CheckInventoryTool;

impl Tool for CheckInventoryTool {
    fn name(&self) -> &str {
        "check_inventory"
    }
    fn description(&self) -> &str {
        "Check whether a product is in stock and how many units are available."
    }
    fn input_schema(&self) -> serde_json::Value {
        product_schema()
    }
    fn requires(&self) -> &[Capability] {
        &[Capability::Catalog, Capability::Inventory]
    }
    fn execute(&self, input: serde_json::Value, ctx: ToolContext) -> BoxFuture<'_, Result<ToolOutput>> {
        Box::pin(async move {
            let params: ProductInput = parse_input(input)?;
            let data = inventory_data(params.product_id, &ctx).await?;
            Ok(ToolOutput::new(serde_json::to_value(data)?))
        })
    }
}

// ── ReorderTool ─────────────────────────────────────────────────

/// Put a product on reorder (idempotent) and report its stock.
pub struct ReorderTool;

impl Tool for ReorderTool {
    fn name(&self) -> &str {
        "reorder_product"
    }
    fn description(&self) -> &str {
        "Check the reorder status of a product, starting a reorder if none is in progress."
    }
    fn input_schema(&self) -> serde_json::Value {
        product_schema()
    }
    fn requires(&self) -> &[Capability] {
        &[Capability::Catalog, Capability::Inventory]
    }
    fn execute(&self, input: serde_json::Value, ctx: ToolContext) -> BoxFuture<'_, Result<ToolOutput>> {
        Box::pin(async move {
            let params: ProductInput = parse_input(input)?;
            let mut data = inventory_data(params.product_id, &ctx).await?;
            let status = ctx.capabilities.inventory()?.mark_reorder(&data.product_id).await?;
            info!(product_id = %data.product_id, count = data.count, %status, "Reorder requested");
            data.reorder_status = Some(status);
            Ok(ToolOutput::new(serde_json::to_value(data)?))
        })
    }
}
