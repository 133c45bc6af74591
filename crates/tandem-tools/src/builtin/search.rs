use futures::future::BoxFuture;
use serde::Deserialize;

use tandem_core::error::Result;
use tandem_core::traits::Tool;
use tandem_core::types::{Capability, Product, ToolContext, ToolOutput};

use super::parse_input;

#[derive(Deserialize)]
struct SearchInput {
    query: String,
}

fn search_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "query": { "type": "string" }
        },
        "required": ["query"]
    })
}

fn matches(product: &Product, needle: &str) -> bool {
    product.name.to_lowercase().contains(needle)
        || product.description.to_lowercase().contains(needle)
}

fn hit(product: &Product) -> serde_json::Value {
    serde_json::json!({
        "id": product.id,
        "name": product.name,
        "price": product.price,
    })
}

// ── SearchProductsTool ──────────────────────────────────────────

/// Exact phrase match against name or description.
pub struct SearchProductsTool;

impl Tool for SearchProductsTool {
    fn name(&self) -> &str {
        "search_products"
    }
    fn description(&self) -> &str {
        "Search products whose name or description contains the whole query."
    }
    fn input_schema(&self) -> serde_json::Value {
        search_schema()
    }
    fn requires(&self) -> &[Capability] {
        &[Capability::Catalog]
    }
    fn execute(&self, input: serde_json::Value, ctx: ToolContext) -> BoxFuture<'_, Result<ToolOutput>> {
        Box::pin(async move {
            let params: SearchInput = parse_input(input)?;
            let needle = params.query.to_lowercase();
            let products = ctx.capabilities.catalog()?.list_products().await?;
            let hits: Vec<_> = products
                .iter()
                .filter(|p| matches(p, &needle))
                .map(hit)
                .collect();
            Ok(ToolOutput::new(serde_json::Value::Array(hits)))
        })
    }
}

// ── SearchBroadTool ─────────────────────────────────────────────

/// Match any word of the query.
pub struct SearchBroadTool;

impl Tool for SearchBroadTool {
    fn name(&self) -> &str {
        "search_products_broad"
    }
    fn description(&self) -> &str {
        "Search products matching any word of the query."
    }
    fn input_schema(&self) -> serde_json::Value {
        search_schema()
    }
    fn requires(&self) -> &[Capability] {
        &[Capability::Catalog]
    }
    fn execute(&self, input: serde_json::Value, ctx: ToolContext) -> BoxFuture<'_, Result<ToolOutput>> {
        Box::pin(async move {
            let params: SearchInput = parse_input(input)?;
            let words: Vec<String> = params
                .query
                .to_lowercase()
                .split_whitespace()
                .map(str::to_string)
                .collect();
            let products = ctx.capabilities.catalog()?.list_products().await?;
            let hits: Vec<_> = products
                .iter()
                .filter(|p| words.iter().any(|w| matches(p, w)))
                .map(hit)
                .collect();
            Ok(ToolOutput::new(serde_json::Value::Array(hits)))
        })
    }
}
