use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tandem_core::config::ShopConfig;
use tandem_core::error::{Result, TandemError};
use tandem_core::traits::Tool;
use tandem_core::types::{ToolContext, ToolDefinition, ToolOutput};

use crate::builtin;

/// Registry of available tools.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    timeout_override: Option<u64>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
            timeout_override: None,
        }
    }

    /// Use one timeout for every tool instead of each tool's own.
    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_override = Some(secs);
        self
    }

    /// Register a tool.
    pub fn register(&mut self, tool: impl Tool) {
        let name = tool.name().to_string();
        self.tools.insert(name, Arc::new(tool));
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Get a tool by name, failing with `ToolNotFound`.
    pub fn require(&self, name: &str) -> Result<Arc<dyn Tool>> {
        self.get(name)
            .ok_or_else(|| TandemError::ToolNotFound(name.to_string()))
    }

    /// List all registered tools, sorted by name.
    pub fn list(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    /// Tool definitions, e.g. for the CLI listing.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = self
            .tools
            .values()
            .map(|t| ToolDefinition {
                name: t.name().to_string(),
                description: t.description().to_string(),
                input_schema: t.input_schema(),
            })
            .collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// Timeout applied to a tool by this registry.
    pub fn timeout_for(&self, tool: &dyn Tool) -> Duration {
        Duration::from_secs(self.timeout_override.unwrap_or_else(|| tool.timeout_secs()))
    }

    /// Execute a tool by name.
    pub async fn execute(
        &self,
        name: &str,
        input: serde_json::Value,
        ctx: ToolContext,
    ) -> Result<ToolOutput> {
        let tool = self.require(name)?;
        let timeout = self.timeout_for(tool.as_ref());
        execute_with_timeout(tool.as_ref(), input, ctx, timeout).await
    }

    /// Create a registry with all built-in shop tools registered.
    pub fn with_builtins(shop: &ShopConfig) -> Self {
        let mut registry = Self::new();

        // ── Orders (5) ──────────────────────────────────────────
        registry.register(builtin::orders::GetOrderTool);
        registry.register(builtin::orders::AddToCartTool);
        registry.register(builtin::orders::PlaceOrderTool::new(
            shop.default_shipping_type.clone(),
        ));
        registry.register(builtin::orders::ApproveOrderTool);
        registry.register(builtin::orders::AdvanceOrderTool);

        // ── Pricing (4) ─────────────────────────────────────────
        registry.register(builtin::pricing::ShippingCostTool);
        registry.register(builtin::pricing::FreeShippingTool);
        registry.register(builtin::pricing::TaxesCostTool);
        registry.register(builtin::pricing::ComputeOrderCostTool);

        // ── Inventory (2) ───────────────────────────────────────
        registry.register(builtin::inventory::CheckInventoryTool);
        registry.register(builtin::inventory::ReorderTool);

        // ── Search (2) ──────────────────────────────────────────
        registry.register(builtin::search::SearchProductsTool);
        registry.register(builtin::search::SearchBroadTool);

        registry
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Run a tool, failing with `ToolTimeout` if it does not finish in time.
pub async fn execute_with_timeout(
    tool: &dyn Tool,
    input: serde_json::Value,
    ctx: ToolContext,
    timeout: Duration,
) -> Result<ToolOutput> {
    match tokio::time::timeout(timeout, tool.execute(input, ctx)).await {
        Ok(result) => result,
        Err(_) => Err(TandemError::ToolTimeout {
            tool: tool.name().to_string(),
            timeout_secs: timeout.as_secs(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::context;
    use futures::future::BoxFuture;
    use serde_json::json;
    use tandem_core::error::ErrorKind;

    struct SlowTool;

    impl Tool for SlowTool {
        fn name(&self) -> &str {
            "slow"
        }
        fn description(&self) -> &str {
            "sleeps"
        }
        fn input_schema(&self) -> serde_json::Value {
            json!({"type": "object"})
        }
        fn execute(&self, _input: serde_json::Value, _ctx: ToolContext) -> BoxFuture<'_, Result<ToolOutput>> {
            Box::pin(async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(ToolOutput::default())
            })
        }
    }

    #[test]
    fn test_builtins_registered() {
        let registry = ToolRegistry::with_builtins(&ShopConfig::default());
        let names = registry.list();
        assert_eq!(names.len(), 13);
        for name in ["get_order", "place_order", "approve_order", "free_shipping", "search_products_broad"] {
            assert!(names.contains(&name), "missing {}", name);
        }
        assert_eq!(registry.definitions()[0].name, "add_to_cart");
    }

    #[tokio::test]
    async fn test_unknown_tool() {
        let registry = ToolRegistry::new();
        let err = registry.execute("nope", json!({}), context()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_override() {
        let mut registry = ToolRegistry::new().with_timeout(1);
        registry.register(SlowTool);
        let err = registry.execute("slow", json!({}), context()).await.unwrap_err();
        assert!(matches!(err, TandemError::ToolTimeout { timeout_secs: 1, .. }));
        assert_eq!(err.kind(), ErrorKind::UnavailableDependency);
    }

    #[tokio::test]
    async fn test_execute_builtin() {
        let registry = ToolRegistry::with_builtins(&ShopConfig::default());
        let out = registry
            .execute("search_products", json!({"query": "cable"}), context())
            .await
            .unwrap();
        assert_eq!(out.content.as_array().unwrap().len(), 2);
    }
}
