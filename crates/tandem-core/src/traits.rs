use std::sync::Arc;

use futures::future::BoxFuture;

use crate::error::{Result, TandemError};
use crate::order::Order;
use crate::types::*;

/// Inference capability — instruction + input in, text or structured result out.
pub trait InferenceClient: Send + Sync + 'static {
    fn infer(&self, request: InferenceRequest) -> BoxFuture<'_, Result<InferenceResult>>;
}

/// Product catalog lookup.
pub trait Catalog: Send + Sync + 'static {
    /// Look up one product; `ProductNotFound` if the id is unknown.
    fn get_product(&self, id: &str) -> BoxFuture<'_, Result<Product>>;

    /// Every product, ordered by id.
    fn list_products(&self) -> BoxFuture<'_, Result<Vec<Product>>>;
}

/// Shipping and tax rate lookup.
pub trait RateTable: Send + Sync + 'static {
    /// Flat shipping rate; unknown types fall back to the standard rate.
    fn shipping_rate(&self, shipping_type: &str) -> BoxFuture<'_, Result<f64>>;

    /// Tax rate for a state code; unknown codes fall back to the default rate.
    fn tax_rate(&self, state_code: &str) -> BoxFuture<'_, Result<f64>>;
}

/// Stock levels and reorder tracking.
pub trait Inventory: Send + Sync + 'static {
    fn stock_count(&self, product_id: &str) -> BoxFuture<'_, Result<u32>>;

    fn reorder_status(&self, product_id: &str) -> BoxFuture<'_, Result<Option<String>>>;

    /// Mark a product as being reordered if it is not already; returns the
    /// resulting status.
    fn mark_reorder(&self, product_id: &str) -> BoxFuture<'_, Result<String>>;
}

/// Order store — the registry of orders keyed by id.
///
/// `put_order` must reject a write whose `version` does not match the stored
/// one with `VersionConflict`, and bump the version on success.
pub trait OrderStore: Send + Sync + 'static {
    fn get_order(&self, order_id: &str) -> BoxFuture<'_, Result<Option<Order>>>;

    /// Write an order, returning the stored copy with its new version.
    fn put_order(&self, order: Order) -> BoxFuture<'_, Result<Order>>;

    fn next_order_id(&self) -> BoxFuture<'_, Result<String>>;

    fn list_orders(&self) -> BoxFuture<'_, Result<Vec<Order>>>;
}

/// Tool — a named operation over the capabilities, invoked by tool steps.
pub trait Tool: Send + Sync + 'static {
    /// Tool name (used by workflows to look it up).
    fn name(&self) -> &str;

    /// Human-readable description.
    fn description(&self) -> &str;

    /// JSON Schema for tool input.
    fn input_schema(&self) -> serde_json::Value;

    /// Capabilities this tool reaches.
    fn requires(&self) -> &[Capability] {
        &[]
    }

    /// Execute the tool with given input and context.
    fn execute(
        &self,
        input: serde_json::Value,
        ctx: ToolContext,
    ) -> BoxFuture<'_, Result<ToolOutput>>;

    /// Timeout in seconds for this tool.
    fn timeout_secs(&self) -> u64 {
        30
    }
}

/// Handles to every external collaborator a run may use.
///
/// Each handle is optional; asking for one that is absent yields
/// `UnavailableDependency`.
#[derive(Clone, Default)]
pub struct Capabilities {
    pub inference: Option<Arc<dyn InferenceClient>>,
    pub catalog: Option<Arc<dyn Catalog>>,
    pub rates: Option<Arc<dyn RateTable>>,
    pub orders: Option<Arc<dyn OrderStore>>,
    pub inventory: Option<Arc<dyn Inventory>>,
}

impl Capabilities {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_inference(mut self, client: Arc<dyn InferenceClient>) -> Self {
        self.inference = Some(client);
        self
    }

    pub fn with_catalog(mut self, catalog: Arc<dyn Catalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    pub fn with_rates(mut self, rates: Arc<dyn RateTable>) -> Self {
        self.rates = Some(rates);
        self
    }

    pub fn with_orders(mut self, orders: Arc<dyn OrderStore>) -> Self {
        self.orders = Some(orders);
        self
    }

    pub fn with_inventory(mut self, inventory: Arc<dyn Inventory>) -> Self {
        self.inventory = Some(inventory);
        self
    }

    pub fn provides(&self, capability: Capability) -> bool {
        match capability {
            Capability::Inference => self.inference.is_some(),
            Capability::Catalog => self.catalog.is_some(),
            Capability::Rates => self.rates.is_some(),
            Capability::Orders => self.orders.is_some(),
            Capability::Inventory => self.inventory.is_some(),
        }
    }

    pub fn inference(&self) -> Result<&Arc<dyn InferenceClient>> {
        self.inference.as_ref().ok_or_else(|| missing(Capability::Inference))
    }

    pub fn catalog(&self) -> Result<&Arc<dyn Catalog>> {
        self.catalog.as_ref().ok_or_else(|| missing(Capability::Catalog))
    }

    pub fn rates(&self) -> Result<&Arc<dyn RateTable>> {
        self.rates.as_ref().ok_or_else(|| missing(Capability::Rates))
    }

    pub fn orders(&self) -> Result<&Arc<dyn OrderStore>> {
        self.orders.as_ref().ok_or_else(|| missing(Capability::Orders))
    }

    pub fn inventory(&self) -> Result<&Arc<dyn Inventory>> {
        self.inventory.as_ref().ok_or_else(|| missing(Capability::Inventory))
    }
}

fn missing(capability: Capability) -> TandemError {
    TandemError::Unavailable(format!("no {} capability configured", capability))
}

impl std::fmt::Debug for Capabilities {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Capabilities")
            .field("inference", &self.inference.is_some())
            .field("catalog", &self.catalog.is_some())
            .field("rates", &self.rates.is_some())
            .field("orders", &self.orders.is_some())
            .field("inventory", &self.inventory.is_some())
            .finish()
    }
}
