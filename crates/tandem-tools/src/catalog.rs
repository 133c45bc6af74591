//! Static shop data: product catalog, shipping and tax rates, stock levels.
//!
//! Loaded once at startup. Only the reorder-status table is mutable.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use futures::future::BoxFuture;

use tandem_core::error::{Result, TandemError};
use tandem_core::traits::{Catalog, Inventory, RateTable};
use tandem_core::types::Product;

const PRODUCTS: &[(&str, &str, &str, f64)] = &[
    ("P001", "Wireless Headphones", "Noise cancelling over-ear headphones", 299.99),
    ("P002", "Smartphone Stand", "Adjustable aluminum stand for all smartphones", 19.99),
    ("P003", "Bluetooth Speaker", "Portable waterproof speaker with 20h battery life", 59.99),
    ("P004", "USB-C Cable", "2-meter braided fast charging cable", 12.99),
    ("P005", "Portable Charger", "10000mAh power bank with fast charging", 29.99),
    ("P006", "Laptop Sleeve", "Protective sleeve for 13-inch laptops", 24.99),
    ("P007", "Wireless Mouse", "Ergonomic wireless mouse with USB receiver", 19.99),
    ("P008", "Mechanical Keyboard", "RGB backlit mechanical gaming keyboard", 89.99),
    ("P009", "HDMI Cable", "3-meter high-speed HDMI 2.1 cable", 14.99),
    ("P010", "Smart Watch", "Fitness tracker with heart rate monitor", 149.99),
    ("P011", "Tablet Case", "Rugged protective case for 10-inch tablets", 19.99),
    ("P012", "Webcam", "1080p HD webcam with built-in microphone", 49.99),
    ("P013", "USB Hub", "4-port USB 3.0 data hub", 15.99),
    ("P014", "Monitor Stand", "Dual monitor desk mount stand", 39.99),
];

const STOCK: &[(&str, u32)] = &[
    ("P001", 50),
    ("P002", 150),
    ("P003", 0),
    ("P004", 500),
    ("P005", 100),
    ("P006", 75),
    ("P007", 200),
    ("P008", 40),
    ("P009", 300),
    ("P010", 60),
    ("P011", 80),
    ("P012", 45),
    ("P013", 120),
    ("P014", 25),
];

pub const STANDARD_SHIPPING: &str = "standard";

const SHIPPING_RATES: &[(&str, f64)] = &[
    (STANDARD_SHIPPING, 5.00),
    ("express", 10.00),
    ("international", 20.00),
];

const TAX_RATES: &[(&str, f64)] = &[("CA", 0.075), ("NY", 0.08), ("TX", 0.0625)];

pub const DEFAULT_TAX_RATE: f64 = 0.05;

/// Marker written when a product is put on reorder.
pub const REORDER_ORDERING: &str = "ORDERING";

/// Read-only product catalog.
pub struct StaticCatalog {
    products: BTreeMap<String, Product>,
}

impl StaticCatalog {
    pub fn new(products: impl IntoIterator<Item = Product>) -> Self {
        Self {
            products: products.into_iter().map(|p| (p.id.clone(), p)).collect(),
        }
    }

    /// The built-in demo catalog (P001..P014).
    pub fn builtin() -> Self {
        Self::new(PRODUCTS.iter().map(|(id, name, description, price)| Product {
            id: id.to_string(),
            name: name.to_string(),
            description: description.to_string(),
            price: *price,
        }))
    }
}

impl Catalog for StaticCatalog {
    fn get_product(&self, id: &str) -> BoxFuture<'_, Result<Product>> {
        let result = self
            .products
            .get(id)
            .cloned()
            .ok_or_else(|| TandemError::ProductNotFound(id.to_string()));
        Box::pin(async move { result })
    }

    fn list_products(&self) -> BoxFuture<'_, Result<Vec<Product>>> {
        Box::pin(async move { Ok(self.products.values().cloned().collect()) })
    }
}

/// Flat shipping rates and per-state tax rates.
pub struct StaticRates {
    shipping: HashMap<String, f64>,
    tax: HashMap<String, f64>,
    default_tax: f64,
}

impl StaticRates {
    pub fn builtin() -> Self {
        Self {
            shipping: SHIPPING_RATES
                .iter()
                .map(|(k, v)| (k.to_string(), *v))
                .collect(),
            tax: TAX_RATES.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
            default_tax: DEFAULT_TAX_RATE,
        }
    }
}

impl RateTable for StaticRates {
    fn shipping_rate(&self, shipping_type: &str) -> BoxFuture<'_, Result<f64>> {
        let rate = self
            .shipping
            .get(&shipping_type.to_lowercase())
            .or_else(|| self.shipping.get(STANDARD_SHIPPING))
            .copied()
            .ok_or_else(|| TandemError::Unavailable("no standard shipping rate".into()));
        Box::pin(async move { rate })
    }

    fn tax_rate(&self, state_code: &str) -> BoxFuture<'_, Result<f64>> {
        let rate = self
            .tax
            .get(&state_code.to_uppercase())
            .copied()
            .unwrap_or(self.default_tax);
        Box::pin(async move { Ok(rate) })
    }
}

/// Stock counts with a mutable reorder-status table.
pub struct StaticInventory {
    counts: HashMap<String, u32>,
    reorders: Mutex<HashMap<String, String>>,
}

impl StaticInventory {
    pub fn new(counts: impl IntoIterator<Item = (String, u32)>) -> Self {
        Self {
            counts: counts.into_iter().collect(),
            reorders: Mutex::new(HashMap::new()),
        }
    }

    pub fn builtin() -> Self {
        Self::new(STOCK.iter().map(|(id, n)| (id.to_string(), *n)))
    }

    fn reorders(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        self.reorders.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Inventory for StaticInventory {
    fn stock_count(&self, product_id: &str) -> BoxFuture<'_, Result<u32>> {
        let count = self.counts.get(product_id).copied().unwrap_or(0);
        Box::pin(async move { Ok(count) })
    }

    fn reorder_status(&self, product_id: &str) -> BoxFuture<'_, Result<Option<String>>> {
        let status = self.reorders().get(product_id).cloned();
        Box::pin(async move { Ok(status) })
    }

    fn mark_reorder(&self, product_id: &str) -> BoxFuture<'_, Result<String>> {
        let status = self
            .reorders()
            .entry(product_id.to_string())
            .or_insert_with(|| REORDER_ORDERING.to_string())
            .clone();
        Box::pin(async move { Ok(status) })
    }
}
