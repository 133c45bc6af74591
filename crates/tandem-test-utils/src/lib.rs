//! Mocks and fixtures shared by the Tandem crates' tests.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Mutex;

use futures::future::BoxFuture;

use tandem_core::error::{Result, TandemError};
use tandem_core::order::Address;
use tandem_core::traits::{Catalog, InferenceClient, RateTable};
use tandem_core::types::{InferenceRequest, InferenceResult, Product};

// ── MockInference ───────────────────────────────────────────────

/// Inference client returning scripted responses in order.
///
/// Once the script runs out it keeps returning the fallback, if any.
pub struct MockInference {
    script: Mutex<VecDeque<Result<InferenceResult>>>,
    fallback: Option<InferenceResult>,
    requests: Mutex<Vec<InferenceRequest>>,
}

impl MockInference {
    pub fn scripted(responses: Vec<Result<InferenceResult>>) -> Self {
        Self {
            script: Mutex::new(responses.into()),
            fallback: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Always answer with the same text.
    pub fn always_text(text: &str) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: Some(InferenceResult::Text(text.to_string())),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Always fail as if the endpoint were down.
    pub fn failing() -> Self {
        Self::scripted(Vec::new())
    }

    /// Every request received so far.
    pub fn requests(&self) -> Vec<InferenceRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl InferenceClient for MockInference {
    fn infer(&self, request: InferenceRequest) -> BoxFuture<'_, Result<InferenceResult>> {
        self.requests.lock().unwrap().push(request);
        let next = self.script.lock().unwrap().pop_front();
        let result = match next {
            Some(r) => r,
            None => self
                .fallback
                .clone()
                .ok_or_else(|| TandemError::Inference("connection refused".into())),
        };
        Box::pin(async move { result })
    }
}

// ── Unreachable capabilities ────────────────────────────────────

/// Catalog whose backend cannot be reached.
pub struct UnreachableCatalog;

impl Catalog for UnreachableCatalog {
    fn get_product(&self, _id: &str) -> BoxFuture<'_, Result<Product>> {
        Box::pin(async { Err(TandemError::Unavailable("catalog offline".into())) })
    }

    fn list_products(&self) -> BoxFuture<'_, Result<Vec<Product>>> {
        Box::pin(async { Err(TandemError::Unavailable("catalog offline".into())) })
    }
}

/// Rate table whose backend cannot be reached.
pub struct UnreachableRates;

impl RateTable for UnreachableRates {
    fn shipping_rate(&self, _shipping_type: &str) -> BoxFuture<'_, Result<f64>> {
        Box::pin(async { Err(TandemError::Unavailable("rates offline".into())) })
    }

    fn tax_rate(&self, _state_code: &str) -> BoxFuture<'_, Result<f64>> {
        Box::pin(async { Err(TandemError::Unavailable("rates offline".into())) })
    }
}

// ── Fixtures ────────────────────────────────────────────────────

pub fn sample_address(state: &str) -> Address {
    Address {
        name: "John Doe".into(),
        address_1: "123 Main St".into(),
        address_2: None,
        city: "Anytown".into(),
        state: state.into(),
        postal_code: "90210".into(),
    }
}

pub fn sample_product(id: &str, price: f64) -> Product {
    Product {
        id: id.into(),
        name: format!("Product {}", id),
        description: format!("Test product {}", id),
        price,
    }
}

/// Write a config file into a fresh temp dir. Keep the dir alive while the
/// path is used.
pub fn config_file(contents: &str) -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tandem.toml");
    std::fs::write(&path, contents).unwrap();
    (dir, path)
}
