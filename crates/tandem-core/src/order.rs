use serde::{Deserialize, Serialize};

use crate::error::{Result, TandemError};

/// Fulfillment status. Transitions only move forward through this list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    #[default]
    None,
    Pending,
    Placed,
    Packaged,
    Shipped,
    Received,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Pending => "pending",
            Self::Placed => "placed",
            Self::Packaged => "packaged",
            Self::Shipped => "shipped",
            Self::Received => "received",
        }
    }

    /// The status reached by one post-approval fulfillment step.
    pub fn next_fulfillment(&self) -> Option<Self> {
        match self {
            Self::Placed => Some(Self::Packaged),
            Self::Packaged => Some(Self::Shipped),
            Self::Shipped => Some(Self::Received),
            _ => None,
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shipping address record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Address {
    pub name: String,
    pub address_1: String,
    #[serde(default)]
    pub address_2: Option<String>,
    pub city: String,
    pub state: String,
    pub postal_code: String,
}

/// Costs computed by the pricing workflow.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pricing {
    pub subtotal: f64,
    pub shipping_cost: f64,
    pub tax_amount: f64,
    pub total_cost: f64,
}

/// An order tracked by the order store.
///
/// `version` is bumped by the store on every successful write and is used to
/// reject stale concurrent updates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub order_id: String,
    #[serde(default)]
    pub cart: Vec<String>,
    #[serde(default)]
    pub address: Option<Address>,
    #[serde(default)]
    pub status: OrderStatus,
    #[serde(default)]
    pub subtotal: Option<f64>,
    #[serde(default)]
    pub shipping_cost: Option<f64>,
    #[serde(default)]
    pub tax_amount: Option<f64>,
    #[serde(default)]
    pub total_cost: Option<f64>,
    #[serde(default)]
    pub version: u64,
}

impl Order {
    pub fn new(order_id: impl Into<String>) -> Self {
        Self {
            order_id: order_id.into(),
            cart: Vec::new(),
            address: None,
            status: OrderStatus::None,
            subtotal: None,
            shipping_cost: None,
            tax_amount: None,
            total_cost: None,
            version: 0,
        }
    }

    /// Append a product to the cart. Only allowed before the order is priced.
    pub fn add_item(&mut self, product_id: impl Into<String>) -> Result<()> {
        if self.status != OrderStatus::None {
            return Err(TandemError::OrderAlreadyFinalized {
                order_id: self.order_id.clone(),
                status: self.status,
            });
        }
        self.cart.push(product_id.into());
        Ok(())
    }

    /// Set or replace the shipping address. Only allowed while status is `NONE`.
    pub fn set_address(&mut self, address: Address) -> Result<()> {
        if self.status != OrderStatus::None {
            return Err(TandemError::AddressAlreadySet {
                order_id: self.order_id.clone(),
                status: self.status,
            });
        }
        self.address = Some(address);
        Ok(())
    }

    /// Record computed costs and move the order to `PENDING`.
    ///
    /// Re-pricing a `PENDING` order is allowed; anything past approval is not.
    pub fn apply_pricing(&mut self, pricing: Pricing) -> Result<()> {
        if self.address.is_none() {
            return Err(TandemError::AddressMissing(self.order_id.clone()));
        }
        if !matches!(self.status, OrderStatus::None | OrderStatus::Pending) {
            return Err(self.invalid("price", self.status));
        }
        self.subtotal = Some(pricing.subtotal);
        self.shipping_cost = Some(pricing.shipping_cost);
        self.tax_amount = Some(pricing.tax_amount);
        self.total_cost = Some(pricing.total_cost);
        self.status = OrderStatus::Pending;
        Ok(())
    }

    /// Approve a priced order. Approving an already placed order is a no-op.
    pub fn approve(&mut self) -> Result<()> {
        match self.status {
            OrderStatus::Pending => {
                self.status = OrderStatus::Placed;
                Ok(())
            }
            OrderStatus::Placed => Ok(()),
            other => Err(self.invalid("approve", other)),
        }
    }

    /// Move a placed order one step further along fulfillment.
    pub fn advance(&mut self) -> Result<OrderStatus> {
        let next = self
            .status
            .next_fulfillment()
            .ok_or_else(|| self.invalid("advance", self.status))?;
        self.status = next;
        Ok(next)
    }

    fn invalid(&self, action: &str, status: OrderStatus) -> TandemError {
        TandemError::InvalidTransition {
            order_id: self.order_id.clone(),
            action: action.to_string(),
            status,
        }
    }
}
