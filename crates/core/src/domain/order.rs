use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::cart::{Cart, CartLine};
use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrderId(pub String);

impl OrderId {
    pub fn generate() -> Self {
        let suffix = Uuid::new_v4().simple().to_string();
        Self(format!("ORD-{}", &suffix[..8]))
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Confirmed,
    Cancelled,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub status: OrderStatus,
    pub lines: Vec<CartLine>,
    pub total_amount: Decimal,
    pub currency: String,
    pub created_at: DateTime<Utc>,
}

impl Order {
    /// Build a pending order from a non-empty cart. The cart itself is left
    /// untouched; the caller clears it only after the order is recorded.
    pub fn from_cart(cart: &Cart) -> Result<Self, DomainError> {
        if cart.is_empty() {
            return Err(DomainError::EmptyCartCheckout);
        }

        let currency = cart.currency.clone().ok_or_else(|| {
            DomainError::InvariantViolation("non-empty cart is missing a currency".to_string())
        })?;

        Ok(Self {
            id: OrderId::generate(),
            status: OrderStatus::Pending,
            lines: cart.lines.clone(),
            total_amount: cart.total(),
            currency,
            created_at: Utc::now(),
        })
    }

    pub fn can_transition_to(&self, next: &OrderStatus) -> bool {
        matches!(
            (&self.status, next),
            (OrderStatus::Pending, OrderStatus::Confirmed)
                | (OrderStatus::Pending, OrderStatus::Cancelled)
        )
    }

    pub fn transition_to(&mut self, next: OrderStatus) -> Result<(), DomainError> {
        if self.can_transition_to(&next) {
            self.status = next;
            return Ok(());
        }

        Err(DomainError::InvalidOrderTransition { from: self.status.clone(), to: next })
    }
}
