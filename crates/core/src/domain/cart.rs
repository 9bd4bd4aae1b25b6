use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::product::{Product, ProductId};
use crate::errors::DomainError;

/// A single cart entry. `price_snapshot` is captured at add time; later
/// catalog price changes never alter an existing line.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CartLine {
    pub product_id: ProductId,
    pub product_name: String,
    pub quantity: u32,
    pub price_snapshot: Decimal,
}

impl CartLine {
    pub fn line_total(&self) -> Decimal {
        self.price_snapshot * Decimal::from(self.quantity)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Cart {
    pub lines: Vec<CartLine>,
    pub currency: Option<String>,
}

impl Cart {
    /// Add a product at its current catalog price. Re-adding a product bumps
    /// the existing line's quantity and keeps the original snapshot.
    pub fn add(&mut self, product: &Product, quantity: u32) -> Result<(), DomainError> {
        if quantity == 0 {
            return Err(DomainError::InvariantViolation(
                "cart quantity must be greater than zero".to_string(),
            ));
        }

        match &self.currency {
            Some(currency) if currency != &product.currency => {
                return Err(DomainError::CurrencyMismatch {
                    cart: currency.clone(),
                    product: product.currency.clone(),
                });
            }
            Some(_) => {}
            None => self.currency = Some(product.currency.clone()),
        }

        if let Some(line) = self.lines.iter_mut().find(|line| line.product_id == product.id) {
            line.quantity = line.quantity.saturating_add(quantity);
            return Ok(());
        }

        self.lines.push(CartLine {
            product_id: product.id.clone(),
            product_name: product.name.clone(),
            quantity,
            price_snapshot: product.price,
        });
        Ok(())
    }

    pub fn remove(&mut self, product_id: &ProductId) -> Result<CartLine, DomainError> {
        let index = self
            .lines
            .iter()
            .position(|line| &line.product_id == product_id)
            .ok_or_else(|| DomainError::LineNotInCart { product_id: product_id.clone() })?;

        let removed = self.lines.remove(index);
        if self.lines.is_empty() {
            self.currency = None;
        }
        Ok(removed)
    }

    pub fn total(&self) -> Decimal {
        self.lines.iter().map(CartLine::line_total).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn clear(&mut self) {
        self.lines.clear();
        self.currency = None;
    }
}
