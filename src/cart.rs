//! Checkout cart for Stand POS.
//!
//! Pure in-memory, owned by the active checkout session, never process
//! state. Prices are snapshotted from the catalog when a flavor is first
//! added, so a mid-checkout reconfigure cannot change a line under the
//! operator's hands.
//!
//! **Rules:**
//! - Line quantity is always > 0; decrementing to zero removes the line
//! - Discount is a single amount, 0 ≤ discount ≤ subtotal
//! - `total()` = subtotal − discount, floored at 0

use serde::{Deserialize, Serialize};

use crate::config::CatalogItem;
use crate::error::PosError;

/// Float comparisons tolerate sub-cent noise from repeated f64 arithmetic.
const MONEY_EPSILON: f64 = 0.001;

/// One flavor in the cart with its price snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CartLine {
    pub flavor: String,
    pub unit_price: f64,
    pub quantity: i64,
}

impl CartLine {
    pub fn line_total(&self) -> f64 {
        self.unit_price * self.quantity as f64
    }
}

/// The cart for one checkout session.
#[derive(Debug, Default, Clone)]
pub struct Cart {
    lines: Vec<CartLine>,
    discount: f64,
}

impl Cart {
    pub fn new() -> Self {
        Cart::default()
    }

    /// Add one unit of a flavor at its current catalog price.
    ///
    /// NotFound if the flavor is not in the active catalog. An existing
    /// line keeps its original price snapshot and gains quantity.
    pub fn add(&mut self, catalog: &[CatalogItem], flavor: &str) -> Result<(), PosError> {
        if let Some(line) = self.lines.iter_mut().find(|l| l.flavor == flavor) {
            line.quantity += 1;
            return Ok(());
        }

        let item = catalog
            .iter()
            .find(|i| i.name == flavor)
            .ok_or_else(|| PosError::not_found(format!("Flavor not in catalog: {flavor}")))?;

        self.lines.push(CartLine {
            flavor: item.name.clone(),
            unit_price: item.price,
            quantity: 1,
        });
        Ok(())
    }

    /// Remove one unit of a flavor. Silent no-op when the flavor is absent;
    /// the line disappears when its quantity reaches zero.
    pub fn decrement(&mut self, flavor: &str) {
        if let Some(pos) = self.lines.iter().position(|l| l.flavor == flavor) {
            self.lines[pos].quantity -= 1;
            if self.lines[pos].quantity <= 0 {
                self.lines.remove(pos);
            }
        }
    }

    /// Sum of line totals before discount.
    pub fn subtotal(&self) -> f64 {
        self.lines.iter().map(CartLine::line_total).sum()
    }

    /// Subtotal minus discount, floored at 0.
    pub fn total(&self) -> f64 {
        (self.subtotal() - self.discount).max(0.0)
    }

    /// Set the discount. Validation error unless 0 ≤ amount ≤ subtotal.
    pub fn apply_discount(&mut self, amount: f64) -> Result<(), PosError> {
        if amount < 0.0 {
            return Err(PosError::validation(format!(
                "Discount must not be negative (got {amount:.2})"
            )));
        }
        let subtotal = self.subtotal();
        if amount > subtotal + MONEY_EPSILON {
            return Err(PosError::validation(format!(
                "Discount {amount:.2} exceeds subtotal {subtotal:.2}"
            )));
        }
        self.discount = amount;
        Ok(())
    }

    pub fn discount(&self) -> f64 {
        self.discount
    }

    pub fn lines(&self) -> &[CartLine] {
        &self.lines
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Empty all lines and reset the discount.
    pub fn clear(&mut self) {
        self.lines.clear();
        self.discount = 0.0;
    }
}

// ===========================================================================
// Tests
// ===========================================================================
