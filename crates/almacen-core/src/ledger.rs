//! # Product Ledger
//!
//! Stock pool deltas and their application to a product.
//!
//! ## Delta Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                    Stock Update Strategy                            │
//! │                                                                     │
//! │  ❌ WRONG: recount and overwrite                                    │
//! │     stock_transito = <sum of what I think is pending>              │
//! │                                                                     │
//! │  ✅ CORRECT: apply only what this mutation changed                  │
//! │     stock_transito = max(0, stock_transito + delta)                │
//! │                                                                     │
//! │  The delta is computed from before/after snapshots of the order,   │
//! │  so contributions of other orders are never touched.               │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::transit::apply_transit_delta;
use crate::types::Product;

/// Projected stock: `stock + transito - reservado`.
///
/// The single definition of the figure; everything that stores
/// `stock_proyectado` goes through here.
#[inline]
pub const fn projected(stock: i64, transito: i64, reservado: i64) -> i64 {
    stock + transito - reservado
}

/// Changes one mutation makes to a product.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProductDelta {
    /// Signed change to on-hand units.
    pub stock: i64,

    /// Signed change to in-transit units (floored at 0 when applied).
    pub stock_transito: i64,

    /// New average cost, when a receiving event changed it.
    pub costo_prom: Option<Decimal>,
}

impl ProductDelta {
    /// A delta touching only the transit pool.
    pub fn transit(delta: i64) -> Self {
        ProductDelta {
            stock_transito: delta,
            ..Default::default()
        }
    }

    /// Whether applying this delta leaves the product unchanged.
    pub fn is_empty(&self) -> bool {
        self.stock == 0 && self.stock_transito == 0 && self.costo_prom.is_none()
    }

    /// Applies the delta to a copy of `product`.
    ///
    /// ## Guarantees
    /// - `stock_transito` is floored at 0
    /// - `stock_proyectado` is recomputed
    /// - `stock_reservado` is never touched
    ///
    /// ## Errors
    /// `CoreError::Invariant` if on-hand stock would go negative or the new
    /// average cost is negative. Neither happens for plans built by
    /// [`crate::lifecycle`].
    pub fn apply_to(&self, product: &Product) -> CoreResult<Product> {
        let mut next = product.clone();

        next.stock = product.stock + self.stock;
        if next.stock < 0 {
            return Err(CoreError::Invariant(format!(
                "stock of {} would become {}",
                product.external_key, next.stock
            )));
        }

        next.stock_transito = apply_transit_delta(product.stock_transito, self.stock_transito);

        if let Some(costo_prom) = self.costo_prom {
            if costo_prom.is_sign_negative() && !costo_prom.is_zero() {
                return Err(CoreError::Invariant(format!(
                    "average cost of {} would become {}",
                    product.external_key, costo_prom
                )));
            }
            next.costo_prom = costo_prom;
        }

        next.recompute_projection();
        Ok(next)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
