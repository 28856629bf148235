//! # Transit Reconciler
//!
//! Computes how a product's `stock_transito` must move when one of its
//! orders changes quantity, received total or state.
//!
//! ## Before/After Snapshots
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  expected(s) = s.state.is_active() ? max(0, cantidad - recibido) : 0    │
//! │                                                                         │
//! │  create   : before = none               after = new order              │
//! │  edit     : before = stored order       after = edited order           │
//! │  receive  : before = stored order       after = order + received units │
//! │  delete   : before = stored order       after = none                   │
//! │                                                                         │
//! │  delta = expected(after) - expected(before)                            │
//! │  stock_transito' = max(0, stock_transito + delta)                      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every path that touches `stock_transito` goes through [`transit_delta`].

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::types::{PurchaseOrder, TransitState};

/// The order fields the reconciler depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitSnapshot {
    pub state: TransitState,
    pub cantidad: i64,
    pub recibido: i64,
}

impl TransitSnapshot {
    /// Units this order should be contributing to `stock_transito`.
    #[inline]
    pub fn expected(&self) -> i64 {
        if self.state.is_active() {
            (self.cantidad - self.recibido).max(0)
        } else {
            0
        }
    }
}

/// Expected contribution of an order that may not exist.
#[inline]
pub fn expected_transit(snapshot: Option<&TransitSnapshot>) -> i64 {
    snapshot.map_or(0, TransitSnapshot::expected)
}

/// Signed change to apply to `stock_transito` for one order mutation.
///
/// ## Example
/// ```rust
/// use almacen_core::transit::{transit_delta, TransitSnapshot};
/// use almacen_core::TransitState;
///
/// let before = TransitSnapshot { state: TransitState::EnTransito, cantidad: 10, recibido: 4 };
///
/// // Deleting the order releases the 6 pending units
/// assert_eq!(transit_delta(Some(before), None), -6);
/// ```
pub fn transit_delta(before: Option<TransitSnapshot>, after: Option<TransitSnapshot>) -> i64 {
    expected_transit(after.as_ref()) - expected_transit(before.as_ref())
}

/// Applies a delta to a transit pool, flooring at 0.
#[inline]
pub fn apply_transit_delta(current: i64, delta: i64) -> i64 {
    (current + delta).max(0)
}

/// Sum of the expected contributions of a product's orders.
pub fn rebuild_transit<'a, I>(orders: I) -> i64
where
    I: IntoIterator<Item = &'a PurchaseOrder>,
{
    orders
        .into_iter()
        .map(|order| order.transit_snapshot().expected())
        .sum()
}

/// Recorded vs. expected transit for one product.
///
/// Read-only report; drift is surfaced, never silently rewritten.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct TransitAudit {
    pub external_key: String,
    /// `stock_transito` as stored on the product.
    pub recorded: i64,
    /// Sum of the contributions of the product's orders.
    pub expected: i64,
    /// Orders that contributed to `expected`.
    pub active_orders: usize,
}

impl TransitAudit {
    /// Builds the audit for a product from its stored transit figure and
    /// its orders.
    pub fn compute<'a, I>(external_key: &str, recorded: i64, orders: I) -> Self
    where
        I: IntoIterator<Item = &'a PurchaseOrder>,
    {
        let orders: Vec<&PurchaseOrder> = orders.into_iter().collect();
        TransitAudit {
            external_key: external_key.to_string(),
            recorded,
            expected: rebuild_transit(orders.iter().copied()),
            active_orders: orders
                .iter()
                .filter(|o| o.transit_snapshot().expected() > 0)
                .count(),
        }
    }

    /// `recorded - expected`; positive means the pool is inflated.
    pub fn drift(&self) -> i64 {
        self.recorded - self.expected
    }

    pub fn is_consistent(&self) -> bool {
        self.drift() == 0
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
