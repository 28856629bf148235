//! # almacen-core: Pure Purchasing & Inventory Reconciliation Logic
//!
//! This crate keeps a product's stock pools (on-hand, in-transit, reserved,
//! projected) and its weighted-average cost consistent while purchase orders
//! are created, partially received, edited or deleted. Everything here is a
//! pure function: the persistence layer (`almacen-db`) reads the records,
//! asks this crate for a [`MutationPlan`], and commits the plan atomically.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Almacén Architecture                             │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │         Callers (UI, CSV import, inventory module)              │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │ create / edit / delete                 │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │        almacen-db: PurchasingService (transaction + retry)      │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │ plan_create / plan_edit / plan_delete  │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ almacen-core (THIS CRATE) ★                     │   │
//! │  │                                                                 │   │
//! │  │   lifecycle ──► transit ──► ledger                              │   │
//! │  │       │                       ▲                                 │   │
//! │  │       └──────► reception ──► costing                            │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO CLOCK • PURE FUNCTIONS              │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Product, PurchaseOrder, TransitState, request inputs
//! - [`costing`] - Weighted-average cost calculator
//! - [`transit`] - Transit reconciler (expected in-transit contribution)
//! - [`reception`] - Single receiving event processor
//! - [`ledger`] - Product stock pool deltas
//! - [`lifecycle`] - Order state machine and mutation planning
//! - [`validation`] - Input validation and wire coercion
//! - [`error`] - Domain error types
//!
//! ## Example Usage
//!
//! ```rust
//! use almacen_core::costing::new_average;
//! use rust_decimal::Decimal;
//!
//! // 10 units at 4.00 blended with 5 units at 6.00
//! let avg = new_average(10, Decimal::from(4), 5, Decimal::from(6)).unwrap();
//! assert_eq!(avg.round_dp(4), Decimal::new(46667, 4));
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod costing;
pub mod error;
pub mod ledger;
pub mod lifecycle;
pub mod reception;
pub mod transit;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use error::{CoreError, CoreResult, ValidationError};
pub use ledger::ProductDelta;
pub use lifecycle::{plan_create, plan_delete, plan_edit, MutationPlan, OrderChange};
pub use transit::{TransitAudit, TransitSnapshot};
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Maximum units on a single purchase order.
///
/// Catches typos (an extra zero or two) before they inflate the transit pool.
pub const MAX_ORDER_QUANTITY: i64 = 1_000_000;

/// Maximum amount accepted for an order total or a shipping charge.
pub const MAX_COST: i64 = 1_000_000_000_000;

/// Maximum length of a carrier tracking number.
pub const MAX_TRACKING_NUMBER_LEN: usize = 64;
