//! # Repository Module
//!
//! Database repository implementations for Almacén.
//!
//! ## Read / Write Split
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  Reads (&self, pool)            Writes (associated fns, &mut conn)     │
//! │  ───────────────────            ──────────────────────────────────     │
//! │  get_by_key / get_by_id         ProductRepository::apply_delta         │
//! │  list_for_product               PurchaseOrderRepository::insert        │
//! │  count                          PurchaseOrderRepository::update_cas    │
//! │                                 PurchaseOrderRepository::delete_cas    │
//! │                                                                         │
//! │  Writes always run on the service's transaction connection, so a      │
//! │  product delta and its order change commit or roll back together.     │
//! │  Every write is guarded by the row's sync_version.                     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Available Repositories
//!
//! - [`ProductRepository`] - Product lookup and stock pool deltas
//! - [`PurchaseOrderRepository`] - Purchase order persistence
//!
//! [`ProductRepository`]: product::ProductRepository
//! [`PurchaseOrderRepository`]: purchase_order::PurchaseOrderRepository

pub mod product;
pub mod purchase_order;
