//! # almacen-db: Storage and Purchasing Service
//!
//! SQLite persistence for products and purchase orders, and the
//! [`PurchasingService`] that keeps both in step.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Purchasing Data Flow                             │
//! │                                                                         │
//! │  Caller (UI, import job)                                               │
//! │       │  create_order / edit_order / delete_order                       │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                   almacen-db (THIS CRATE)                       │   │
//! │  │                                                                 │   │
//! │  │   PurchasingService ──► almacen-core planners (pure)           │   │
//! │  │          │                                                      │   │
//! │  │          ▼                                                      │   │
//! │  │   ┌───────────────┐    ┌───────────────┐    ┌──────────────┐  │   │
//! │  │   │   Database    │    │  Repositories │    │  Migrations  │  │   │
//! │  │   │   (pool.rs)   │◄───│ ProductRepo   │    │ 001_init.sql │  │   │
//! │  │   │  SqlitePool   │    │ PurchaseOrder │    │  (embedded)  │  │   │
//! │  │   └───────────────┘    └───────────────┘    └──────────────┘  │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  SQLite file (PurchasingConfig::database_path)                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`pool`] - Connection pool creation and configuration
//! - [`migrations`] - Embedded database migrations
//! - [`error`] - Database error types
//! - [`repository`] - Product and purchase order repositories
//! - [`purchasing`] - The purchasing service and its transaction boundary
//! - [`config`] - Retry policy and database location
//! - [`storage`] - Photo upload seam
//!
//! ## Usage
//!
//! ```rust,ignore
//! use almacen_db::{Database, DbConfig, PurchasingConfig, RequestContext};
//!
//! let db = Database::new(DbConfig::new("almacen.db")).await?;
//! let purchasing = db.purchasing(PurchasingConfig::load(None)?);
//!
//! let id = purchasing
//!     .create_order(&RequestContext::new("ana"), input)
//!     .await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod config;
pub mod error;
pub mod migrations;
pub mod pool;
pub mod purchasing;
pub mod repository;
pub mod storage;

// =============================================================================
// Re-exports
// =============================================================================

pub use config::{ConfigError, PurchasingConfig};
pub use error::{DbError, DbResult};
pub use pool::{Database, DbConfig};
pub use purchasing::{PurchasingError, PurchasingResult, PurchasingService, RequestContext};
pub use storage::{MemoryPhotoStore, PhotoStore, StorageError};

// Repository re-exports for convenience
pub use repository::product::ProductRepository;
pub use repository::purchase_order::PurchaseOrderRepository;
