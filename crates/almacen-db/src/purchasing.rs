//! # Purchasing Service
//!
//! Create, edit (including receiving events) and delete purchase orders,
//! keeping the product's stock pools and average cost in step.
//!
//! ## One Optimistic Transaction Per Mutation
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  with_product_transaction(external_key, order_id, plan_fn)              │
//! │                                                                         │
//! │  attempt 1..=max_retries+1                                              │
//! │   │                                                                     │
//! │   ├─ read product (+ order) with sync_version        (pool)             │
//! │   ├─ plan = plan_fn(product, order, now)             (pure, no I/O)     │
//! │   ├─ BEGIN                                                              │
//! │   │    tracking number free?                                            │
//! │   │    UPDATE products ... WHERE id = ? AND sync_version = ?            │
//! │   │    INSERT / UPDATE / DELETE order (version-guarded)                 │
//! │   ├─ any guard hit 0 rows → ROLLBACK, jittered exponential sleep, retry │
//! │   └─ COMMIT → done                                                      │
//! │                                                                         │
//! │  out of attempts → PurchasingError::Conflict                            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Validation failures are never retried and never write anything.

use std::fmt;
use std::sync::Arc;

use backoff::backoff::Backoff;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use almacen_core::validation::{normalize_key, validate_external_key};
use almacen_core::{
    plan_create, plan_delete, plan_edit, CoreError, CoreResult, CreateOrderInput, EditOrderInput,
    MutationPlan, OrderChange, PhotoUpload, Product, PurchaseOrder, TransitAudit, ValidationError,
};

use crate::config::PurchasingConfig;
use crate::error::DbError;
use crate::pool::Database;
use crate::repository::product::ProductRepository;
use crate::repository::purchase_order::{generate_order_id, PurchaseOrderRepository};
use crate::storage::PhotoStore;

// =============================================================================
// Request Context
// =============================================================================

/// Who is asking, carried into every log span of a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestContext {
    pub actor: String,
    pub request_id: String,
}

impl RequestContext {
    /// Context with a fresh request id.
    pub fn new(actor: impl Into<String>) -> Self {
        RequestContext {
            actor: actor.into(),
            request_id: Uuid::new_v4().to_string(),
        }
    }

    /// Context for background jobs and tooling.
    pub fn system() -> Self {
        Self::new("system")
    }
}

// =============================================================================
// Errors
// =============================================================================

/// What callers of the purchasing service see.
#[derive(Debug, Error)]
pub enum PurchasingError {
    /// Rejected input; nothing was written.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// Lost the optimistic race on every attempt.
    #[error("Concurrent updates on {key}: gave up after {attempts} attempts")]
    Conflict { key: String, attempts: u32 },

    /// Reconciliation math produced an impossible state; nothing was written.
    #[error("Invariant violated: {0}")]
    Invariant(String),

    #[error("Database error: {0}")]
    Database(DbError),
}

impl PurchasingError {
    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        PurchasingError::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }

    /// Whether the caller may simply try again.
    pub fn is_retryable(&self) -> bool {
        match self {
            PurchasingError::Conflict { .. } => true,
            PurchasingError::Database(e) => e.is_retryable(),
            _ => false,
        }
    }

    /// Machine-readable error code.
    pub fn kind(&self) -> &'static str {
        match self {
            PurchasingError::Validation(_) => "VALIDATION_ERROR",
            PurchasingError::NotFound { .. } => "NOT_FOUND",
            PurchasingError::Conflict { .. } => "CONFLICT",
            PurchasingError::Database(_) => "DATABASE_ERROR",
            PurchasingError::Invariant(_) => "INTERNAL",
        }
    }
}

/// Convert database errors.
///
/// ## Error Mapping
/// ```text
/// UniqueViolation on n_rastreo  → Validation(Duplicate)
/// NotFound                      → NotFound
/// Other                         → Database
/// ```
impl From<DbError> for PurchasingError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::UniqueViolation { field, value } if field.contains("n_rastreo") => {
                PurchasingError::Validation(ValidationError::Duplicate {
                    field: "n_rastreo".to_string(),
                    value,
                })
            }
            DbError::NotFound { entity, id } => PurchasingError::NotFound { entity, id },
            other => PurchasingError::Database(other),
        }
    }
}

impl From<CoreError> for PurchasingError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Validation(e) => PurchasingError::Validation(e),
            CoreError::ProductNotFound(key) => PurchasingError::not_found("Product", key),
            CoreError::OrderNotFound(id) => PurchasingError::not_found("PurchaseOrder", id),
            CoreError::Invariant(msg) => PurchasingError::Invariant(msg),
        }
    }
}

impl From<sqlx::Error> for PurchasingError {
    fn from(err: sqlx::Error) -> Self {
        DbError::from(err).into()
    }
}

/// Result type for purchasing operations.
pub type PurchasingResult<T> = Result<T, PurchasingError>;

// =============================================================================
// Service
// =============================================================================

/// Purchase order operations over one database.
///
/// Holds no per-user state; everything a call needs arrives with it.
#[derive(Clone)]
pub struct PurchasingService {
    db: Database,
    config: PurchasingConfig,
    photos: Option<Arc<dyn PhotoStore>>,
}

impl fmt::Debug for PurchasingService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PurchasingService")
            .field("config", &self.config)
            .field("photos", &self.photos.is_some())
            .finish()
    }
}

impl PurchasingService {
    pub fn new(db: Database, config: PurchasingConfig) -> Self {
        PurchasingService {
            db,
            config,
            photos: None,
        }
    }

    /// Attaches the store used for order photos.
    pub fn with_photo_store(mut self, store: Arc<dyn PhotoStore>) -> Self {
        self.photos = Some(store);
        self
    }

    pub fn config(&self) -> &PurchasingConfig {
        &self.config
    }

    // -------------------------------------------------------------------------
    // Mutations
    // -------------------------------------------------------------------------

    /// Creates a purchase order and adds its units to the product's transit.
    ///
    /// ## Errors
    /// - `Validation(UnknownProduct)` - no product with that key
    /// - `Validation(Duplicate)` - tracking number already in use
    /// - `Validation(..)` - any other rejected field
    /// - `Conflict` - kept losing the race against concurrent writers
    #[instrument(
        skip(self, ctx, input),
        fields(actor = %ctx.actor, request_id = %ctx.request_id, external_key = %input.external_key)
    )]
    pub async fn create_order(
        &self,
        ctx: &RequestContext,
        input: CreateOrderInput,
    ) -> PurchasingResult<String> {
        validate_external_key(&input.external_key)?;
        let key = normalize_key(&input.external_key);
        let id = generate_order_id();
        if input.photo.is_some() {
            self.check_create(&key, &id, &input).await?;
        }
        let foto_url = self.upload_photo(&id, input.photo.as_ref()).await;

        let plan = self
            .with_product_transaction(&key, None, |product, _, now| {
                let mut plan = plan_create(product, id.clone(), &input, now)?;
                attach_photo(&mut plan, foto_url.as_deref());
                Ok(plan)
            })
            .await?;

        info!(
            order_id = %id,
            cantidad = input.cantidad,
            stock_transito = plan.product_after.stock_transito,
            stock_proyectado = plan.product_after.stock_proyectado,
            "Purchase order created"
        );
        Ok(id)
    }

    /// Edits an order; `input.receipt` records a receiving event.
    ///
    /// ## Errors
    /// - `NotFound` - no order with that id
    /// - `Validation(OverReceipt | ShippingWithoutReceipt | InvalidTransition
    ///   | QuantityBelowReceived | OrderClosed | ..)`
    /// - `Conflict` - kept losing the race against concurrent writers
    #[instrument(
        skip(self, ctx, id, input),
        fields(actor = %ctx.actor, request_id = %ctx.request_id, order_id = %id)
    )]
    pub async fn edit_order(
        &self,
        ctx: &RequestContext,
        id: &str,
        input: EditOrderInput,
    ) -> PurchasingResult<()> {
        let current = self.get_order(id).await?;
        let foto_url = self.upload_photo(id, input.photo.as_ref()).await;

        let plan = self
            .with_product_transaction(&current.external_key, Some(id), |product, order, now| {
                let order = order.ok_or_else(|| CoreError::OrderNotFound(id.to_string()))?;
                let mut plan = plan_edit(product, order, &input, now)?;
                attach_photo(&mut plan, foto_url.as_deref());
                Ok(plan)
            })
            .await?;

        if let Some(reception) = &plan.reception {
            info!(
                received = reception.received,
                shipping = %reception.shipping,
                effective_unit_cost = %reception.effective_unit_cost,
                costo_prom = %reception.new_average_cost,
                remaining = reception.remaining,
                estado = %reception.resulting_state,
                "Receiving event recorded"
            );
        }

        info!(
            stock = plan.product_after.stock,
            stock_transito = plan.product_after.stock_transito,
            stock_proyectado = plan.product_after.stock_proyectado,
            "Purchase order updated"
        );
        Ok(())
    }

    /// Deletes an order, releasing whatever it still had in transit.
    /// Received units stay on hand.
    #[instrument(
        skip(self, ctx, id),
        fields(actor = %ctx.actor, request_id = %ctx.request_id, order_id = %id)
    )]
    pub async fn delete_order(&self, ctx: &RequestContext, id: &str) -> PurchasingResult<()> {
        let current = self.get_order(id).await?;

        let plan = self
            .with_product_transaction(&current.external_key, Some(id), |product, order, _| {
                let order = order.ok_or_else(|| CoreError::OrderNotFound(id.to_string()))?;
                plan_delete(product, order)
            })
            .await?;

        info!(
            released = -plan.product_delta.stock_transito,
            stock_transito = plan.product_after.stock_transito,
            "Purchase order deleted"
        );
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    /// Gets an order by id.
    pub async fn get_order(&self, id: &str) -> PurchasingResult<PurchaseOrder> {
        self.db
            .purchase_orders()
            .get_by_id(id)
            .await?
            .ok_or_else(|| PurchasingError::not_found("PurchaseOrder", id))
    }

    /// Lists every order of a product.
    pub async fn list_orders_for_product(
        &self,
        external_key: &str,
    ) -> PurchasingResult<Vec<PurchaseOrder>> {
        let key = normalize_key(external_key);
        self.require_product(&key).await?;
        Ok(self.db.purchase_orders().list_for_product(&key).await?)
    }

    /// Compares a product's stored `stock_transito` with what its orders say
    /// it should be. Read-only: drift is reported, never rewritten.
    pub async fn audit_transit(&self, external_key: &str) -> PurchasingResult<TransitAudit> {
        let key = normalize_key(external_key);
        let product = self.require_product(&key).await?;
        let orders = self.db.purchase_orders().list_for_product(&key).await?;

        let audit = TransitAudit::compute(&key, product.stock_transito, &orders);
        if audit.is_consistent() {
            debug!(external_key = %key, expected = audit.expected, "Transit consistent");
        } else {
            warn!(
                external_key = %key,
                recorded = audit.recorded,
                expected = audit.expected,
                drift = audit.drift(),
                "Transit drift detected"
            );
        }
        Ok(audit)
    }

    // -------------------------------------------------------------------------
    // Transaction Boundary
    // -------------------------------------------------------------------------

    /// Reads the product (and order), plans with `plan_fn`, and commits the
    /// plan atomically, retrying on lost races.
    ///
    /// `plan_fn` must be pure: it may run once per attempt.
    pub async fn with_product_transaction<F>(
        &self,
        external_key: &str,
        order_id: Option<&str>,
        plan_fn: F,
    ) -> PurchasingResult<MutationPlan>
    where
        F: Fn(&Product, Option<&PurchaseOrder>, DateTime<Utc>) -> CoreResult<MutationPlan>,
    {
        let max_attempts = self.config.max_retries.saturating_add(1);
        let mut backoff = self.config.backoff();
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;

            match self.attempt(external_key, order_id, &plan_fn).await {
                Ok(Some(plan)) => {
                    if attempt > 1 {
                        debug!(attempt, "Committed after retry");
                    }
                    return Ok(plan);
                }
                Ok(None) => {
                    debug!(attempt, external_key = %external_key, "Version moved, retrying");
                }
                Err(e) if e.is_retryable() => {
                    warn!(attempt, error = %e, "Retryable failure");
                }
                Err(PurchasingError::Invariant(msg)) => {
                    error!(external_key = %external_key, "Reconciliation invariant broke: {}", msg);
                    return Err(PurchasingError::Invariant(msg));
                }
                Err(e) => return Err(e),
            }

            if attempt >= max_attempts {
                warn!(
                    external_key = %external_key,
                    attempts = attempt,
                    "Giving up after repeated conflicts"
                );
                return Err(PurchasingError::Conflict {
                    key: external_key.to_string(),
                    attempts: attempt,
                });
            }

            match backoff.next_backoff() {
                Some(duration) => {
                    debug!(?duration, attempt, "Waiting before retry");
                    tokio::time::sleep(duration).await;
                }
                None => {
                    return Err(PurchasingError::Conflict {
                        key: external_key.to_string(),
                        attempts: attempt,
                    });
                }
            }
        }
    }

    /// One read-plan-commit pass. `Ok(None)` means a version guard missed.
    async fn attempt<F>(
        &self,
        external_key: &str,
        order_id: Option<&str>,
        plan_fn: &F,
    ) -> PurchasingResult<Option<MutationPlan>>
    where
        F: Fn(&Product, Option<&PurchaseOrder>, DateTime<Utc>) -> CoreResult<MutationPlan>,
    {
        let product = self
            .db
            .products()
            .get_by_key(external_key)
            .await?
            .ok_or_else(|| ValidationError::UnknownProduct(external_key.to_string()))?;

        let order = match order_id {
            Some(id) => Some(self.get_order(id).await?),
            None => None,
        };

        let now = Utc::now();
        let plan = plan_fn(&product, order.as_ref(), now)?;

        if self.commit(&product, &plan, now).await? {
            Ok(Some(plan))
        } else {
            Ok(None)
        }
    }

    /// Writes a plan in one transaction. `Ok(false)` means a version guard
    /// missed and everything was rolled back.
    async fn commit(
        &self,
        product: &Product,
        plan: &MutationPlan,
        now: DateTime<Utc>,
    ) -> PurchasingResult<bool> {
        let mut tx = self.db.pool().begin().await?;

        if let OrderChange::Insert(order) | OrderChange::Update(order) = &plan.order {
            if let Some(n_rastreo) = &order.n_rastreo {
                if PurchaseOrderRepository::tracking_in_use(&mut *tx, n_rastreo, &order.id).await? {
                    return Err(ValidationError::Duplicate {
                        field: "n_rastreo".to_string(),
                        value: n_rastreo.clone(),
                    }
                    .into());
                }
            }
        }

        let product_written = ProductRepository::apply_delta(
            &mut *tx,
            &product.id,
            product.sync_version,
            &plan.product_delta,
            now,
        )
        .await?;

        if !product_written {
            tx.rollback().await?;
            return Ok(false);
        }

        let order_written = match &plan.order {
            OrderChange::Insert(order) => {
                PurchaseOrderRepository::insert(&mut *tx, order).await?;
                true
            }
            OrderChange::Update(order) => PurchaseOrderRepository::update_cas(&mut *tx, order).await?,
            OrderChange::Delete { id, sync_version } => {
                PurchaseOrderRepository::delete_cas(&mut *tx, id, *sync_version).await?
            }
        };

        if !order_written {
            tx.rollback().await?;
            return Ok(false);
        }

        tx.commit().await?;
        Ok(true)
    }

    // -------------------------------------------------------------------------
    // Helpers
    // -------------------------------------------------------------------------

    async fn require_product(&self, key: &str) -> PurchasingResult<Product> {
        self.db
            .products()
            .get_by_key(key)
            .await?
            .ok_or_else(|| PurchasingError::not_found("Product", key))
    }

    /// Plans a create against the current product without writing, so an
    /// order that would be rejected never uploads its photo.
    async fn check_create(
        &self,
        key: &str,
        id: &str,
        input: &CreateOrderInput,
    ) -> PurchasingResult<()> {
        let product = self
            .db
            .products()
            .get_by_key(key)
            .await?
            .ok_or_else(|| ValidationError::UnknownProduct(key.to_string()))?;

        let plan = plan_create(&product, id.to_string(), input, Utc::now())?;

        if let OrderChange::Insert(order) = &plan.order {
            if let Some(n_rastreo) = &order.n_rastreo {
                let mut conn = self.db.pool().acquire().await?;
                if PurchaseOrderRepository::tracking_in_use(&mut *conn, n_rastreo, id).await? {
                    return Err(ValidationError::Duplicate {
                        field: "n_rastreo".to_string(),
                        value: n_rastreo.clone(),
                    }
                    .into());
                }
            }
        }
        Ok(())
    }

    /// Best-effort upload; failures are logged and swallowed.
    async fn upload_photo(&self, order_id: &str, photo: Option<&PhotoUpload>) -> Option<String> {
        let photo = photo?;

        let Some(store) = &self.photos else {
            warn!(order_id = %order_id, "Photo attached but no photo store configured");
            return None;
        };

        match store.upload(order_id, photo).await {
            Ok(url) => {
                debug!(order_id = %order_id, url = %url, "Photo uploaded");
                Some(url)
            }
            Err(e) => {
                warn!(
                    order_id = %order_id,
                    file_name = %photo.file_name,
                    error = %e,
                    "Photo upload failed, saving order without it"
                );
                None
            }
        }
    }
}

fn attach_photo(plan: &mut MutationPlan, foto_url: Option<&str>) {
    let Some(url) = foto_url else {
        return;
    };
    if let OrderChange::Insert(order) | OrderChange::Update(order) = &mut plan.order {
        order.foto_url = Some(url.to_string());
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
