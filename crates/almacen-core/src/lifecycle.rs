//! # Order Lifecycle Manager
//!
//! Pure planners for create, edit (with or without a receiving event) and
//! delete. Each returns a [`MutationPlan`] that the persistence layer commits
//! atomically: one product delta plus one order change.
//!
//! ## Planning Pipeline
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  stored product + stored order (read with sync_version)                 │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  1. validate input fields             (validation)                      │
//! │  2. apply field edits to a copy                                         │
//! │  3. receiving event?                                                    │
//! │       yes → process_reception         (reception + costing)             │
//! │       no  → check state transition    (TransitState::can_transition_to) │
//! │  4. transit delta = after − before    (transit)                         │
//! │  5. apply delta to product copy       (ledger, invariants checked)      │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  MutationPlan { product_delta, product_after, order }                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A rejected plan has no effect: nothing is written until the caller
//! commits a plan.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::costing::unit_cost;
use crate::error::{CoreError, CoreResult, ValidationError};
use crate::ledger::ProductDelta;
use crate::reception::{process_reception, ReceptionOutcome};
use crate::transit::transit_delta;
use crate::types::{CreateOrderInput, EditOrderInput, Product, PurchaseOrder, TransitState};
use crate::validation::{clean_text, validate_cost, validate_quantity, validate_tracking_number};

/// What happens to the order row.
#[derive(Debug, Clone, PartialEq)]
pub enum OrderChange {
    /// New order; `sync_version` starts at 0.
    Insert(PurchaseOrder),
    /// Replace the row whose version is still `order.sync_version`.
    Update(PurchaseOrder),
    /// Remove the row whose version is still `sync_version`.
    Delete { id: String, sync_version: i64 },
}

impl OrderChange {
    pub fn order_id(&self) -> &str {
        match self {
            OrderChange::Insert(order) | OrderChange::Update(order) => &order.id,
            OrderChange::Delete { id, .. } => id,
        }
    }
}

/// Everything one mutation writes.
#[derive(Debug, Clone, PartialEq)]
pub struct MutationPlan {
    /// Delta for the product row (CAS on the product's `sync_version`).
    pub product_delta: ProductDelta,

    /// The product as it will read after commit (minus the version bump).
    pub product_after: Product,

    pub order: OrderChange,

    /// Present when the plan carries a receiving event.
    pub reception: Option<ReceptionOutcome>,
}

impl MutationPlan {
    fn build(
        product: &Product,
        product_delta: ProductDelta,
        order: OrderChange,
        reception: Option<ReceptionOutcome>,
    ) -> CoreResult<Self> {
        let product_after = product_delta.apply_to(product)?;
        Ok(MutationPlan {
            product_delta,
            product_after,
            order,
            reception,
        })
    }
}

fn ensure_same_product(product: &Product, order: &PurchaseOrder) -> CoreResult<()> {
    if product.external_key != order.external_key {
        return Err(CoreError::Invariant(format!(
            "order {} belongs to {}, not {}",
            order.id, order.external_key, product.external_key
        )));
    }
    Ok(())
}

// =============================================================================
// Create
// =============================================================================

/// Plans a new order for `product`.
///
/// ## Rules
/// - `cantidad` in `1..=MAX_ORDER_QUANTITY`, `total_costo` in `0..=MAX_COST`
/// - initial state defaults to `EN_TRANSITO`; `RECIBIDO` and
///   `RECIBIDO_PARCIALMENTE` are rejected (units arrive through receiving
///   events only), `ORDEN_CANCELADA` is accepted and contributes nothing
/// - the new order's pending units are added to `stock_transito`
///
/// Tracking-number uniqueness is checked by the caller, which has the store.
pub fn plan_create(
    product: &Product,
    id: String,
    input: &CreateOrderInput,
    now: DateTime<Utc>,
) -> CoreResult<MutationPlan> {
    validate_quantity(input.cantidad)?;
    validate_cost("total_costo", input.total_costo)?;

    let estado = input.estado_transito.unwrap_or_default();
    if matches!(
        estado,
        TransitState::Recibido | TransitState::RecibidoParcialmente
    ) {
        return Err(ValidationError::NotAllowed {
            field: "estado_transito".to_string(),
            allowed: TransitState::ALL
                .iter()
                .filter(|s| !matches!(s, TransitState::Recibido | TransitState::RecibidoParcialmente))
                .map(|s| s.as_str().to_string())
                .collect(),
        }
        .into());
    }

    let order = PurchaseOrder {
        id,
        external_key: product.external_key.clone(),
        estado_transito: estado,
        cantidad: input.cantidad,
        cant_recibido_total: 0,
        total_costo: input.total_costo,
        costo_unitario: unit_cost(input.total_costo, input.cantidad),
        costo_envio_total: Decimal::ZERO,
        n_rastreo: validate_tracking_number(input.n_rastreo.as_deref())?,
        proveedor: clean_text(input.proveedor.as_deref()),
        notas: clean_text(input.notas.as_deref()),
        foto_url: None,
        fecha_compra: input.fecha_compra.unwrap_or_else(|| now.date_naive()),
        fecha_recibido: None,
        created_at: now,
        updated_at: now,
        sync_version: 0,
    };

    let delta = ProductDelta::transit(transit_delta(None, Some(order.transit_snapshot())));
    MutationPlan::build(product, delta, OrderChange::Insert(order), None)
}

// =============================================================================
// Edit
// =============================================================================

/// Plans an edit of `order`, optionally carrying one receiving event.
///
/// ## Without a receiving event
/// Fields may change; a requested state must pass
/// [`TransitState::can_transition_to`]. `cantidad` may not change on a
/// terminal order nor drop below what has already arrived.
///
/// ## With a receiving event
/// See [`process_reception`]. Field edits in the same request are applied
/// first, so an edited `total_costo` prices the arriving units.
///
/// ## Example
/// ```text
/// order: EN_TRANSITO, cantidad=5, recibido=0     product: stock_transito=5
///   edit { receipt: (3, ship 6) }  → RECIBIDO_PARCIALMENTE, transit 2, stock +3
///   edit { receipt: (2, ship 0) }  → RECIBIDO,              transit 0, stock +2
/// ```
pub fn plan_edit(
    product: &Product,
    order: &PurchaseOrder,
    input: &EditOrderInput,
    now: DateTime<Utc>,
) -> CoreResult<MutationPlan> {
    ensure_same_product(product, order)?;

    let mut next = order.clone();

    if let Some(cantidad) = input.cantidad {
        if cantidad != order.cantidad {
            if order.estado_transito.is_terminal() {
                return Err(ValidationError::OrderClosed {
                    state: order.estado_transito.to_string(),
                }
                .into());
            }
            validate_quantity(cantidad)?;
            if cantidad < order.cant_recibido_total {
                return Err(ValidationError::QuantityBelowReceived {
                    cantidad,
                    recibido: order.cant_recibido_total,
                }
                .into());
            }
            next.cantidad = cantidad;
        }
    }

    if let Some(total) = input.total_costo {
        validate_cost("total_costo", total)?;
        next.total_costo = total;
    }
    next.costo_unitario = unit_cost(next.total_costo, next.cantidad);

    if let Some(raw) = input.n_rastreo.as_deref() {
        next.n_rastreo = validate_tracking_number(Some(raw))?;
    }
    if let Some(raw) = input.proveedor.as_deref() {
        next.proveedor = clean_text(Some(raw));
    }
    if let Some(raw) = input.notas.as_deref() {
        next.notas = clean_text(Some(raw));
    }
    if let Some(fecha) = input.fecha_compra {
        next.fecha_compra = fecha;
    }

    let receipt = input.receipt.as_ref().filter(|r| !r.is_empty());
    let mut delta = ProductDelta::default();
    let mut reception = None;

    match receipt {
        Some(event) => {
            let outcome = process_reception(product, &next, event, input.estado_transito)?;

            next.cant_recibido_total = outcome.new_recibido_total;
            next.costo_envio_total = outcome.new_costo_envio_total;
            next.estado_transito = outcome.resulting_state;
            if outcome.resulting_state == TransitState::Recibido {
                next.fecha_recibido =
                    Some(event.fecha_recibido.unwrap_or_else(|| now.date_naive()));
            }

            delta.stock = outcome.received;
            delta.costo_prom = Some(outcome.new_average_cost);
            reception = Some(outcome);
        }
        None => {
            if let Some(to) = input.estado_transito {
                if !order.estado_transito.can_transition_to(to, next.remaining()) {
                    return Err(ValidationError::InvalidTransition {
                        from: order.estado_transito.to_string(),
                        to: to.to_string(),
                    }
                    .into());
                }
                next.estado_transito = to;
            }
        }
    }

    delta.stock_transito = transit_delta(
        Some(order.transit_snapshot()),
        Some(next.transit_snapshot()),
    );
    next.updated_at = now;

    MutationPlan::build(product, delta, OrderChange::Update(next), reception)
}

// =============================================================================
// Delete
// =============================================================================

/// Plans the deletion of `order`.
///
/// Pending units of an active order leave `stock_transito`; units already
/// received stay on hand and the average cost is left alone.
pub fn plan_delete(product: &Product, order: &PurchaseOrder) -> CoreResult<MutationPlan> {
    ensure_same_product(product, order)?;

    let delta = ProductDelta::transit(transit_delta(Some(order.transit_snapshot()), None));
    MutationPlan::build(
        product,
        delta,
        OrderChange::Delete {
            id: order.id.clone(),
            sync_version: order.sync_version,
        },
        None,
    )
}

// =============================================================================
// Unit Tests
// =============================================================================
