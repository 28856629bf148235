//! # Reception Processor
//!
//! Evaluates one receiving event against an order and its product.
//!
//! ## Flow
//! ```text
//! ReceiptInput { qty, shipping }
//!      │
//!      ▼
//! process_reception()  ← THIS MODULE
//!      │  base      = total_costo / cantidad
//!      │  effective = base + shipping / qty
//!      │  average   = new_average(stock, costo_prom, qty, effective)
//!      ▼
//! ReceptionOutcome ──► lifecycle::plan_edit ──► transit delta + stock delta
//! ```
//!
//! Nothing here touches `stock_transito`: the lifecycle planner feeds the
//! updated received total into the transit reconciler, so the decrement is
//! counted exactly once.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::costing::{effective_unit_cost, new_average, unit_cost};
use crate::error::ValidationError;
use crate::types::{Product, PurchaseOrder, ReceiptInput, TransitState};
use crate::validation::{validate_cost, ValidationResult};

/// Result of a valid receiving event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReceptionOutcome {
    /// Units arriving in this event.
    pub received: i64,

    /// Shipping paid for this event.
    pub shipping: Decimal,

    /// `total_costo / cantidad` of the order.
    pub base_unit_cost: Decimal,

    /// Base unit cost plus this event's shipping per unit.
    pub effective_unit_cost: Decimal,

    /// Product average cost after blending this lot in.
    pub new_average_cost: Decimal,

    /// Order's `cant_recibido_total` after this event.
    pub new_recibido_total: i64,

    /// Order's `costo_envio_total` after this event.
    pub new_costo_envio_total: Decimal,

    /// Units still pending after this event.
    pub remaining: i64,

    /// State the order moves to.
    pub resulting_state: TransitState,
}

/// Validates and evaluates a receiving event.
///
/// `order` is the order as it stands with any same-request field edits
/// already applied (an edited `cantidad` or `total_costo` counts).
///
/// ## Errors (checked in this order)
/// - `OrderClosed`: the order is `RECIBIDO` or `ORDEN_CANCELADA`
/// - `ShippingWithoutReceipt`: shipping > 0 with no units
/// - `MustBePositive`: units <= 0
/// - `Negative` / `OutOfRange`: shipping < 0 or above `MAX_COST`
/// - `NotAllowed`: `target` outside `{RECIBIDO, PENDIENTE_DE_RETIRAR}`
/// - `OverReceipt`: units exceed what is still pending
/// - `CostOverflow`: the blended cost does not fit in a `Decimal`
///
/// ## Resulting State
/// - units still pending: `RECIBIDO_PARCIALMENTE`
/// - nothing pending: `RECIBIDO`, or `PENDIENTE_DE_RETIRAR` when requested
pub fn process_reception(
    product: &Product,
    order: &PurchaseOrder,
    event: &ReceiptInput,
    target: Option<TransitState>,
) -> ValidationResult<ReceptionOutcome> {
    if order.estado_transito.is_terminal() {
        return Err(ValidationError::OrderClosed {
            state: order.estado_transito.to_string(),
        });
    }

    let qty = event.received_qty_delta;
    let shipping = event.shipping_cost_delta;

    if qty == 0 && shipping > Decimal::ZERO {
        return Err(ValidationError::ShippingWithoutReceipt);
    }
    if qty <= 0 {
        return Err(ValidationError::must_be_positive("received_qty_delta"));
    }
    validate_cost("shipping_cost_delta", shipping)?;

    if let Some(target) = target {
        if !target.is_receiving_target() {
            return Err(ValidationError::NotAllowed {
                field: "estado_transito".to_string(),
                allowed: TransitState::RECEIVING_TARGETS
                    .iter()
                    .map(|s| s.as_str().to_string())
                    .collect(),
            });
        }
    }

    let pending = order.remaining();
    if qty > pending {
        return Err(ValidationError::OverReceipt {
            requested: qty,
            remaining: pending,
        });
    }

    let overflow = |field: &str| ValidationError::CostOverflow {
        field: field.to_string(),
    };

    let base = unit_cost(order.total_costo, order.cantidad);
    let effective = effective_unit_cost(base, shipping, qty)
        .ok_or_else(|| overflow("effective_unit_cost"))?;
    let new_average_cost = new_average(product.stock, product.costo_prom, qty, effective)
        .ok_or_else(|| overflow("costo_prom"))?;
    let new_costo_envio_total = order
        .costo_envio_total
        .checked_add(shipping)
        .ok_or_else(|| overflow("costo_envio_total"))?;
    let remaining = pending - qty;

    let resulting_state = match (remaining, target) {
        (r, _) if r > 0 => TransitState::RecibidoParcialmente,
        (_, Some(TransitState::PendienteDeRetirar)) => TransitState::PendienteDeRetirar,
        _ => TransitState::Recibido,
    };

    Ok(ReceptionOutcome {
        received: qty,
        shipping,
        base_unit_cost: base,
        effective_unit_cost: effective,
        new_average_cost,
        new_recibido_total: order.cant_recibido_total + qty,
        new_costo_envio_total,
        remaining,
        resulting_state,
    })
}

// =============================================================================
// Unit Tests
// =============================================================================
