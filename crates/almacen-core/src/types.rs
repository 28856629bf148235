//! # Domain Types
//!
//! Core domain types for purchasing and inventory reconciliation.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌──────────────────────┐        ┌──────────────────────────┐          │
//! │  │      Product         │◄───────│     PurchaseOrder        │          │
//! │  │  ──────────────────  │  key   │  ──────────────────────  │          │
//! │  │  external_key        │        │  external_key            │          │
//! │  │  stock               │        │  estado_transito         │          │
//! │  │  stock_transito      │        │  cantidad                │          │
//! │  │  stock_reservado     │        │  cant_recibido_total     │          │
//! │  │  stock_proyectado    │        │  total_costo             │          │
//! │  │  costo_prom          │        │  costo_envio_total       │          │
//! │  └──────────────────────┘        └──────────────────────────┘          │
//! │                                                                         │
//! │  TransitState: EN_TRANSITO | SIN_PREALERTAR | PENDIENTE_DE_RETIRAR     │
//! │                RECIBIDO_PARCIALMENTE | RECIBIDO | ORDEN_CANCELADA       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Wire Contract
//! Field names are shared with the inventory collaborator and stay in
//! Spanish (`stock_transito`, `costo_prom`, ...).

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use ts_rs::TS;

use crate::error::{CoreResult, ValidationError};
use crate::ledger;
use crate::transit::TransitSnapshot;
use crate::validation::{coerce_decimal, coerce_int, normalize_key};

// =============================================================================
// Transit State
// =============================================================================

/// Where a purchase order is in its journey from supplier to shelf.
///
/// ## State Machine
/// ```text
///            ┌───────────────── active-in-transit ─────────────────┐
///            │                                                      │
///  create ──►│ EN_TRANSITO ◄──► SIN_PREALERTAR ◄──► PENDIENTE_DE_  │
///            │      │                                 RETIRAR       │
///            │      └──── receive (partial) ──► RECIBIDO_PARCIALMENTE│
///            └──────────────┬──────────────────────────┬────────────┘
///                           │ remaining == 0           │ cancel
///                           ▼                          ▼
///                      RECIBIDO (terminal)     ORDEN_CANCELADA (terminal)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "SCREAMING_SNAKE_CASE"))]
#[ts(export)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransitState {
    /// Shipped by the supplier, on its way.
    EnTransito,
    /// Bought, but the carrier has not been pre-alerted yet.
    SinPrealertar,
    /// Arrived at the carrier, waiting for pickup.
    PendienteDeRetirar,
    /// Some units received, the rest still pending.
    RecibidoParcialmente,
    /// Fully received and settled.
    Recibido,
    /// Voided.
    OrdenCancelada,
}

impl TransitState {
    /// All states, in display order.
    pub const ALL: [TransitState; 6] = [
        TransitState::EnTransito,
        TransitState::SinPrealertar,
        TransitState::PendienteDeRetirar,
        TransitState::RecibidoParcialmente,
        TransitState::Recibido,
        TransitState::OrdenCancelada,
    ];

    /// States a caller may request while recording a receiving event.
    pub const RECEIVING_TARGETS: [TransitState; 2] =
        [TransitState::Recibido, TransitState::PendienteDeRetirar];

    /// Persisted (uppercase) literal.
    pub const fn as_str(&self) -> &'static str {
        match self {
            TransitState::EnTransito => "EN_TRANSITO",
            TransitState::SinPrealertar => "SIN_PREALERTAR",
            TransitState::PendienteDeRetirar => "PENDIENTE_DE_RETIRAR",
            TransitState::RecibidoParcialmente => "RECIBIDO_PARCIALMENTE",
            TransitState::Recibido => "RECIBIDO",
            TransitState::OrdenCancelada => "ORDEN_CANCELADA",
        }
    }

    /// Whether pending units of an order in this state count toward the
    /// product's `stock_transito`.
    pub const fn is_active(&self) -> bool {
        matches!(
            self,
            TransitState::EnTransito
                | TransitState::SinPrealertar
                | TransitState::PendienteDeRetirar
                | TransitState::RecibidoParcialmente
        )
    }

    /// Settled or voided; the order no longer moves.
    pub const fn is_terminal(&self) -> bool {
        !self.is_active()
    }

    /// Whether a receiving event may request this state.
    pub fn is_receiving_target(&self) -> bool {
        Self::RECEIVING_TARGETS.contains(self)
    }

    /// Whether an edit *without* a receiving event may move an order from
    /// `self` to `to`.
    ///
    /// ## Rules
    /// - Staying put is always allowed
    /// - Terminal states never move
    /// - `RECIBIDO` needs nothing left to receive (`remaining == 0`);
    ///   otherwise the units must arrive through a receiving event
    /// - Any other active or cancelled target is allowed
    pub fn can_transition_to(&self, to: TransitState, remaining: i64) -> bool {
        if *self == to {
            return true;
        }
        if self.is_terminal() {
            return false;
        }
        match to {
            TransitState::Recibido => remaining <= 0,
            _ => true,
        }
    }

    fn literals() -> Vec<String> {
        Self::ALL.iter().map(|s| s.as_str().to_string()).collect()
    }
}

impl Default for TransitState {
    fn default() -> Self {
        TransitState::EnTransito
    }
}

impl fmt::Display for TransitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Case-insensitive parse; spaces and hyphens are accepted for underscores.
impl FromStr for TransitState {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let canonical: String = s
            .trim()
            .chars()
            .map(|c| match c {
                ' ' | '-' => '_',
                other => other.to_ascii_uppercase(),
            })
            .collect();

        TransitState::ALL
            .iter()
            .copied()
            .find(|state| state.as_str() == canonical)
            .ok_or_else(|| ValidationError::NotAllowed {
                field: "estado_transito".to_string(),
                allowed: TransitState::literals(),
            })
    }
}

impl<'de> Deserialize<'de> for TransitState {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

// =============================================================================
// Product
// =============================================================================

/// A product's stock pools and average cost.
///
/// Created and owned by the inventory module; the purchasing core only
/// mutates `stock`, `stock_transito`, `stock_proyectado` and `costo_prom`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Product {
    /// Internal identifier (UUID v4).
    pub id: String,

    /// Normalized `name + condition`, unique.
    pub external_key: String,

    /// Display name.
    pub nombre: String,

    /// Condition (new, used, refurbished...).
    pub condicion: String,

    /// Physical units on hand.
    pub stock: i64,

    /// Units ordered but not yet received.
    pub stock_transito: i64,

    /// Units earmarked for pending sales.
    pub stock_reservado: i64,

    /// `stock + stock_transito - stock_reservado`, never set independently.
    pub stock_proyectado: i64,

    /// Weighted-average unit cost of on-hand stock.
    #[ts(as = "String")]
    pub costo_prom: Decimal,

    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,

    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,

    /// Optimistic concurrency token, bumped on every write.
    pub sync_version: i64,
}

impl Product {
    /// Builds a product from a loosely-typed document as sent by the
    /// inventory collaborator.
    ///
    /// ## Coercion
    /// Numeric fields that are absent, null or non-numeric read as 0.
    /// `stock_proyectado` is always recomputed, whatever the document says.
    /// When `external_key` is missing it is derived from `nombre` and
    /// `condicion`.
    pub fn from_document(doc: &Value, now: DateTime<Utc>) -> CoreResult<Product> {
        let text = |field: &str| {
            doc.get(field)
                .and_then(Value::as_str)
                .map(str::trim)
                .unwrap_or_default()
                .to_string()
        };

        let id = text("id");
        if id.is_empty() {
            return Err(ValidationError::required("id").into());
        }

        let nombre = text("nombre");
        let condicion = text("condicion");
        let external_key = match text("external_key") {
            key if !key.is_empty() => normalize_key(&key),
            _ => crate::validation::normalize_external_key(&nombre, &condicion)?,
        };

        let mut product = Product {
            id,
            external_key,
            nombre,
            condicion,
            stock: coerce_int(doc.get("stock")).max(0),
            stock_transito: coerce_int(doc.get("stock_transito")).max(0),
            stock_reservado: coerce_int(doc.get("stock_reservado")).max(0),
            stock_proyectado: 0,
            costo_prom: coerce_decimal(doc.get("costo_prom")).max(Decimal::ZERO),
            created_at: now,
            updated_at: now,
            sync_version: 0,
        };
        product.recompute_projection();
        Ok(product)
    }

    /// Recomputes `stock_proyectado` from the three stored pools.
    pub fn recompute_projection(&mut self) {
        self.stock_proyectado =
            ledger::projected(self.stock, self.stock_transito, self.stock_reservado);
    }

    /// Whether `stock_proyectado` agrees with the pools it is derived from.
    pub fn projection_is_consistent(&self) -> bool {
        self.stock_proyectado
            == ledger::projected(self.stock, self.stock_transito, self.stock_reservado)
    }
}

// =============================================================================
// Purchase Order
// =============================================================================

/// A purchase order for a single product.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct PurchaseOrder {
    pub id: String,

    /// Key of the product being bought.
    pub external_key: String,

    pub estado_transito: TransitState,

    /// Ordered quantity.
    pub cantidad: i64,

    /// Units received so far, across all receiving events.
    pub cant_recibido_total: i64,

    /// Merchandise cost for the whole order.
    #[ts(as = "String")]
    pub total_costo: Decimal,

    /// `total_costo / cantidad`, persisted for display.
    #[ts(as = "String")]
    pub costo_unitario: Decimal,

    /// Shipping attributed to receiving events so far.
    #[ts(as = "String")]
    pub costo_envio_total: Decimal,

    /// Carrier tracking number, unique when present.
    pub n_rastreo: Option<String>,

    pub proveedor: Option<String>,

    pub notas: Option<String>,

    /// Set by the photo upload seam; absent when no upload succeeded.
    pub foto_url: Option<String>,

    #[ts(as = "String")]
    pub fecha_compra: NaiveDate,

    /// Date the order became `RECIBIDO` through a receiving event.
    #[ts(as = "Option<String>")]
    pub fecha_recibido: Option<NaiveDate>,

    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,

    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,

    pub sync_version: i64,
}

impl PurchaseOrder {
    /// Units still to be received (never negative).
    #[inline]
    pub fn remaining(&self) -> i64 {
        (self.cantidad - self.cant_recibido_total).max(0)
    }

    /// The fields the transit reconciler looks at.
    #[inline]
    pub fn transit_snapshot(&self) -> TransitSnapshot {
        TransitSnapshot {
            state: self.estado_transito,
            cantidad: self.cantidad,
            recibido: self.cant_recibido_total,
        }
    }
}

// =============================================================================
// Request Inputs
// =============================================================================

/// A photo attached to an order create/edit request.
///
/// Upload is best-effort: a failure is logged and the order is saved
/// without the new photo.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhotoUpload {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// Input for creating a purchase order.
#[derive(Debug, Clone, Default, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct CreateOrderInput {
    /// Key of an existing product.
    pub external_key: String,

    pub cantidad: i64,

    #[ts(as = "String")]
    pub total_costo: Decimal,

    /// Initial state; defaults to `EN_TRANSITO`.
    #[serde(default)]
    pub estado_transito: Option<TransitState>,

    #[serde(default)]
    pub n_rastreo: Option<String>,

    #[serde(default)]
    pub proveedor: Option<String>,

    #[serde(default)]
    pub notas: Option<String>,

    /// Defaults to the request date.
    #[serde(default)]
    #[ts(as = "Option<String>")]
    pub fecha_compra: Option<NaiveDate>,

    #[serde(skip)]
    #[ts(skip)]
    pub photo: Option<PhotoUpload>,
}

/// A receiving event carried by an order edit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ReceiptInput {
    /// Units arriving in this event.
    pub received_qty_delta: i64,

    /// Shipping paid for this event only.
    #[serde(default)]
    #[ts(as = "String")]
    pub shipping_cost_delta: Decimal,

    /// Arrival date; defaults to the request date.
    #[serde(default)]
    #[ts(as = "Option<String>")]
    pub fecha_recibido: Option<NaiveDate>,
}

impl ReceiptInput {
    /// Whether this carries anything at all (a zero/zero receipt is ignored).
    pub fn is_empty(&self) -> bool {
        self.received_qty_delta == 0 && self.shipping_cost_delta.is_zero()
    }
}

/// Input for editing a purchase order. `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct EditOrderInput {
    #[serde(default)]
    pub cantidad: Option<i64>,

    #[serde(default)]
    #[ts(as = "Option<String>")]
    pub total_costo: Option<Decimal>,

    /// Desired state. While receiving, only `RECIBIDO` or
    /// `PENDIENTE_DE_RETIRAR` may be requested.
    #[serde(default)]
    pub estado_transito: Option<TransitState>,

    /// `Some("")` clears the tracking number.
    #[serde(default)]
    pub n_rastreo: Option<String>,

    #[serde(default)]
    pub proveedor: Option<String>,

    #[serde(default)]
    pub notas: Option<String>,

    #[serde(default)]
    #[ts(as = "Option<String>")]
    pub fecha_compra: Option<NaiveDate>,

    #[serde(default)]
    pub receipt: Option<ReceiptInput>,

    #[serde(skip)]
    #[ts(skip)]
    pub photo: Option<PhotoUpload>,
}

// =============================================================================
// Unit Tests
// =============================================================================
