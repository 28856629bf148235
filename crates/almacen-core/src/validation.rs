//! # Validation Module
//!
//! Input validation and wire coercion for purchasing requests.
//!
//! ## Validation Strategy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Layers                                  │
//! │                                                                         │
//! │  Layer 1: Caller (UI / import)                                         │
//! │  └── Basic format checks, immediate feedback                           │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: THIS MODULE + lifecycle planners                             │
//! │  ├── Field rules (positive quantity, non-negative cost, ...)           │
//! │  └── Order rules (over-receipt, transitions) in `lifecycle`            │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 3: Database (SQLite)                                            │
//! │  ├── UNIQUE (external_key), UNIQUE (n_rastreo)                         │
//! │  └── CHECK (cant_recibido_total <= cantidad)                           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::str::FromStr;

use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use serde_json::Value;

use crate::error::ValidationError;
use crate::{MAX_COST, MAX_ORDER_QUANTITY, MAX_TRACKING_NUMBER_LEN};

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

// =============================================================================
// Keys
// =============================================================================

/// Normalizes a product key for storage and lookup: trimmed, inner
/// whitespace collapsed to single spaces, uppercased.
///
/// ## Example
/// ```rust
/// use almacen_core::validation::normalize_key;
///
/// assert_eq!(normalize_key("  iPhone 13   usado "), "IPHONE 13 USADO");
/// ```
pub fn normalize_key(raw: &str) -> String {
    raw.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_uppercase()
}

/// Builds a product's `external_key` from its name and condition.
///
/// ## Rules
/// - Name is required
/// - Condition may be empty (key is then just the name)
/// - Result must be at most 200 characters
pub fn normalize_external_key(name: &str, condition: &str) -> ValidationResult<String> {
    if name.trim().is_empty() {
        return Err(ValidationError::required("nombre"));
    }

    let key = normalize_key(&format!("{} {}", name, condition));
    validate_external_key(&key)?;
    Ok(key)
}

/// Validates a product key supplied by a caller.
pub fn validate_external_key(key: &str) -> ValidationResult<()> {
    let key = key.trim();

    if key.is_empty() {
        return Err(ValidationError::required("external_key"));
    }

    if key.chars().count() > 200 {
        return Err(ValidationError::TooLong {
            field: "external_key".to_string(),
            max: 200,
        });
    }

    Ok(())
}

// =============================================================================
// Numeric Validators
// =============================================================================

/// Validates an ordered quantity.
///
/// ## Rules
/// - Must be positive (> 0)
/// - Must not exceed MAX_ORDER_QUANTITY
///
/// ## Example
/// ```rust
/// use almacen_core::validation::validate_quantity;
///
/// assert!(validate_quantity(5).is_ok());
/// assert!(validate_quantity(0).is_err());
/// ```
pub fn validate_quantity(qty: i64) -> ValidationResult<()> {
    if qty <= 0 {
        return Err(ValidationError::must_be_positive("cantidad"));
    }

    if qty > MAX_ORDER_QUANTITY {
        return Err(ValidationError::OutOfRange {
            field: "cantidad".to_string(),
            min: 1,
            max: MAX_ORDER_QUANTITY,
        });
    }

    Ok(())
}

/// Validates a cost amount. Zero is allowed (free samples, prepaid freight).
///
/// Amounts above MAX_COST are rejected so that blending them into a
/// product's average cost stays within `Decimal` range.
pub fn validate_cost(field: &str, amount: Decimal) -> ValidationResult<()> {
    if amount.is_sign_negative() && !amount.is_zero() {
        return Err(ValidationError::negative(field));
    }

    if amount > Decimal::from(MAX_COST) {
        return Err(ValidationError::OutOfRange {
            field: field.to_string(),
            min: 0,
            max: MAX_COST,
        });
    }

    Ok(())
}

// =============================================================================
// String Validators
// =============================================================================

/// Validates and normalizes an optional tracking number.
///
/// ## Rules
/// - Blank (or absent) means "no tracking number"
/// - At most MAX_TRACKING_NUMBER_LEN characters
/// - Letters, digits and hyphens only
///
/// ## Returns
/// The trimmed, uppercased tracking number, or `None`.
pub fn validate_tracking_number(raw: Option<&str>) -> ValidationResult<Option<String>> {
    let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
        return Ok(None);
    };

    if raw.chars().count() > MAX_TRACKING_NUMBER_LEN {
        return Err(ValidationError::TooLong {
            field: "n_rastreo".to_string(),
            max: MAX_TRACKING_NUMBER_LEN,
        });
    }

    if !raw.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
        return Err(ValidationError::InvalidFormat {
            field: "n_rastreo".to_string(),
            reason: "must contain only letters, numbers and hyphens".to_string(),
        });
    }

    Ok(Some(raw.to_ascii_uppercase()))
}

/// Trims optional free text; blank becomes `None`.
pub fn clean_text(raw: Option<&str>) -> Option<String> {
    raw.map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

// =============================================================================
// Wire Coercion
// =============================================================================

/// Reads an integer from a loosely-typed document field.
///
/// Absent, null, boolean, non-numeric strings and non-finite numbers all
/// read as 0. Fractional values are truncated toward zero.
pub fn coerce_int(value: Option<&Value>) -> i64 {
    match value {
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f.trunc() as i64))
            .unwrap_or(0),
        Some(Value::String(s)) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| Decimal::from_str(s).ok().and_then(|d| d.trunc().to_i64()))
                .unwrap_or(0)
        }
        _ => 0,
    }
}

/// Reads a decimal from a loosely-typed document field (absent or
/// non-numeric reads as 0).
pub fn coerce_decimal(value: Option<&Value>) -> Decimal {
    match value {
        Some(Value::Number(n)) => n
            .as_i64()
            .map(Decimal::from)
            .or_else(|| n.as_f64().and_then(Decimal::from_f64))
            .unwrap_or(Decimal::ZERO),
        Some(Value::String(s)) => Decimal::from_str(s.trim()).unwrap_or(Decimal::ZERO),
        _ => Decimal::ZERO,
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
