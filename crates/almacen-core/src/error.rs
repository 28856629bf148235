//! # Error Types
//!
//! Domain-specific error types for almacen-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  almacen-core errors (this file)                                       │
//! │  ├── CoreError        - General domain errors                          │
//! │  └── ValidationError  - Rejected caller input (no state change)        │
//! │                                                                         │
//! │  almacen-db errors (separate crate)                                    │
//! │  ├── DbError          - Database operation failures                    │
//! │  └── PurchasingError  - What callers of the service see                │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → PurchasingError → Caller          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

// =============================================================================
// Core Error
// =============================================================================

/// Core business logic errors.
#[derive(Debug, Error)]
pub enum CoreError {
    /// No product with the given external key or id.
    #[error("Product not found: {0}")]
    ProductNotFound(String),

    /// No purchase order with the given id.
    #[error("Purchase order not found: {0}")]
    OrderNotFound(String),

    /// A reconciliation invariant broke.
    ///
    /// ## When This Occurs
    /// Never in normal operation. Reaching it means the stored pools were
    /// already inconsistent or a planner has a bug; the mutation is aborted.
    #[error("Invariant violated: {0}")]
    Invariant(String),

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
///
/// Reported to the caller; the operation makes no partial state change.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Field value is too long.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Numeric value is out of range.
    #[error("{field} must be between {min} and {max}")]
    OutOfRange { field: String, min: i64, max: i64 },

    /// Value must be positive.
    #[error("{field} must be positive")]
    MustBePositive { field: String },

    /// Value must not be negative.
    #[error("{field} must not be negative")]
    Negative { field: String },

    /// Invalid format (e.g., invalid UUID, unknown state literal).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },

    /// Value is not in allowed set.
    #[error("{field} must be one of: {allowed:?}")]
    NotAllowed { field: String, allowed: Vec<String> },

    /// Duplicate value (e.g., duplicate tracking number).
    #[error("{field} '{value}' already exists")]
    Duplicate { field: String, value: String },

    /// Purchase orders can only reference existing products.
    #[error("Unknown product key '{0}'")]
    UnknownProduct(String),

    /// Receiving more than is still pending on the order.
    ///
    /// ## User Workflow
    /// ```text
    /// Order: cantidad=5, recibido=3
    ///      │
    ///      ▼
    /// Receive 3 units
    ///      │
    ///      ▼
    /// OverReceipt { requested: 3, remaining: 2 }
    /// ```
    #[error("Cannot receive {requested} units: only {remaining} remaining")]
    OverReceipt { requested: i64, remaining: i64 },

    /// Shipping cost supplied without a receiving quantity to spread it over.
    #[error("Shipping cost requires a received quantity")]
    ShippingWithoutReceipt,

    /// State change not allowed by the order state machine.
    #[error("Cannot move order from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    /// `cantidad` edited below what has already arrived.
    #[error("cantidad {cantidad} is below the {recibido} units already received")]
    QuantityBelowReceived { cantidad: i64, recibido: i64 },

    /// Receiving or quantity edits against a settled or cancelled order.
    #[error("Order is {state}; no further receiving or quantity changes")]
    OrderClosed { state: String },

    /// A cost computation left the representable range.
    #[error("{field} is too large to compute")]
    CostOverflow { field: String },
}

impl ValidationError {
    /// Shorthand for [`ValidationError::Required`].
    pub fn required(field: impl Into<String>) -> Self {
        ValidationError::Required {
            field: field.into(),
        }
    }

    /// Shorthand for [`ValidationError::MustBePositive`].
    pub fn must_be_positive(field: impl Into<String>) -> Self {
        ValidationError::MustBePositive {
            field: field.into(),
        }
    }

    /// Shorthand for [`ValidationError::Negative`].
    pub fn negative(field: impl Into<String>) -> Self {
        ValidationError::Negative {
            field: field.into(),
        }
    }
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_over_receipt_message() {
        let err = ValidationError::OverReceipt {
            requested: 3,
            remaining: 2,
        };
        assert_eq!(
            err.to_string(),
            "Cannot receive 3 units: only 2 remaining"
        );
    }

    #[test]
    fn test_validation_error_messages() {
        assert_eq!(ValidationError::required("cantidad").to_string(), "cantidad is required");
        assert_eq!(
            ValidationError::InvalidTransition {
                from: "RECIBIDO".to_string(),
                to: "EN_TRANSITO".to_string(),
            }
            .to_string(),
            "Cannot move order from RECIBIDO to EN_TRANSITO"
        );
    }

    #[test]
    fn test_validation_converts_to_core_error() {
        let core_err: CoreError = ValidationError::ShippingWithoutReceipt.into();
        assert!(matches!(
            core_err,
            CoreError::Validation(ValidationError::ShippingWithoutReceipt)
        ));
    }
}
