//! # Costing Module
//!
//! Weighted-average cost calculator and the unit-cost helpers used by
//! receiving events.
//!
//! ## Why Fixed-Point?
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  THE DRIFT PROBLEM                                                      │
//! │                                                                         │
//! │  The average cost is re-blended on every receiving event, forever.     │
//! │  With binary floating point each blend adds representation noise:      │
//! │    0.1 + 0.2 = 0.30000000000000004                                      │
//! │                                                                         │
//! │  OUR SOLUTION: rust_decimal + a fixed cost scale                        │
//! │    Every blend is exact base-10 arithmetic, then rounded to            │
//! │    COST_SCALE places (banker's rounding). Small increments cannot      │
//! │    accumulate noise beyond half a unit in the last place.              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use rust_decimal::{Decimal, RoundingStrategy};

/// Decimal places kept on unit costs and averages.
pub const COST_SCALE: u32 = 6;

/// Rounds a unit cost to [`COST_SCALE`] places, half to even.
#[inline]
pub fn round_cost(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(COST_SCALE, RoundingStrategy::MidpointNearestEven)
}

/// Blends an incoming lot into an existing average cost.
///
/// ## Rules
/// - `incoming_qty <= 0`: nothing arrives, `old_avg_cost` is returned as is
/// - `old_stock <= 0`: no prior basis, the lot's unit cost becomes the average
/// - otherwise the quantity-weighted mean of both lots
///
/// `None` when the stock value no longer fits in a `Decimal`.
///
/// ## Example
/// ```rust
/// use almacen_core::costing::new_average;
/// use rust_decimal::Decimal;
///
/// assert_eq!(new_average(0, Decimal::ZERO, 10, Decimal::from(5)), Some(Decimal::from(5)));
/// assert_eq!(new_average(5, Decimal::from(3), 0, Decimal::from(10)), Some(Decimal::from(3)));
/// assert_eq!(new_average(i64::MAX, Decimal::MAX, 1, Decimal::ONE), None);
/// ```
///
/// ## User Workflow
/// ```text
/// On hand: 10 units @ 4.00
/// Receive:  5 units @ 6.00
///      │
///      ▼
/// new_average(10, 4, 5, 6) ← THIS FUNCTION
///      │
///      ▼
/// (10×4 + 5×6) / 15 = 70/15 = 4.666667
/// ```
pub fn new_average(
    old_stock: i64,
    old_avg_cost: Decimal,
    incoming_qty: i64,
    incoming_unit_cost: Decimal,
) -> Option<Decimal> {
    if incoming_qty <= 0 {
        return Some(old_avg_cost);
    }

    if old_stock <= 0 {
        return Some(round_cost(incoming_unit_cost));
    }

    let old_value = Decimal::from(old_stock).checked_mul(old_avg_cost)?;
    let incoming_value = Decimal::from(incoming_qty).checked_mul(incoming_unit_cost)?;
    let total_qty = Decimal::from(old_stock.checked_add(incoming_qty)?);

    old_value
        .checked_add(incoming_value)?
        .checked_div(total_qty)
        .map(round_cost)
}

/// Unit cost of an order line: `total / qty` (0 when `qty <= 0`).
///
/// Always derived from the order's totals, never from earlier receptions.
pub fn unit_cost(total: Decimal, qty: i64) -> Decimal {
    if qty <= 0 {
        return Decimal::ZERO;
    }
    round_cost(total / Decimal::from(qty))
}

/// Base unit cost plus this event's shipping spread over this event's units.
///
/// Two partial receptions of the same order can therefore carry different
/// effective unit costs when their shipping differs. `None` on overflow.
pub fn effective_unit_cost(
    base_unit_cost: Decimal,
    shipping: Decimal,
    received_qty: i64,
) -> Option<Decimal> {
    if received_qty <= 0 {
        return Some(base_unit_cost);
    }
    let per_unit = shipping.checked_div(Decimal::from(received_qty))?;
    base_unit_cost.checked_add(per_unit).map(round_cost)
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn test_bootstrap_from_empty_stock() {
        assert_eq!(new_average(0, Decimal::ZERO, 10, dec("5")), Some(dec("5")));
        // Negative stock (oversold) has no basis either
        assert_eq!(new_average(-2, dec("9"), 3, dec("5")), Some(dec("5")));
    }

    #[test]
    fn test_blend() {
        assert_eq!(new_average(10, dec("4"), 5, dec("6")), Some(dec("4.666667")));
    }

    #[test]
    fn test_zero_quantity_is_noop() {
        assert_eq!(new_average(5, dec("3"), 0, dec("10")), Some(dec("3")));
        assert_eq!(new_average(5, dec("3"), -4, dec("10")), Some(dec("3")));
    }

    #[test]
    fn test_unit_cost() {
        assert_eq!(unit_cost(dec("100"), 8), dec("12.5"));
        assert_eq!(unit_cost(dec("10"), 3), dec("3.333333"));
        assert_eq!(unit_cost(dec("10"), 0), Decimal::ZERO);
    }

    #[test]
    fn test_effective_unit_cost_prorates_event_shipping() {
        // 20 per unit, 6 of shipping over 3 units => +2
        assert_eq!(effective_unit_cost(dec("20"), dec("6"), 3), Some(dec("22")));
        assert_eq!(effective_unit_cost(dec("20"), Decimal::ZERO, 2), Some(dec("20")));
    }

    #[test]
    fn test_overflow_is_reported_not_panicked() {
        assert_eq!(new_average(i64::MAX, Decimal::MAX, 1, Decimal::ONE), None);
        assert_eq!(new_average(10, Decimal::MAX, 10, Decimal::MAX), None);
        assert_eq!(effective_unit_cost(Decimal::MAX, Decimal::ONE, 1), None);
        // Division by a positive count cannot overflow
        assert_eq!(unit_cost(Decimal::MAX, 1), round_cost(Decimal::MAX));
    }

    #[test]
    fn test_many_small_increments_do_not_drift() {
        // 1000 receptions of 1 unit at the same cost must leave the average untouched
        let mut stock = 1;
        let mut avg = dec("7.25");
        for _ in 0..1000 {
            avg = new_average(stock, avg, 1, dec("7.25")).unwrap();
            stock += 1;
        }
        assert_eq!(avg, dec("7.25"));
    }
}
