//! Decimal arithmetic helpers for order sizing.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// Round down to lot size (quantity precision).
///
/// `None` when the lot count does not fit in a `Decimal`.
pub fn round_down_to_lot(value: Decimal, lot_size: Decimal) -> Option<Decimal> {
    if lot_size == Decimal::ZERO {
        return Some(value);
    }
    value.checked_div(lot_size)?.floor().checked_mul(lot_size)
}

/// Round up to lot size, `None` on overflow.
pub fn round_up_to_lot(value: Decimal, lot_size: Decimal) -> Option<Decimal> {
    if lot_size == Decimal::ZERO {
        return Some(value);
    }
    value.checked_div(lot_size)?.ceil().checked_mul(lot_size)
}

/// Calculate basis points (1 bp = 0.01%)
pub fn to_basis_points(rate: Decimal) -> Decimal {
    rate * dec!(10000)
}

/// Safe division that returns zero if divisor is zero.
pub fn safe_div(numerator: Decimal, denominator: Decimal) -> Decimal {
    if denominator == Decimal::ZERO {
        Decimal::ZERO
    } else {
        numerator / denominator
    }
}

/// True when `a` and `b` differ by at most `tolerance` relative to the larger one.
///
/// Two zeros are always approximately equal.
pub fn approx_eq(a: Decimal, b: Decimal, tolerance: Decimal) -> bool {
    (a - b).abs() <= tolerance * a.abs().max(b.abs())
}
