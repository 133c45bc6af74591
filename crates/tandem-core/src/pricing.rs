//! Money arithmetic for the pricing workflow.
//!
//! Amounts are `f64` dollars. Rounding is half-up (away from zero) to cents,
//! applied to the binary value, so `0.125` rounds to `0.13`.

use crate::order::Pricing;

/// Round a dollar amount to 2 decimal places, half away from zero.
pub fn round_cents(amount: f64) -> f64 {
    (amount * 100.0).round() / 100.0
}

/// Sum of line prices, in cart order.
pub fn subtotal<I>(prices: I) -> f64
where
    I: IntoIterator<Item = f64>,
{
    prices.into_iter().sum()
}

/// Tax owed on a subtotal at the given rate, rounded to cents.
pub fn tax_amount(subtotal: f64, rate: f64) -> f64 {
    round_cents(subtotal * rate)
}

/// Combine the pricing components into a final record.
pub fn finalize(subtotal: f64, shipping_cost: f64, tax_amount: f64) -> Pricing {
    Pricing {
        subtotal: round_cents(subtotal),
        shipping_cost,
        tax_amount,
        total_cost: round_cents(subtotal + shipping_cost + tax_amount),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_half_up() {
        assert_eq!(round_cents(0.125), 0.13);
        assert_eq!(round_cents(0.375), 0.38);
        assert_eq!(round_cents(22.49925), 22.5);
        assert_eq!(round_cents(1.0), 1.0);
    }

    #[test]
    fn test_subtotal_is_sum_of_lines() {
        let prices = [299.99, 19.99, 12.99];
        let expected = 299.99 + 19.99 + 12.99;
        assert_eq!(subtotal(prices), expected);
        assert_eq!(subtotal(Vec::<f64>::new()), 0.0);
    }

    #[test]
    fn test_headphones_in_california() {
        let sub = subtotal([299.99]);
        let tax = tax_amount(sub, 0.075);
        assert_eq!(tax, 22.5);
        let pricing = finalize(sub, 0.0, tax);
        assert_eq!(pricing.total_cost, 322.49);
        assert_eq!(pricing.subtotal, 299.99);
    }

    #[test]
    fn test_default_rate_tax() {
        assert_eq!(tax_amount(32.98, 0.05), 1.65);
    }
}
