/// Locked-in profit for a completed cycle, in quote currency.
///
/// At settlement one side of a binary market pays $1 per share, so holding
/// both sides for a combined per-share cost below $1 locks the difference.
pub fn cycle_profit(leg1_avg_cost: f64, leg2_price: f64, shares: f64) -> f64 {
    (1.0 - leg1_avg_cost - leg2_price) * shares
}

/// Combined per-share cost of both legs, compared against the sum target.
pub fn cycle_sum(leg1_avg_cost: f64, leg2_price: f64) -> f64 {
    leg1_avg_cost + leg2_price
}

/// Tolerant equality for derived monetary quantities.
pub fn approx_eq(a: f64, b: f64) -> bool {
    (a - b).abs() <= 1e-9
}
