/// Default concentration multiplier for the expected IL approximation.
pub const DEFAULT_CONCENTRATION_MULTIPLIER: f64 = 1.5;

/// Expected annual IL rate: `volatility^2 * 0.5 * concentration_multiplier`.
///
/// This is a quadratic proxy, not a path-based simulation. The risk score
/// bands are calibrated against it, so it must stay in this form.
pub fn expected_il_rate(volatility: Option<f64>, concentration_multiplier: f64) -> f64 {
    match volatility {
        Some(vol) if vol.is_finite() && vol > 0.0 => vol * vol * 0.5 * concentration_multiplier,
        _ => 0.0,
    }
}

/// Fee APR a position needs just to offset expected IL.
pub fn breakeven_fee_apr(expected_il_rate: f64) -> f64 {
    expected_il_rate
}

/// Value (in token1 units) of a concentrated position with liquidity `l`
/// over the range `[pa, pb]` at price `p`.
///
/// Below the range the position is all token0, above it all token1.
/// Returns `None` for an empty or non-positive range.
pub fn position_value(l: f64, p: f64, pa: f64, pb: f64) -> Option<f64> {
    if !(l >= 0.0 && p > 0.0 && pa > 0.0 && pb > pa) {
        return None;
    }
    let (sp, spa, spb) = (p.sqrt(), pa.sqrt(), pb.sqrt());

    let value = if p <= pa {
        let amount0 = l * (1.0 / spa - 1.0 / spb);
        amount0 * p
    } else if p >= pb {
        l * (spb - spa)
    } else {
        l * (2.0 * sp - spa - p / spb)
    };
    Some(value)
}
