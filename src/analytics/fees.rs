use crate::types::Recommendation;

/// FVR above which a pool is attractive.
pub const ATTRACTIVE_FVR: f64 = 1.0;
/// FVR above which a pool is fair.
pub const FAIR_FVR: f64 = 0.6;

/// `fees24h / avgTVL * 365`. Zero when TVL is missing or zero, or fees are unknown.
pub fn pool_fee_apr(fees_24h: Option<f64>, avg_tvl: Option<f64>) -> f64 {
    match (fees_24h, avg_tvl) {
        (Some(fees), Some(tvl)) if tvl > 0.0 && fees.is_finite() => fees / tvl * 365.0,
        _ => 0.0,
    }
}

/// Pool APR scaled by the share of time in range and of pool liquidity.
///
/// Unknown multipliers default to 1.0 (screening assumes full exposure).
pub fn position_fee_apr(pool_fee_apr: f64, time_in_range: Option<f64>, liquidity_share: Option<f64>) -> f64 {
    pool_fee_apr * time_in_range.unwrap_or(1.0) * liquidity_share.unwrap_or(1.0)
}

/// Fee-to-Volatility Ratio. Zero when volatility is zero or unknown.
pub fn fee_to_volatility_ratio(fee_apr: f64, volatility: Option<f64>) -> f64 {
    match volatility {
        Some(vol) if vol > 0.0 => fee_apr / vol,
        _ => 0.0,
    }
}

pub fn classify(fvr: Option<f64>) -> Recommendation {
    match fvr {
        None => Recommendation::InsufficientData,
        Some(f) if f.is_nan() => Recommendation::InsufficientData,
        Some(f) if f > ATTRACTIVE_FVR => Recommendation::Attractive,
        Some(f) if f > FAIR_FVR => Recommendation::Fair,
        Some(_) => Recommendation::Overpriced,
    }
}

/// Discrete IL risk score (1 = lowest, 10 = highest) derived from FVR.
///
/// High FVR compresses into 1..=3, the fair band maps onto 4..=6 and
/// anything at or below 0.6 lands in 8..=10.
pub fn il_risk_score(fvr: Option<f64>) -> Option<u8> {
    let fvr = fvr.filter(|f| f.is_finite())?;
    let raw = if fvr > ATTRACTIVE_FVR {
        (1.0 + 2.0 / fvr).round().min(3.0)
    } else if fvr > FAIR_FVR {
        (4.0 + 6.0 * (1.0 - fvr)).round()
    } else {
        (8.0 + 5.0 * (FAIR_FVR - fvr)).round().max(8.0)
    };
    Some(raw.clamp(1.0, 10.0) as u8)
}
