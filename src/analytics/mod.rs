//! Risk/return signals computed over stored price history.
//!
//! The submodules are pure math; [`AnalyticsEngine`] loads the inputs from the
//! store and writes one [`PoolAnalyticsSnapshot`](crate::types::PoolAnalyticsSnapshot)
//! per pool.

pub mod engine;
pub mod fees;
pub mod impermanent_loss;
pub mod volatility;

pub use engine::{AnalyticsEngine, RecomputeSummary};
