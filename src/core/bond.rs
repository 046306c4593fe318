//! The bond registry's record type (§3) and pair-id derivation.

use crate::core::contract::Platform;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    One = 1,
    Two = 2,
    Three = 3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BondStatus {
    Active,
    Paused,
    Retired,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FeatureBreakdown {
    pub f_text: f64,
    pub f_entity: f64,
    pub f_time: f64,
    pub f_outcome: f64,
    pub f_resolution: f64,
    pub time_delta_days: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bond {
    pub pair_id: String,
    pub contract_a_id: String,
    pub contract_b_id: String,
    pub tier: Tier,
    pub p_match: f64,
    pub similarity: f64,
    pub outcome_mapping: HashMap<String, String>,
    pub feature_breakdown: FeatureBreakdown,
    pub status: BondStatus,
    pub created_at: DateTime<Utc>,
    pub last_validated: DateTime<Utc>,
}

/// Deterministic pair id: exchange-A id first, then exchange-B id, joined by `::`.
///
/// Callers pass the two contract ids along with which platform each belongs to so the
/// id is independent of argument order.
pub fn pair_id(a_platform: Platform, a_id: &str, b_platform: Platform, b_id: &str) -> String {
    debug_assert_ne!(a_platform, b_platform, "a bond must span two exchanges");
    let (exchange_a_id, exchange_b_id) = match a_platform {
        Platform::ExchangeA => (a_id, b_id),
        Platform::ExchangeB => (b_id, a_id),
    };
    format!("{exchange_a_id}::{exchange_b_id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pair_id_is_order_independent() {
        let id1 = pair_id(Platform::ExchangeA, "a1", Platform::ExchangeB, "b1");
        let id2 = pair_id(Platform::ExchangeB, "b1", Platform::ExchangeA, "a1");
        assert_eq!(id1, id2);
        assert_eq!(id1, "a1::b1");
    }
}
