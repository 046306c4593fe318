//! Bond post-resolution validator (C14): a slow, independent job that checks
//! recently created bonds against what actually happened once both referenced
//! contracts resolve, and tracks a rolling per-tier accuracy figure.
//!
//! Pure observation — this never mutates a bond's tier, feature breakdown, or
//! any other field. A tier-1 bond that resolved to mismatched outcomes is
//! logged above ordinary warning severity: it means the pipeline was >95%
//! confident in a pair that was in fact wrong, the single most actionable
//! failure signal the system produces.

use crate::core::bond::{Bond, Tier};
use crate::core::client::{ExchangeAClient, ExchangeBClient};
use crate::core::contract::{ContractStatus, Platform};
use crate::core::store::Store;
use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use tracing::{debug, error, info};

#[derive(Debug, Clone, Copy, Default)]
pub struct TierAccuracy {
    pub checked: u64,
    pub matched: u64,
}

impl TierAccuracy {
    pub fn accuracy(&self) -> Option<f64> {
        if self.checked == 0 {
            None
        } else {
            Some(self.matched as f64 / self.checked as f64)
        }
    }
}

/// Accumulates rolling per-tier accuracy across validator runs for the
/// lifetime of the process.
#[derive(Debug, Default)]
pub struct ValidationAccumulator {
    by_tier: HashMap<Tier, TierAccuracy>,
}

impl ValidationAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, tier: Tier, outcomes_matched: bool) {
        let entry = self.by_tier.entry(tier).or_default();
        entry.checked += 1;
        if outcomes_matched {
            entry.matched += 1;
        }
    }

    pub fn accuracy_for(&self, tier: Tier) -> Option<f64> {
        self.by_tier.get(&tier).and_then(|a| a.accuracy())
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ValidationStats {
    pub bonds_examined: usize,
    pub bonds_both_resolved: usize,
    pub mismatches: usize,
}

/// Runs one validation pass over bonds created within
/// `config.bond_validation_lookback_days` of `now`.
pub async fn run_cycle<A, B>(
    store: &Store,
    exchange_a: &A,
    exchange_b: &B,
    lookback_days: i64,
    accumulator: &mut ValidationAccumulator,
) -> Result<ValidationStats>
where
    A: ExchangeAClient,
    B: ExchangeBClient,
{
    let now = Utc::now();
    let since = now - Duration::days(lookback_days);
    let bonds = store.list_bonds_created_since(since)?;

    let mut stats = ValidationStats::default();
    for bond in &bonds {
        stats.bonds_examined += 1;
        match check_bond(store, exchange_a, exchange_b, bond).await {
            Ok(Some(matched)) => {
                stats.bonds_both_resolved += 1;
                accumulator.record(bond.tier, matched);
                if !matched {
                    stats.mismatches += 1;
                    log_mismatch(bond);
                }
            }
            Ok(None) => {}
            Err(err) => {
                debug!(pair_id = %bond.pair_id, %err, "bond validation check failed, skipping");
            }
        }
    }

    for tier in [Tier::One, Tier::Two, Tier::Three] {
        if let Some(accuracy) = accumulator.accuracy_for(tier) {
            info!(?tier, accuracy, "bond validator: rolling accuracy");
        }
    }

    Ok(stats)
}

/// Returns `Some(outcomes_matched)` once both sides of `bond` have resolved,
/// `None` if either side hasn't resolved yet.
async fn check_bond<A, B>(store: &Store, exchange_a: &A, exchange_b: &B, bond: &Bond) -> Result<Option<bool>>
where
    A: ExchangeAClient,
    B: ExchangeBClient,
{
    let stored_a = store.get_contract(Platform::ExchangeA, &bond.contract_a_id)?;
    let stored_b = store.get_contract(Platform::ExchangeB, &bond.contract_b_id)?;

    let resolved_a = match &stored_a {
        Some(c) if c.status == ContractStatus::Resolved => true,
        _ => {
            matches!(
                exchange_a.get_contract(&bond.contract_a_id).await,
                Ok(Some(raw)) if raw.status.eq_ignore_ascii_case("resolved")
                    || raw.status.eq_ignore_ascii_case("settled")
                    || raw.status.eq_ignore_ascii_case("finalized")
            )
        }
    };
    let resolved_b = match &stored_b {
        Some(c) if c.status == ContractStatus::Resolved => true,
        _ => matches!(exchange_b.get_contract(&bond.contract_b_id).await, Ok(Some(raw)) if raw.closed),
    };

    if !resolved_a || !resolved_b {
        return Ok(None);
    }

    let (a, b) = match (stored_a, stored_b) {
        (Some(a), Some(b)) => (a, b),
        _ => return Ok(None),
    };

    let actual_a = dominant_outcome_label(&a.outcome_prices);
    let actual_b = dominant_outcome_label(&b.outcome_prices);
    let (actual_a, actual_b) = match (actual_a, actual_b) {
        (Some(a), Some(b)) => (a, b),
        _ => return Ok(None),
    };

    let expected_b = bond.outcome_mapping.get(&actual_a);
    Ok(Some(expected_b.map(|expected| expected == &actual_b).unwrap_or(false)))
}

/// The resolved outcome label (`"Yes"`/`"No"`) is whichever outcome settled
/// at a price closer to 1.0 than 0.0.
fn dominant_outcome_label(outcome_prices: &[crate::core::contract::OutcomePrice]) -> Option<String> {
    let yes_mid = outcome_prices.first()?.mid?;
    Some(if yes_mid >= 0.5 { "Yes".to_string() } else { "No".to_string() })
}

fn log_mismatch(bond: &Bond) {
    if bond.tier == Tier::One {
        error!(
            pair_id = %bond.pair_id,
            tier = ?bond.tier,
            p_match = bond.p_match,
            "bond validator: tier-1 bond resolved to mismatched outcomes"
        );
    } else {
        tracing::warn!(
            pair_id = %bond.pair_id,
            tier = ?bond.tier,
            p_match = bond.p_match,
            "bond validator: bond resolved to mismatched outcomes"
        );
    }
}

#[allow(dead_code)]
fn is_recent(created_at: DateTime<Utc>, since: DateTime<Utc>) -> bool {
    created_at >= since
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::bond::{BondStatus, FeatureBreakdown};
    use crate::core::client::{ExchangeARawContract, ExchangeBRawContract, OrderBook};
    use crate::core::contract::{EntitySets, Granularity, OutcomePrice, OutcomeSchema, Polarity, TimeWindow};
    use crate::core::error::CoreError;
    use async_trait::async_trait;
    use std::collections::HashMap as StdHashMap;

    struct StubExchangeA;
    #[async_trait]
    impl ExchangeAClient for StubExchangeA {
        async fn list_active_contracts(&self, _cursor: Option<&str>) -> Result<(Vec<ExchangeARawContract>, Option<String>), CoreError> {
            Ok((vec![], None))
        }
        async fn get_contracts_by_ids(&self, _ids: &[String]) -> Result<Vec<ExchangeARawContract>, CoreError> {
            Ok(vec![])
        }
        async fn get_contract(&self, _id: &str) -> Result<Option<ExchangeARawContract>, CoreError> {
            Ok(None)
        }
        async fn get_order_book(&self, _token_id: &str) -> Result<OrderBook, CoreError> {
            Err(CoreError::UpstreamUnavailable("unused".to_string()))
        }
    }

    struct StubExchangeB;
    #[async_trait]
    impl ExchangeBClient for StubExchangeB {
        async fn list_active_contracts(&self, _cursor: Option<&str>) -> Result<(Vec<ExchangeBRawContract>, Option<String>), CoreError> {
            Ok((vec![], None))
        }
        async fn get_contract(&self, _id: &str) -> Result<Option<ExchangeBRawContract>, CoreError> {
            Ok(None)
        }
        async fn get_order_book(&self, _token_id: &str) -> Result<OrderBook, CoreError> {
            Err(CoreError::UpstreamUnavailable("unused".to_string()))
        }
    }

    fn temp_store(name: &str) -> Store {
        let mut path = std::env::temp_dir();
        path.push(format!("bonding_validator_test_{name}_{}.db", std::process::id()));
        Store::open(&path.to_string_lossy()).unwrap()
    }

    fn resolved_contract(platform: Platform, id: &str, yes_mid: f64) -> crate::core::contract::Contract {
        let now = Utc::now();
        crate::core::contract::Contract {
            platform,
            id: id.to_string(),
            condition_id: None,
            token_ids: vec![],
            title: id.to_string(),
            description: String::new(),
            cleaned_title: id.to_lowercase(),
            cleaned_description: String::new(),
            category: "general".to_string(),
            event_type: "general".to_string(),
            geo_scope: "US".to_string(),
            resolution_source: None,
            sport_subtype: None,
            is_parlay: false,
            entities: EntitySets::default(),
            outcome_schema: OutcomeSchema::YesNo {
                polarity: Polarity::Positive,
            },
            outcome_prices: vec![OutcomePrice {
                mid: Some(yes_mid),
                bid: Some(yes_mid),
                ask: Some(yes_mid),
            }],
            time_window: TimeWindow {
                resolution: None,
                observation_start: None,
                observation_end: None,
                granularity: Granularity::Week,
            },
            embedding: None,
            volume: 0.0,
            liquidity: 0.0,
            fee_hint: None,
            status: ContractStatus::Resolved,
            created_at: now,
            updated_at: now,
        }
    }

    fn bond_with_mapping(a_id: &str, b_id: &str, mapping: StdHashMap<String, String>) -> Bond {
        Bond {
            pair_id: format!("{a_id}::{b_id}"),
            contract_a_id: a_id.to_string(),
            contract_b_id: b_id.to_string(),
            tier: Tier::One,
            p_match: 0.97,
            similarity: 0.9,
            outcome_mapping: mapping,
            feature_breakdown: FeatureBreakdown {
                f_text: 0.9,
                f_entity: 0.9,
                f_time: 0.9,
                f_outcome: 0.9,
                f_resolution: 0.9,
                time_delta_days: 0.0,
            },
            status: BondStatus::Active,
            created_at: Utc::now(),
            last_validated: Utc::now(),
        }
    }

    #[tokio::test]
    async fn detects_matching_resolved_outcomes() {
        let store = temp_store("match");
        let a = resolved_contract(Platform::ExchangeA, "a1", 0.99);
        let b = resolved_contract(Platform::ExchangeB, "b1", 0.98);
        store.upsert_contract(&a).unwrap();
        store.upsert_contract(&b).unwrap();

        let mut mapping = StdHashMap::new();
        mapping.insert("Yes".to_string(), "Yes".to_string());
        mapping.insert("No".to_string(), "No".to_string());
        let bond = bond_with_mapping("a1", "b1", mapping);

        let result = check_bond(&store, &StubExchangeA, &StubExchangeB, &bond).await.unwrap();
        assert_eq!(result, Some(true));
    }

    #[tokio::test]
    async fn detects_mismatched_resolved_outcomes() {
        let store = temp_store("mismatch");
        let a = resolved_contract(Platform::ExchangeA, "a1", 0.99);
        let b = resolved_contract(Platform::ExchangeB, "b1", 0.02);
        store.upsert_contract(&a).unwrap();
        store.upsert_contract(&b).unwrap();

        let mut mapping = StdHashMap::new();
        mapping.insert("Yes".to_string(), "Yes".to_string());
        mapping.insert("No".to_string(), "No".to_string());
        let bond = bond_with_mapping("a1", "b1", mapping);

        let result = check_bond(&store, &StubExchangeA, &StubExchangeB, &bond).await.unwrap();
        assert_eq!(result, Some(false));
    }

    #[tokio::test]
    async fn returns_none_when_not_yet_resolved() {
        let store = temp_store("unresolved");
        let mut a = resolved_contract(Platform::ExchangeA, "a1", 0.99);
        a.status = ContractStatus::Active;
        store.upsert_contract(&a).unwrap();
        store.upsert_contract(&resolved_contract(Platform::ExchangeB, "b1", 0.98)).unwrap();

        let bond = bond_with_mapping("a1", "b1", StdHashMap::new());
        let result = check_bond(&store, &StubExchangeA, &StubExchangeB, &bond).await.unwrap();
        assert_eq!(result, None);
    }

    #[test]
    fn accumulator_tracks_accuracy_per_tier() {
        let mut accumulator = ValidationAccumulator::new();
        accumulator.record(Tier::One, true);
        accumulator.record(Tier::One, true);
        accumulator.record(Tier::One, false);
        assert!((accumulator.accuracy_for(Tier::One).unwrap() - (2.0 / 3.0)).abs() < 1e-9);
        assert!(accumulator.accuracy_for(Tier::Two).is_none());
    }
}
