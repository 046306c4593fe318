//! Arbitrage monitor (C12): scans active bonds for cross-exchange and
//! intra-exchange opportunities, ranks them by estimated profit, and hands a
//! priority list back to C11 via [`crate::core::priority`].
//!
//! The monitor owns its opportunity map exclusively — it is the only writer,
//! and the only reader during a scan (§5, "the arbitrage-monitor map is owned
//! by a single logical owner and mutated only by C12's scan").

use crate::core::bond::{Bond, BondStatus, Tier};
use crate::core::config::Config;
use crate::core::contract::{Contract, Platform};
use crate::core::priority::{PriorityHandoff, PriorityHint};
use crate::core::store::Store;
use anyhow::Result;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tracing::debug;

const SYNTHETIC_SPREAD: f64 = 0.005;
const LIQUIDITY_FRACTION: f64 = 0.5 * 0.1;
const PRIORITY_CAP_PER_SIDE: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Buy on exchange A, sell on exchange B.
    BuyASellB,
    /// Buy on exchange B, sell on exchange A.
    BuyBSellA,
}

#[derive(Debug, Clone)]
pub struct CrossOpportunity {
    pub pair_id: String,
    pub tier: Tier,
    pub direction: Direction,
    pub edge: f64,
    pub estimated_profit_usd: f64,
    pub available_liquidity: f64,
    pub recommended_size: f64,
    pub first_detected: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    pub observation_count: u64,
}

#[derive(Debug, Clone)]
pub struct IntraOpportunity {
    pub platform: Platform,
    pub contract_id: String,
    pub gap: f64,
    pub profit_per_unit: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PriceRejection {
    Stale,
    Missing,
}

/// Owns the cross-opportunity map across scans; intra-exchange opportunities
/// are transient and recomputed fresh each cycle (§4.11).
pub struct ArbitrageMonitor {
    opportunities: HashMap<String, CrossOpportunity>,
}

impl ArbitrageMonitor {
    pub fn new() -> Self {
        Self {
            opportunities: HashMap::new(),
        }
    }

    pub fn opportunities(&self) -> Vec<&CrossOpportunity> {
        self.opportunities.values().collect()
    }

    /// Runs one scan cycle: evaluates every active bond (optionally filtered
    /// by `tier_filter`) for a cross-exchange edge and every bonded contract
    /// for an intra-exchange gap, updates the tracked map, evicts stale
    /// entries, caps its size, and publishes a priority hint to `handoff`.
    pub fn scan(
        &mut self,
        store: &Store,
        config: &Config,
        tier_filter: Option<Tier>,
        min_profit: Option<f64>,
        handoff: &PriorityHandoff,
    ) -> Result<Vec<IntraOpportunity>> {
        let now = Utc::now();
        let min_profit = min_profit.unwrap_or(config.monitor_min_profit);

        let bonds = store.list_bonds_by_status(BondStatus::Active)?;
        let bonds: Vec<Bond> = bonds
            .into_iter()
            .filter(|b| tier_filter.map(|t| b.tier == t).unwrap_or(true))
            .collect();

        let mut contracts_a = Vec::new();
        let mut contracts_b = Vec::new();

        for bond in &bonds {
            let a = store.get_contract(Platform::ExchangeA, &bond.contract_a_id)?;
            let b = store.get_contract(Platform::ExchangeB, &bond.contract_b_id)?;
            let (a, b) = match (a, b) {
                (Some(a), Some(b)) => (a, b),
                _ => continue,
            };

            contracts_a.push(a.clone());
            contracts_b.push(b.clone());

            match evaluate_cross(bond, &a, &b, config, now) {
                Ok(candidate) if candidate.edge >= min_profit => {
                    self.upsert(candidate, now);
                }
                Ok(_) => {}
                Err(reason) => {
                    debug!(pair_id = %bond.pair_id, ?reason, "arbitrage: opportunity rejected");
                }
            }
        }

        self.evict_stale(config, now);
        self.cap_at(config.monitor_max_opportunities);

        let mut intra = Vec::new();
        for contract in contracts_a.iter().chain(contracts_b.iter()) {
            if let Some(opportunity) = evaluate_intra(contract, now, config.staleness_threshold_sec) {
                intra.push(opportunity);
            }
        }
        intra.sort_by(|a, b| {
            b.profit_per_unit
                .partial_cmp(&a.profit_per_unit)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        self.publish_priority(handoff);

        Ok(intra)
    }

    fn upsert(&mut self, candidate: CrossOpportunity, now: DateTime<Utc>) {
        match self.opportunities.get_mut(&candidate.pair_id) {
            Some(existing) => {
                let first_detected = existing.first_detected;
                let observation_count = existing.observation_count + 1;
                *existing = CrossOpportunity {
                    first_detected,
                    observation_count,
                    last_updated: now,
                    ..candidate
                };
            }
            None => {
                self.opportunities.insert(candidate.pair_id.clone(), candidate);
            }
        }
    }

    fn evict_stale(&mut self, config: &Config, now: DateTime<Utc>) {
        let ttl = chrono::Duration::minutes(config.monitor_stale_ttl_min);
        self.opportunities
            .retain(|_, opportunity| now.signed_duration_since(opportunity.last_updated) <= ttl);
    }

    fn cap_at(&mut self, max_opportunities: usize) {
        if self.opportunities.len() <= max_opportunities {
            return;
        }
        let mut ranked: Vec<(String, f64)> = self
            .opportunities
            .iter()
            .map(|(id, o)| (id.clone(), o.estimated_profit_usd))
            .collect();
        ranked.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
        let overflow = self.opportunities.len() - max_opportunities;
        for (id, _) in ranked.into_iter().take(overflow) {
            self.opportunities.remove(&id);
        }
    }

    /// Derives the priority hint from the current top opportunities (by
    /// `estimated_profit_usd`) and publishes it, capped to ~50 ids per side.
    fn publish_priority(&self, handoff: &PriorityHandoff) {
        let mut ranked: Vec<&CrossOpportunity> = self.opportunities.values().collect();
        ranked.sort_by(|a, b| {
            b.estimated_profit_usd
                .partial_cmp(&a.estimated_profit_usd)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let mut exchange_a_ids = Vec::new();
        let mut exchange_b_ids = Vec::new();
        for opportunity in ranked {
            if let Some((a_id, b_id)) = opportunity.pair_id.split_once("::") {
                exchange_a_ids.push(a_id.to_string());
                exchange_b_ids.push(b_id.to_string());
            }
        }

        handoff.publish(
            PriorityHint {
                exchange_a_ids,
                exchange_b_ids,
            },
            PRIORITY_CAP_PER_SIDE,
        );
    }

    /// Returns the current opportunities sorted by `estimated_profit_usd`
    /// descending, per §4.11 step 5.
    pub fn ranked_opportunities(&self) -> Vec<&CrossOpportunity> {
        let mut ranked: Vec<&CrossOpportunity> = self.opportunities.values().collect();
        ranked.sort_by(|a, b| {
            b.estimated_profit_usd
                .partial_cmp(&a.estimated_profit_usd)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        ranked
    }
}

impl Default for ArbitrageMonitor {
    fn default() -> Self {
        Self::new()
    }
}

fn is_stale(contract: &Contract, staleness_threshold_sec: i64, now: DateTime<Utc>) -> bool {
    now.signed_duration_since(contract.updated_at) > chrono::Duration::seconds(staleness_threshold_sec)
}

/// Returns `(bid, ask)` for a contract's primary (Yes) outcome, falling back
/// to a synthetic ±0.5% spread around `mid` when only a mid price is stored
/// (§4.11 step 2, §8 scenario 4).
fn bid_ask(contract: &Contract) -> Option<(f64, f64)> {
    let price = contract.outcome_prices.first()?;
    match (price.bid, price.ask) {
        (Some(bid), Some(ask)) => Some((bid, ask)),
        _ => {
            let mid = price.mid?;
            Some((mid * (1.0 - SYNTHETIC_SPREAD), mid * (1.0 + SYNTHETIC_SPREAD)))
        }
    }
}

fn evaluate_cross(
    bond: &Bond,
    a: &Contract,
    b: &Contract,
    config: &Config,
    now: DateTime<Utc>,
) -> Result<CrossOpportunity, PriceRejection> {
    if is_stale(a, config.staleness_threshold_sec, now) || is_stale(b, config.staleness_threshold_sec, now) {
        return Err(PriceRejection::Stale);
    }

    let (bid_a, ask_a) = bid_ask(a).ok_or(PriceRejection::Missing)?;
    let (bid_b, ask_b) = bid_ask(b).ok_or(PriceRejection::Missing)?;

    let edge_buy_a_sell_b =
        bid_b - ask_a - config.fee_rate_a * ask_a - config.fee_rate_b * bid_b - config.gas_hint_per_trade;
    let edge_buy_b_sell_a =
        bid_a - ask_b - config.fee_rate_b * ask_b - config.fee_rate_a * bid_a - config.gas_hint_per_trade;

    let (direction, edge) = if edge_buy_a_sell_b >= edge_buy_b_sell_a {
        (Direction::BuyASellB, edge_buy_a_sell_b)
    } else {
        (Direction::BuyBSellA, edge_buy_b_sell_a)
    };

    // Profit filtering happens at the call site against the caller-supplied
    // `min_profit` override (falling back to `config.monitor_min_profit`),
    // not here — this function always returns the computed edge.

    // The top-of-book depth at the chosen price isn't retained on `Contract`
    // (only the latest bid/ask/mid survive a price refresh); `liquidity` is
    // the stored proxy for depth at the best price on each side.
    let available_liquidity = a.liquidity.min(b.liquidity);
    if available_liquidity < config.min_liquidity_usd {
        return Err(PriceRejection::Missing);
    }
    let recommended_size = (LIQUIDITY_FRACTION * available_liquidity).min(config.max_position_cap_usd);

    Ok(CrossOpportunity {
        pair_id: bond.pair_id.clone(),
        tier: bond.tier,
        direction,
        edge,
        estimated_profit_usd: edge * recommended_size,
        available_liquidity,
        recommended_size,
        first_detected: now,
        last_updated: now,
        observation_count: 1,
    })
}

fn evaluate_intra(contract: &Contract, now: DateTime<Utc>, staleness_threshold_sec: i64) -> Option<IntraOpportunity> {
    if is_stale(contract, staleness_threshold_sec, now) {
        return None;
    }
    let yes = contract.outcome_prices.first()?.mid?;
    let no = contract.outcome_prices.get(1)?.mid?;
    if yes <= 0.0 || no <= 0.0 {
        return None;
    }
    if yes + no >= 1.0 {
        return None;
    }
    let gap = 1.0 - (yes + no);
    Some(IntraOpportunity {
        platform: contract.platform,
        contract_id: contract.id.clone(),
        gap,
        profit_per_unit: gap / (yes + no),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::bond::FeatureBreakdown;
    use crate::core::contract::{ContractStatus, EntitySets, Granularity, OutcomePrice, OutcomeSchema, Polarity, TimeWindow};
    use std::collections::HashMap as StdHashMap;

    fn contract(platform: Platform, id: &str, bid: f64, ask: f64, liquidity: f64, updated_at: DateTime<Utc>) -> Contract {
        Contract {
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
            outcome_prices: vec![
                OutcomePrice {
                    mid: Some((bid + ask) / 2.0),
                    bid: Some(bid),
                    ask: Some(ask),
                },
                OutcomePrice {
                    mid: Some(1.0 - (bid + ask) / 2.0),
                    bid: Some(1.0 - ask),
                    ask: Some(1.0 - bid),
                },
            ],
            time_window: TimeWindow {
                resolution: None,
                observation_start: None,
                observation_end: None,
                granularity: Granularity::Week,
            },
            embedding: None,
            volume: 0.0,
            liquidity,
            fee_hint: None,
            status: ContractStatus::Active,
            created_at: updated_at,
            updated_at,
        }
    }

    fn bond(pair_id: &str, a_id: &str, b_id: &str, tier: Tier) -> Bond {
        Bond {
            pair_id: pair_id.to_string(),
            contract_a_id: a_id.to_string(),
            contract_b_id: b_id.to_string(),
            tier,
            p_match: 0.9,
            similarity: 0.9,
            outcome_mapping: StdHashMap::new(),
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

    #[test]
    fn finds_cross_exchange_edge_above_min_profit() {
        let now = Utc::now();
        let a = contract(Platform::ExchangeA, "a1", 0.30, 0.32, 10_000.0, now);
        let b = contract(Platform::ExchangeB, "b1", 0.55, 0.57, 10_000.0, now);
        let bond = bond("a1::b1", "a1", "b1", Tier::One);
        let config = Config::from_env_for_tests();

        let result = evaluate_cross(&bond, &a, &b, &config, now);
        assert!(result.is_ok());
        let opportunity = result.unwrap();
        assert!(opportunity.edge > 0.0);
    }

    #[test]
    fn rejects_stale_prices() {
        let now = Utc::now();
        let stale_time = now - chrono::Duration::seconds(10_000);
        let a = contract(Platform::ExchangeA, "a1", 0.40, 0.42, 10_000.0, stale_time);
        let b = contract(Platform::ExchangeB, "b1", 0.55, 0.57, 10_000.0, now);
        let bond = bond("a1::b1", "a1", "b1", Tier::One);
        let config = Config::from_env_for_tests();

        let result = evaluate_cross(&bond, &a, &b, &config, now);
        assert_eq!(result.unwrap_err(), PriceRejection::Stale);
    }

    #[test]
    fn intra_exchange_gap_detected_when_yes_plus_no_below_one() {
        let now = Utc::now();
        let mut contract = contract(Platform::ExchangeA, "a1", 0.40, 0.42, 10_000.0, now);
        contract.outcome_prices[0].mid = Some(0.40);
        contract.outcome_prices[1].mid = Some(0.50);

        let opportunity = evaluate_intra(&contract, now, 300).unwrap();
        assert!((opportunity.gap - 0.10).abs() < 1e-9);
    }

    #[test]
    fn cap_drops_lowest_profit_opportunities_first() {
        let mut monitor = ArbitrageMonitor::new();
        let now = Utc::now();
        for i in 0..5 {
            monitor.upsert(
                CrossOpportunity {
                    pair_id: format!("pair-{i}"),
                    tier: Tier::One,
                    direction: Direction::BuyASellB,
                    edge: 0.02,
                    estimated_profit_usd: i as f64,
                    available_liquidity: 100.0,
                    recommended_size: 10.0,
                    first_detected: now,
                    last_updated: now,
                    observation_count: 1,
                },
                now,
            );
        }
        monitor.cap_at(3);
        assert_eq!(monitor.opportunities.len(), 3);
        assert!(!monitor.opportunities.contains_key("pair-0"));
        assert!(!monitor.opportunities.contains_key("pair-1"));
        assert!(monitor.opportunities.contains_key("pair-4"));
    }

    #[test]
    fn evicts_opportunities_past_ttl() {
        let mut monitor = ArbitrageMonitor::new();
        let now = Utc::now();
        let stale_time = now - chrono::Duration::minutes(30);
        monitor.upsert(
            CrossOpportunity {
                pair_id: "stale".to_string(),
                tier: Tier::One,
                direction: Direction::BuyASellB,
                edge: 0.02,
                estimated_profit_usd: 10.0,
                available_liquidity: 100.0,
                recommended_size: 10.0,
                first_detected: stale_time,
                last_updated: stale_time,
                observation_count: 1,
            },
            stale_time,
        );
        let config = Config::from_env_for_tests();
        monitor.evict_stale(&config, now);
        assert!(monitor.opportunities.is_empty());
    }
}
