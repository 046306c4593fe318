//! Bond registry upsert semantics (C9) and bond-builder worker (C10): drives
//! C6 -> C7 -> C8 for each probe contract and writes accepted pairs into C13.
//!
//! Candidate scoring for a single probe is parallelized with rayon; any panic
//! inside a worker task causes that probe's batch to fall back to sequential
//! scoring rather than losing the whole cycle (§4.9 — "on any worker failure
//! the pipeline falls back to sequential scoring for the current probe so one
//! bad candidate cannot starve the batch").

use crate::core::bond::{Bond, BondStatus, FeatureBreakdown, Tier};
use crate::core::config::Config;
use crate::core::contract::{Contract, ContractStatus, Platform};
use crate::core::retriever;
use crate::core::scorer::{self, ScoreResult};
use crate::core::store::Store;
use crate::core::tier;
use anyhow::Result;
use chrono::Utc;
use rayon::prelude::*;
use std::panic::{self, AssertUnwindSafe};
use tracing::{debug, info, warn};

#[derive(Debug, Default, Clone, Copy)]
pub struct CycleStats {
    pub probes_scanned: usize,
    pub probes_skipped_no_embedding: usize,
    pub candidates_scored: usize,
    pub bonds_created: usize,
    pub bonds_upgraded: usize,
    pub bonds_rejected: usize,
}

/// Runs one bond-building cycle over `probes` (typically every active,
/// embedded EX-A contract, per the glossary's "probe is typically iterated
/// over EX-A"), writing accepted pairs into `store`.
pub fn run_cycle(store: &Store, probes: &[Contract], config: &Config) -> CycleStats {
    let mut stats = CycleStats::default();

    for probe in probes {
        if probe.embedding.is_none() || probe.status != ContractStatus::Active {
            stats.probes_skipped_no_embedding += 1;
            continue;
        }
        stats.probes_scanned += 1;

        match process_probe(store, probe, config) {
            Ok(probe_stats) => {
                stats.candidates_scored += probe_stats.candidates_scored;
                stats.bonds_created += probe_stats.bonds_created;
                stats.bonds_upgraded += probe_stats.bonds_upgraded;
                stats.bonds_rejected += probe_stats.bonds_rejected;
            }
            Err(err) => {
                warn!(probe_id = %probe.id, %err, "bond-builder: probe failed, skipping");
            }
        }
    }

    info!(
        probes_scanned = stats.probes_scanned,
        candidates_scored = stats.candidates_scored,
        bonds_created = stats.bonds_created,
        bonds_upgraded = stats.bonds_upgraded,
        "bond-builder cycle complete"
    );
    stats
}

#[derive(Default)]
struct ProbeStats {
    candidates_scored: usize,
    bonds_created: usize,
    bonds_upgraded: usize,
    bonds_rejected: usize,
}

fn process_probe(store: &Store, probe: &Contract, config: &Config) -> Result<ProbeStats> {
    let candidates = retriever::top_candidates(store, probe, config.candidate_limit)?;
    let mut stats = ProbeStats::default();
    stats.candidates_scored = candidates.len();
    if candidates.is_empty() {
        return Ok(stats);
    }

    let scored = score_candidates(probe, &candidates, config);

    // Writes for this probe's bonds are performed here, after all candidates
    // have scored, so they are serialized relative to every other write this
    // probe produces (the "per-probe lock" of §5's ordering guarantee).
    for (candidate, result) in candidates.iter().zip(scored.iter()) {
        if result.is_vetoed() {
            log_rejection(probe, candidate, result, "hard_constraint_violation");
            stats.bonds_rejected += 1;
            continue;
        }

        match tier::assign_tier(result, config) {
            Some(assigned_tier) => {
                match upsert_bond(store, probe, candidate, result, assigned_tier)? {
                    UpsertOutcome::Created => stats.bonds_created += 1,
                    UpsertOutcome::Upgraded => stats.bonds_upgraded += 1,
                    UpsertOutcome::NoChange => {}
                }
            }
            None => {
                log_rejection(probe, candidate, result, "below_tier_2_threshold");
                stats.bonds_rejected += 1;
            }
        }
    }

    Ok(stats)
}

/// Scores every candidate against `probe` in parallel, falling back to a
/// sequential scan if the parallel batch panics.
fn score_candidates(probe: &Contract, candidates: &[Contract], config: &Config) -> Vec<ScoreResult> {
    let parallel_attempt = panic::catch_unwind(AssertUnwindSafe(|| {
        candidates
            .par_iter()
            .map(|candidate| score_pair(probe, candidate, config))
            .collect::<Vec<_>>()
    }));

    match parallel_attempt {
        Ok(results) => results,
        Err(_) => {
            warn!(
                probe_id = %probe.id,
                "bond-builder: parallel scoring panicked, falling back to sequential scoring"
            );
            candidates
                .iter()
                .map(|candidate| score_pair(probe, candidate, config))
                .collect()
        }
    }
}

fn score_pair(probe: &Contract, candidate: &Contract, config: &Config) -> ScoreResult {
    let (a, b) = match probe.platform {
        Platform::ExchangeA => (probe, candidate),
        Platform::ExchangeB => (candidate, probe),
    };
    scorer::score(a, b, config)
}

enum UpsertOutcome {
    Created,
    Upgraded,
    NoChange,
}

/// Upserts a bond for `(probe, candidate)`, per §4.9: a bond is created if
/// none exists, upgraded only if the new tier is strictly better (lower
/// number), and otherwise left untouched — idempotent for repeated
/// observations that would lower tier.
fn upsert_bond(
    store: &Store,
    probe: &Contract,
    candidate: &Contract,
    result: &ScoreResult,
    assigned_tier: Tier,
) -> Result<UpsertOutcome> {
    let (a, b) = match probe.platform {
        Platform::ExchangeA => (probe, candidate),
        Platform::ExchangeB => (candidate, probe),
    };
    let pair_id = crate::core::bond::pair_id(a.platform, &a.id, b.platform, &b.id);

    let existing = store.get_bond(&pair_id)?;
    if let Some(existing_bond) = &existing {
        if assigned_tier >= existing_bond.tier {
            return Ok(UpsertOutcome::NoChange);
        }
    }

    let now = Utc::now();
    let bond = Bond {
        pair_id: pair_id.clone(),
        contract_a_id: a.id.clone(),
        contract_b_id: b.id.clone(),
        tier: assigned_tier,
        p_match: result.p_match,
        similarity: result.similarity,
        outcome_mapping: scorer::outcome_mapping(a, b),
        feature_breakdown: FeatureBreakdown {
            f_text: result.f_text,
            f_entity: result.f_entity,
            f_time: result.f_time,
            f_outcome: result.f_outcome,
            f_resolution: result.f_resolution,
            time_delta_days: result.time_delta_days,
        },
        status: BondStatus::Active,
        created_at: existing.as_ref().map(|b| b.created_at).unwrap_or(now),
        last_validated: now,
    };

    store.upsert_bond(&bond)?;

    if existing.is_some() {
        info!(
            pair_id = %pair_id, tier = ?assigned_tier, p_match = result.p_match,
            "bond upgraded"
        );
        Ok(UpsertOutcome::Upgraded)
    } else {
        info!(
            pair_id = %pair_id, tier = ?assigned_tier, p_match = result.p_match,
            "bond created"
        );
        Ok(UpsertOutcome::Created)
    }
}

/// Retires any active bond referencing a contract that has left `active`
/// status, per §3's bond lifecycle ("retired by C10 when either referenced
/// contract leaves active").
pub fn retire_bonds_for_inactive_contracts(store: &Store) -> Result<usize> {
    let active_bonds = store.list_bonds_by_status(BondStatus::Active)?;
    let mut retired = 0;
    for bond in active_bonds {
        let a = store.get_contract(Platform::ExchangeA, &bond.contract_a_id)?;
        let b = store.get_contract(Platform::ExchangeB, &bond.contract_b_id)?;
        let a_inactive = a.map(|c| c.status != ContractStatus::Active).unwrap_or(true);
        let b_inactive = b.map(|c| c.status != ContractStatus::Active).unwrap_or(true);
        if a_inactive || b_inactive {
            store.retire_bond(&bond.pair_id)?;
            retired += 1;
        }
    }
    if retired > 0 {
        debug!(retired, "retired bonds referencing inactive contracts");
    }
    Ok(retired)
}

/// Tier-3 (rejected) candidates are never persisted but are logged with the
/// full feature breakdown and rejection reason, per §4.9, so thresholds can
/// be re-tuned offline from the structured log.
fn log_rejection(probe: &Contract, candidate: &Contract, result: &ScoreResult, reason_kind: &str) {
    debug!(
        probe_id = %probe.id,
        candidate_id = %candidate.id,
        reason_kind,
        veto = result.hard_violation.unwrap_or("none"),
        f_text = result.f_text,
        f_entity = result.f_entity,
        f_time = result.f_time,
        f_outcome = result.f_outcome,
        f_resolution = result.f_resolution,
        similarity = result.similarity,
        p_match = result.p_match,
        "candidate rejected"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::contract::{EntitySets, Granularity, OutcomePrice, OutcomeSchema, Polarity, TimeWindow};
    use std::collections::HashSet;

    fn temp_store(name: &str) -> Store {
        let mut path = std::env::temp_dir();
        path.push(format!("bonding_pipeline_test_{name}_{}.db", std::process::id()));
        Store::open(&path.to_string_lossy()).unwrap()
    }

    fn contract(platform: Platform, id: &str, title: &str) -> Contract {
        let now = Utc::now();
        Contract {
            platform,
            id: id.to_string(),
            condition_id: None,
            token_ids: vec![],
            title: title.to_string(),
            description: String::new(),
            cleaned_title: title.to_lowercase(),
            cleaned_description: String::new(),
            category: "crypto".to_string(),
            event_type: "price_target".to_string(),
            geo_scope: "US".to_string(),
            resolution_source: Some("coingecko".to_string()),
            sport_subtype: None,
            is_parlay: false,
            entities: EntitySets {
                tickers: HashSet::from(["BTC".to_string()]),
                ..Default::default()
            },
            outcome_schema: OutcomeSchema::YesNo {
                polarity: Polarity::Positive,
            },
            outcome_prices: vec![OutcomePrice {
                mid: Some(0.5),
                bid: Some(0.49),
                ask: Some(0.51),
            }],
            time_window: TimeWindow {
                resolution: Some(now),
                observation_start: None,
                observation_end: None,
                granularity: Granularity::Year,
            },
            embedding: Some(crate::core::embedding::embed(&title.to_lowercase(), 64)),
            volume: 1000.0,
            liquidity: 5000.0,
            fee_hint: None,
            status: ContractStatus::Active,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn bonds_a_matching_pair_at_tier_one() {
        let store = temp_store("bond_tier1");
        let config = Config::from_env_for_tests();
        let probe = contract(Platform::ExchangeA, "EXA-1", "bitcoin reaches one hundred thousand dollars");
        let candidate = contract(Platform::ExchangeB, "EXB-1", "bitcoin reaches one hundred thousand dollars");
        store.upsert_contract(&probe).unwrap();
        store.upsert_contract(&candidate).unwrap();

        let stats = run_cycle(&store, &[probe], &config);
        assert_eq!(stats.bonds_created, 1);

        let active = store.list_bonds_by_status(BondStatus::Active).unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].tier, Tier::One);
    }

    #[test]
    fn upsert_does_not_downgrade_an_existing_bond() {
        let store = temp_store("no_downgrade");
        let config = Config::from_env_for_tests();
        let probe = contract(Platform::ExchangeA, "EXA-1", "bitcoin reaches one hundred thousand dollars");
        let candidate = contract(Platform::ExchangeB, "EXB-1", "bitcoin reaches one hundred thousand dollars");

        let strong_result = scorer::score(&probe, &candidate, &config);
        upsert_bond(&store, &probe, &candidate, &strong_result, Tier::One).unwrap();

        let mut weak_result = strong_result.clone();
        weak_result.similarity = 0.5;
        weak_result.p_match = 0.5;
        let outcome = upsert_bond(&store, &probe, &candidate, &weak_result, Tier::Two).unwrap();
        assert!(matches!(outcome, UpsertOutcome::NoChange));

        let stored = store
            .get_bond(&crate::core::bond::pair_id(
                Platform::ExchangeA,
                "EXA-1",
                Platform::ExchangeB,
                "EXB-1",
            ))
            .unwrap()
            .unwrap();
        assert_eq!(stored.tier, Tier::One);
    }

    #[test]
    fn retires_bonds_referencing_closed_contracts() {
        let store = temp_store("retire");
        let config = Config::from_env_for_tests();
        let probe = contract(Platform::ExchangeA, "EXA-1", "bitcoin reaches one hundred thousand dollars");
        let mut candidate = contract(Platform::ExchangeB, "EXB-1", "bitcoin reaches one hundred thousand dollars");
        store.upsert_contract(&probe).unwrap();
        store.upsert_contract(&candidate).unwrap();

        let result = scorer::score(&probe, &candidate, &config);
        upsert_bond(&store, &probe, &candidate, &result, Tier::One).unwrap();

        candidate.status = ContractStatus::Closed;
        store.upsert_contract(&candidate).unwrap();

        let retired = retire_bonds_for_inactive_contracts(&store).unwrap();
        assert_eq!(retired, 1);
        assert!(store.list_bonds_by_status(BondStatus::Active).unwrap().is_empty());
    }
}
