//! Candidate retriever (C6): top-K cross-exchange candidates by ascending
//! cosine distance.
//!
//! Design note (substitution, recorded in DESIGN.md): no ANN-index crate is
//! available in this deployment's dependency stack. This implements the same
//! contract — top-K by ascending cosine distance, filtered to active embedded
//! contracts, tie-broken by id — as an exact brute-force scan over the
//! opposite exchange's contracts held in the store. The store's query method
//! is the seam where a true ANN index would later be substituted.

use crate::core::contract::{Contract, Platform};
use crate::core::embedding::cosine_similarity;
use crate::core::store::Store;
use anyhow::Result;

/// Returns up to `limit` contracts on `probe.platform.other()`, ordered by
/// ascending cosine distance (i.e. descending similarity) to `probe`'s
/// embedding, ties broken by ascending contract id.
pub fn top_candidates(store: &Store, probe: &Contract, limit: usize) -> Result<Vec<Contract>> {
    let probe_embedding = match &probe.embedding {
        Some(v) => v,
        None => return Ok(Vec::new()),
    };

    let opposite_platform = probe.platform.other();
    let mut pool = store.list_active_embedded(opposite_platform)?;

    let mut scored: Vec<(f64, Contract)> = pool
        .drain(..)
        .filter_map(|candidate| {
            let candidate_embedding = candidate.embedding.as_ref()?;
            let similarity = cosine_similarity(probe_embedding, candidate_embedding);
            Some((similarity, candidate))
        })
        .collect();

    scored.sort_by(|(sim_a, a), (sim_b, b)| {
        sim_b
            .partial_cmp(sim_a)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });

    Ok(scored.into_iter().take(limit).map(|(_, c)| c).collect())
}
