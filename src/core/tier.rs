//! Tier assigner (C8): maps a scored pair to a confidence tier.

use crate::core::bond::Tier;
use crate::core::config::Config;
use crate::core::scorer::ScoreResult;

/// Assigns a tier from a scored pair, per §4.8. Returns `None` when the pair
/// fails to clear tier 2 (i.e. what the spec calls tier 3, which is never
/// persisted).
pub fn assign_tier(result: &ScoreResult, config: &Config) -> Option<Tier> {
    if result.is_vetoed() {
        return None;
    }

    let tier1_floors = &config.tier1_min_f;
    if result.similarity >= config.tier1_min_similarity
        && result.p_match >= config.tier1_p_match_threshold
        && result.f_text >= tier1_floors.text
        && result.f_entity >= tier1_floors.entity
        && result.f_outcome >= tier1_floors.outcome
        && result.f_time >= tier1_floors.time
        && result.f_resolution >= tier1_floors.resolution
    {
        return Some(Tier::One);
    }

    let tier2_floors = &config.tier2_min_f;
    if result.similarity >= config.tier2_min_similarity
        && result.p_match >= config.tier2_p_match_threshold
        && result.f_text >= tier2_floors.text
        && result.f_entity >= tier2_floors.entity
        && result.f_outcome >= tier2_floors.outcome
        && result.f_time >= tier2_floors.time
    {
        return Some(Tier::Two);
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strong_result() -> ScoreResult {
        ScoreResult {
            f_text: 0.95,
            f_entity: 0.85,
            f_time: 0.99,
            f_outcome: 1.0,
            f_resolution: 1.0,
            time_delta_days: 0.0,
            hard_violation: None,
            similarity: 0.95,
            p_match: 0.98,
        }
    }

    #[test]
    fn strong_pair_is_tier_one() {
        let config = Config::from_env_for_tests();
        assert_eq!(assign_tier(&strong_result(), &config), Some(crate::core::bond::Tier::One));
    }

    #[test]
    fn vetoed_pair_has_no_tier() {
        let config = Config::from_env_for_tests();
        let mut result = strong_result();
        result.hard_violation = Some("text_floor");
        assert_eq!(assign_tier(&result, &config), None);
    }

    #[test]
    fn weak_pair_falls_to_no_tier() {
        let config = Config::from_env_for_tests();
        let mut result = strong_result();
        result.similarity = 0.5;
        result.p_match = 0.5;
        assert_eq!(assign_tier(&result, &config), None);
    }

    #[test]
    fn lowering_p_match_cannot_improve_tier() {
        let config = Config::from_env_for_tests();
        let mut weak = strong_result();
        weak.p_match = 0.80;
        assert_eq!(assign_tier(&weak, &config), Some(crate::core::bond::Tier::Two));
        assert_eq!(assign_tier(&strong_result(), &config), Some(crate::core::bond::Tier::One));
    }
}
