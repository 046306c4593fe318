//! Similarity scorer (C7): five feature calculators, hard-constraint vetoes,
//! the weighted aggregate score, and the calibrated match-probability model.
//!
//! Pure function of its two contract inputs plus configuration — no I/O, no
//! shared state, safe to call from any number of worker threads at once.

use crate::core::config::Config;
use crate::core::contract::{Bracket, Contract, OutcomeSchema, Platform, Polarity};
use crate::core::embedding::cosine_similarity;
use crate::core::text::detect_direction_mismatch;
use std::collections::HashSet;

/// The specific rule name of a triggered hard constraint, for the structured
/// decision log (§1a) and offline threshold tuning.
pub type VetoReason = &'static str;

#[derive(Debug, Clone)]
pub struct ScoreResult {
    pub f_text: f64,
    pub f_entity: f64,
    pub f_time: f64,
    pub f_outcome: f64,
    pub f_resolution: f64,
    pub time_delta_days: f64,
    pub hard_violation: Option<VetoReason>,
    pub similarity: f64,
    pub p_match: f64,
}

impl ScoreResult {
    pub fn is_vetoed(&self) -> bool {
        self.hard_violation.is_some()
    }
}

/// Resolution-source synonym groups: sources in the same group are treated as
/// referring to the same underlying authority under a different name.
const RESOLUTION_SYNONYM_GROUPS: &[&[&str]] = &[
    &["bls", "bureau_of_labor_statistics", "bureau of labor statistics"],
    &["fed", "federal_reserve", "federal reserve"],
    &["ecb", "european_central_bank", "european central bank"],
    &["sec", "securities_and_exchange_commission", "securities and exchange commission"],
    &["coingecko", "coin_gecko", "coin gecko"],
];

fn canonicalize_source(source: &str) -> String {
    source.trim().to_lowercase()
}

fn same_synonym_group(a: &str, b: &str) -> bool {
    RESOLUTION_SYNONYM_GROUPS
        .iter()
        .any(|group| group.contains(&a) && group.contains(&b))
}

fn f_text(a: &Contract, b: &Contract) -> f64 {
    match (&a.embedding, &b.embedding) {
        (Some(va), Some(vb)) => {
            let cos = cosine_similarity(va, vb);
            ((cos + 1.0) / 2.0).clamp(0.0, 1.0)
        }
        _ => 0.0,
    }
}

struct EntityFeature {
    score: f64,
    ticker_exact: bool,
    people_exact: bool,
}

fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.union(b).count();
    if union == 0 {
        1.0
    } else {
        intersection as f64 / union as f64
    }
}

fn f_entity(a: &Contract, b: &Contract) -> EntityFeature {
    let ea = &a.entities;
    let eb = &b.entities;

    if ea.is_empty() && eb.is_empty() {
        return EntityFeature {
            score: 1.0,
            ticker_exact: false,
            people_exact: false,
        };
    }
    if ea.is_empty() != eb.is_empty() {
        return EntityFeature {
            score: 0.0,
            ticker_exact: false,
            people_exact: false,
        };
    }

    let union_a: HashSet<String> = [&ea.tickers, &ea.people, &ea.organizations, &ea.countries, &ea.misc]
        .into_iter()
        .flatten()
        .cloned()
        .collect();
    let union_b: HashSet<String> = [&eb.tickers, &eb.people, &eb.organizations, &eb.countries, &eb.misc]
        .into_iter()
        .flatten()
        .cloned()
        .collect();
    let base = jaccard(&union_a, &union_b);

    let ticker_exact = !ea.tickers.is_empty() && ea.tickers == eb.tickers;
    let ticker_bonus = if ticker_exact {
        1.0
    } else if !ea.tickers.is_disjoint(&eb.tickers) && (!ea.tickers.is_empty() || !eb.tickers.is_empty()) {
        0.5
    } else {
        0.0
    };

    let people_exact = !ea.people.is_empty() && ea.people == eb.people;
    let people_bonus = if people_exact {
        1.0
    } else if !ea.people.is_disjoint(&eb.people) && (!ea.people.is_empty() || !eb.people.is_empty()) {
        0.5
    } else {
        0.0
    };

    let org_bonus = if !ea.organizations.is_disjoint(&eb.organizations)
        && (!ea.organizations.is_empty() || !eb.organizations.is_empty())
    {
        0.5
    } else {
        0.0
    };

    let score = (base + 0.2 * ticker_bonus + 0.15 * people_bonus + 0.1 * org_bonus).min(1.0);

    EntityFeature {
        score,
        ticker_exact,
        people_exact,
    }
}

const TIME_SENTINEL_DAYS: f64 = 999.0;

fn f_time(a: &Contract, b: &Contract) -> (f64, f64) {
    let (Some(res_a), Some(res_b)) = (a.time_window.resolution, b.time_window.resolution) else {
        return (0.0, TIME_SENTINEL_DAYS);
    };

    let delta_days = (res_a - res_b).num_seconds().abs() as f64 / 86_400.0;
    let tau = a
        .time_window
        .granularity
        .tau_days()
        .max(b.time_window.granularity.tau_days());
    let score_decay = (-delta_days / tau).exp();

    let score_window = match (
        a.time_window.observation_start,
        a.time_window.observation_end,
        b.time_window.observation_start,
        b.time_window.observation_end,
    ) {
        (Some(sa), Some(ea), Some(sb), Some(eb)) => {
            let inter_start = sa.max(sb);
            let inter_end = ea.min(eb);
            let intersection = (inter_end - inter_start).num_seconds().max(0) as f64 / 86_400.0;
            let union_start = sa.min(sb);
            let union_end = ea.max(eb);
            let union = (union_end - union_start).num_seconds().max(1) as f64 / 86_400.0;
            intersection / union
        }
        _ => score_decay,
    };

    (0.6 * score_decay + 0.4 * score_window, delta_days)
}

fn brackets_equal(a: &[Bracket], b: &[Bracket]) -> bool {
    a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x.min == y.min && x.max == y.max)
}

fn f_outcome(a: &Contract, b: &Contract) -> f64 {
    match (&a.outcome_schema, &b.outcome_schema) {
        (OutcomeSchema::YesNo { polarity: pa }, OutcomeSchema::YesNo { polarity: pb }) => {
            let mismatch = detect_direction_mismatch(&a.cleaned_title, &b.cleaned_title);
            let polarities_match = pa == pb;
            if polarities_match && !mismatch {
                1.0
            } else if !polarities_match && mismatch {
                1.0
            } else {
                0.0
            }
        }
        (
            OutcomeSchema::DiscreteBrackets { unit: ua, brackets: ba },
            OutcomeSchema::DiscreteBrackets { unit: ub, brackets: bb },
        ) => {
            if ua != ub {
                return 0.0;
            }
            if brackets_equal(ba, bb) {
                return 1.0;
            }
            let overlap_count = ba.iter().filter(|x| bb.iter().any(|y| x.overlaps(y))).count();
            overlap_count as f64 / ba.len().max(bb.len()) as f64
        }
        (
            OutcomeSchema::ScalarRange { unit: ua, min: mina, max: maxa },
            OutcomeSchema::ScalarRange { unit: ub, min: minb, max: maxb },
        ) => {
            if ua != ub {
                return 0.0;
            }
            if mina == minb && maxa == maxb {
                return 1.0;
            }
            let a_contains_b = mina <= minb && maxb <= maxa;
            let b_contains_a = minb <= mina && maxa <= maxb;
            if a_contains_b || b_contains_a {
                0.8
            } else {
                0.0
            }
        }
        (OutcomeSchema::YesNo { .. }, OutcomeSchema::DiscreteBrackets { brackets, .. }) => {
            if brackets.len() == 2 {
                0.9
            } else {
                0.0
            }
        }
        (OutcomeSchema::DiscreteBrackets { brackets, .. }, OutcomeSchema::YesNo { .. }) => {
            if brackets.len() == 2 {
                0.9
            } else {
                0.0
            }
        }
        _ => 0.0,
    }
}

fn f_resolution(a: &Contract, b: &Contract) -> f64 {
    match (&a.resolution_source, &b.resolution_source) {
        (None, None) => 0.5,
        (None, Some(_)) | (Some(_), None) => 0.3,
        (Some(sa), Some(sb)) => {
            let ca = canonicalize_source(sa);
            let cb = canonicalize_source(sb);
            if ca == cb {
                1.0
            } else if same_synonym_group(&ca, &cb) {
                0.7
            } else {
                0.3
            }
        }
    }
}

const PLAYER_PROP_KEYWORDS: &[&str] = &[
    "yards", "points", "rushing", "passing", "receiving", "rebounds", "assists", "goals",
    "saves", "strikeouts", "home runs",
];

fn has_player_prop_markers(title_lower: &str) -> bool {
    if PLAYER_PROP_KEYWORDS.iter().any(|kw| title_lower.contains(kw)) {
        return true;
    }
    title_lower
        .split(|c: char| !c.is_ascii_digit() && c != '+')
        .any(|tok| tok.ends_with('+') && tok.len() > 1)
}

fn extract_number_tokens(title: &str) -> HashSet<String> {
    let mut out = HashSet::new();
    let mut current = String::new();
    for c in title.chars() {
        if c.is_ascii_digit() || c == '.' {
            current.push(c);
        } else {
            if !current.is_empty() {
                out.insert(current.clone());
                current.clear();
            }
        }
    }
    if !current.is_empty() {
        out.insert(current);
    }
    out
}

fn check_hard_constraints(
    a: &Contract,
    b: &Contract,
    config: &Config,
    f_text: f64,
    entity: &EntityFeature,
    f_outcome_score: f64,
    time_delta_days: f64,
) -> Option<VetoReason> {
    if !a.event_type.is_empty()
        && !b.event_type.is_empty()
        && a.event_type != "general"
        && b.event_type != "general"
        && a.event_type != b.event_type
    {
        return Some("event_type_mismatch");
    }

    if f_text < config.hard_constraint_min_text_score {
        return Some("text_floor");
    }

    if entity.score < config.hard_constraint_min_entity_score
        && !entity.ticker_exact
        && !entity.people_exact
    {
        return Some("entity_floor");
    }

    if time_delta_days > config.hard_constraint_max_time_delta_days {
        return Some("max_time_delta");
    }

    if f_outcome_score == 0.0 {
        return Some("outcome_zero");
    }

    if detect_direction_mismatch(&a.cleaned_title, &b.cleaned_title) {
        return Some("direction_mismatch");
    }

    let a_has_people = !a.entities.people.is_empty();
    let b_has_people = !b.entities.people.is_empty();
    if a_has_people
        && b_has_people
        && a.entities.people.is_disjoint(&b.entities.people)
        && !entity.people_exact
    {
        return Some("disjoint_people");
    }

    if a.event_type == "sports" && b.event_type == "sports" {
        let a_markers = has_player_prop_markers(&a.cleaned_title);
        let b_markers = has_player_prop_markers(&b.cleaned_title);
        if a_markers != b_markers {
            return Some("player_prop_asymmetry");
        }
        if a_markers && b_markers {
            let nums_a = extract_number_tokens(&a.cleaned_title);
            let nums_b = extract_number_tokens(&b.cleaned_title);
            if nums_a.is_disjoint(&nums_b) && f_text < 0.70 {
                return Some("player_prop_number_mismatch");
            }
        }

        if let (Some(sub_a), Some(sub_b)) = (&a.sport_subtype, &b.sport_subtype) {
            if sub_a != sub_b {
                return Some("sport_type_mismatch");
            }
        }
    }

    if a.is_parlay != b.is_parlay {
        return Some("parlay_asymmetry");
    }
    if a.is_parlay && b.is_parlay && f_text < 0.85 {
        return Some("parlay_text_floor");
    }

    None
}

fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

/// Scores a candidate pair. Order-independent in the five feature scores
/// (aside from the contracts' platform tags used when building outcome_mapping
/// at the call site); applies hard constraints, then the weighted aggregate
/// and the calibrated match probability.
pub fn score(a: &Contract, b: &Contract, config: &Config) -> ScoreResult {
    debug_assert_ne!(a.platform, b.platform, "scoring requires two distinct exchanges");

    let text_score = f_text(a, b);
    let entity = f_entity(a, b);
    let (time_score, time_delta_days) = f_time(a, b);
    let outcome_score = f_outcome(a, b);
    let resolution_score = f_resolution(a, b);

    let hard_violation = check_hard_constraints(
        a,
        b,
        config,
        text_score,
        &entity,
        outcome_score,
        time_delta_days,
    );

    if hard_violation.is_some() {
        return ScoreResult {
            f_text: text_score,
            f_entity: entity.score,
            f_time: time_score,
            f_outcome: outcome_score,
            f_resolution: resolution_score,
            time_delta_days,
            hard_violation,
            similarity: 0.0,
            p_match: 0.0,
        };
    }

    let w = &config.weights;
    let similarity = w.text * text_score
        + w.entity * entity.score
        + w.time * time_score
        + w.outcome * outcome_score
        + w.resolution * resolution_score;

    let z = config.beta[0]
        + config.beta[1] * text_score
        + config.beta[2] * entity.score
        + config.beta[3] * time_score
        + config.beta[4] * outcome_score
        + config.beta[5] * resolution_score;
    let p_match = sigmoid(z);

    ScoreResult {
        f_text: text_score,
        f_entity: entity.score,
        f_time: time_score,
        f_outcome: outcome_score,
        f_resolution: resolution_score,
        time_delta_days,
        hard_violation: None,
        similarity,
        p_match,
    }
}

/// Builds the bracket/yes-no outcome label mapping for a bonded pair, per §4.9.
pub fn outcome_mapping(a: &Contract, b: &Contract) -> std::collections::HashMap<String, String> {
    let mut mapping = std::collections::HashMap::new();
    if let (OutcomeSchema::YesNo { polarity: pa }, OutcomeSchema::YesNo { polarity: pb }) =
        (&a.outcome_schema, &b.outcome_schema)
    {
        if pa == pb {
            mapping.insert("Yes".to_string(), "Yes".to_string());
            mapping.insert("No".to_string(), "No".to_string());
        } else {
            mapping.insert("Yes".to_string(), "No".to_string());
            mapping.insert("No".to_string(), "Yes".to_string());
        }
    }
    mapping
}
