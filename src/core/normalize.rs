//! Normalization pipeline (C5): orchestrates the text cleaner (C2), entity/event
//! classifier (C3), and embedding encoder (C4) into the canonical contract
//! record stored and scored downstream.

use crate::core::contract::{Contract, ContractStatus, Granularity, OutcomePrice, OutcomeSchema, TimeWindow};
use crate::core::{embedding, entity, text};
use chrono::Utc;

/// Raw, as-fetched fields for a single exchange contract, upstream of the
/// canonical `Contract` record.
pub struct RawContract {
    pub platform: crate::core::contract::Platform,
    pub id: String,
    pub condition_id: Option<String>,
    pub token_ids: Vec<String>,
    pub title: String,
    pub description: String,
    pub category: String,
    pub resolution_source: Option<String>,
    pub outcome_schema: crate::core::contract::OutcomeSchema,
    pub outcome_prices: Vec<OutcomePrice>,
    pub resolution: Option<chrono::DateTime<Utc>>,
    pub observation_start: Option<chrono::DateTime<Utc>>,
    pub observation_end: Option<chrono::DateTime<Utc>>,
    pub volume: f64,
    pub liquidity: f64,
    pub fee_hint: Option<f64>,
    pub status: ContractStatus,
}

/// Builds the canonical `Contract` record from a raw fetched contract, per §4.5.
pub fn normalize(raw: RawContract, embedding_dim: usize) -> Contract {
    let cleaned_title = text::clean_text(&raw.title);
    let cleaned_description = text::clean_text(&raw.description);
    let title_lower = cleaned_title.to_lowercase();

    let entities = entity::extract_entities(&format!("{} {}", raw.title, raw.description));
    let event_type = entity::classify_event_type(&raw.category, &entities, &cleaned_title);
    let sport_subtype = if event_type == "sports" {
        entity::classify_sport_type(&cleaned_title)
    } else {
        None
    };
    let is_parlay = entity::detect_parlay(&cleaned_title);
    let geo_scope = entity::determine_geo_scope(&entities, &cleaned_title);
    let granularity = Granularity::infer_from_title(&title_lower);

    // Wire records carry no polarity field; a YesNo schema's polarity is inferred
    // here from negation words rather than trusted from the upstream client.
    let outcome_schema = match raw.outcome_schema {
        OutcomeSchema::YesNo { .. } => OutcomeSchema::YesNo {
            polarity: text::infer_polarity(&title_lower),
        },
        other => other,
    };

    let embed_source = format!("{cleaned_title} {cleaned_description}");
    let embedding_vec = embedding::embed(&embed_source, embedding_dim);

    let now = Utc::now();

    Contract {
        platform: raw.platform,
        id: raw.id,
        condition_id: raw.condition_id,
        token_ids: raw.token_ids,
        title: raw.title,
        description: raw.description,
        cleaned_title,
        cleaned_description,
        category: raw.category,
        event_type,
        geo_scope,
        resolution_source: raw.resolution_source,
        sport_subtype,
        is_parlay,
        entities,
        outcome_schema,
        outcome_prices: raw.outcome_prices,
        time_window: TimeWindow {
            resolution: raw.resolution,
            observation_start: raw.observation_start,
            observation_end: raw.observation_end,
            granularity,
        },
        embedding: Some(embedding_vec),
        volume: raw.volume,
        liquidity: raw.liquidity,
        fee_hint: raw.fee_hint,
        status: raw.status,
        created_at: now,
        updated_at: now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::contract::{Platform, Polarity};

    fn sample_raw() -> RawContract {
        RawContract {
            platform: Platform::ExchangeA,
            id: "EXA-1".to_string(),
            condition_id: None,
            token_ids: vec![],
            title: "Will the Fed hike rates in March?".to_string(),
            description: "Resolves YES if the FOMC raises rates.".to_string(),
            category: "economics".to_string(),
            resolution_source: Some("federalreserve.gov".to_string()),
            outcome_schema: crate::core::contract::OutcomeSchema::YesNo {
                polarity: Polarity::Positive,
            },
            outcome_prices: vec![OutcomePrice {
                mid: Some(0.4),
                bid: Some(0.39),
                ask: Some(0.41),
            }],
            resolution: None,
            observation_start: None,
            observation_end: None,
            volume: 1000.0,
            liquidity: 5000.0,
            fee_hint: None,
            status: ContractStatus::Active,
        }
    }

    #[test]
    fn normalize_expands_abbreviation_and_classifies_rate_decision() {
        let contract = normalize(sample_raw(), 128);
        assert!(contract.cleaned_title.contains("federal reserve"));
        assert_eq!(contract.event_type, "rate_decision");
        assert!(contract.embedding.is_some());
        assert_eq!(contract.embedding.unwrap().len(), 128);
    }

    #[test]
    fn normalize_infers_negative_polarity_from_title() {
        let mut raw = sample_raw();
        raw.title = "The Fed won't hike rates in March".to_string();
        let contract = normalize(raw, 64);
        match contract.outcome_schema {
            crate::core::contract::OutcomeSchema::YesNo { polarity } => {
                assert_eq!(polarity, Polarity::Negative)
            }
            _ => panic!("expected YesNo schema"),
        }
    }

    #[test]
    fn normalize_defaults_geo_scope_to_us() {
        let contract = normalize(sample_raw(), 64);
        assert_eq!(contract.geo_scope, "US");
    }
}
