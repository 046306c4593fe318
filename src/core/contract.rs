//! The canonical contract record (§3) and the tagged outcome-schema sum type.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    ExchangeA,
    ExchangeB,
}

impl Platform {
    pub fn other(self) -> Platform {
        match self {
            Platform::ExchangeA => Platform::ExchangeB,
            Platform::ExchangeB => Platform::ExchangeA,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Platform::ExchangeA => "exchange_a",
            Platform::ExchangeB => "exchange_b",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Polarity {
    Positive,
    Negative,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OutcomeSchema {
    YesNo {
        polarity: Polarity,
    },
    DiscreteBrackets {
        unit: String,
        /// Each bracket is a half-open [min, max) range; an absent bound is unbounded.
        brackets: Vec<Bracket>,
    },
    ScalarRange {
        unit: String,
        min: f64,
        max: f64,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bracket {
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl Bracket {
    pub fn overlaps(&self, other: &Bracket) -> bool {
        let self_min = self.min.unwrap_or(f64::NEG_INFINITY);
        let self_max = self.max.unwrap_or(f64::INFINITY);
        let other_min = other.min.unwrap_or(f64::NEG_INFINITY);
        let other_max = other.max.unwrap_or(f64::INFINITY);
        self_min < other_max && other_min < self_max
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct OutcomePrice {
    pub mid: Option<f64>,
    pub bid: Option<f64>,
    pub ask: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Copy, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Granularity {
    Day,
    Week,
    Month,
    Quarter,
    Year,
}

impl Granularity {
    /// Time-decay constant tau, in days, per §4.7.
    pub fn tau_days(self) -> f64 {
        match self {
            Granularity::Day => 3.0,
            Granularity::Week => 7.0,
            Granularity::Month => 14.0,
            Granularity::Quarter => 21.0,
            Granularity::Year => 30.0,
        }
    }

    /// Infers granularity from title keywords, defaulting to week per §4.5.
    pub fn infer_from_title(title_lower: &str) -> Granularity {
        if title_lower.contains("daily") {
            Granularity::Day
        } else if title_lower.contains("annual") {
            Granularity::Year
        } else if ["q1", "q2", "q3", "q4", "quarter"]
            .iter()
            .any(|k| title_lower.contains(k))
        {
            Granularity::Quarter
        } else {
            Granularity::Week
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntitySets {
    pub tickers: HashSet<String>,
    pub people: HashSet<String>,
    pub organizations: HashSet<String>,
    pub countries: HashSet<String>,
    pub misc: HashSet<String>,
}

impl EntitySets {
    pub fn is_empty(&self) -> bool {
        self.tickers.is_empty()
            && self.people.is_empty()
            && self.organizations.is_empty()
            && self.countries.is_empty()
            && self.misc.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContractStatus {
    Active,
    Closed,
    Resolved,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeWindow {
    pub resolution: Option<DateTime<Utc>>,
    pub observation_start: Option<DateTime<Utc>>,
    pub observation_end: Option<DateTime<Utc>>,
    pub granularity: Granularity,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contract {
    pub platform: Platform,
    pub id: String,
    /// EX-B condition id; present only for Platform::ExchangeB contracts.
    pub condition_id: Option<String>,
    /// EX-B per-outcome CLOB token ids, positionally aligned with outcome_schema brackets/labels.
    pub token_ids: Vec<String>,

    pub title: String,
    pub description: String,

    pub cleaned_title: String,
    pub cleaned_description: String,
    pub category: String,
    pub event_type: String,
    pub geo_scope: String,
    pub resolution_source: Option<String>,
    pub sport_subtype: Option<String>,
    pub is_parlay: bool,

    pub entities: EntitySets,

    pub outcome_schema: OutcomeSchema,
    /// Per-outcome prices, indexed the same way as outcome_schema's labels
    /// (index 0 = Yes for YesNo, bracket index for DiscreteBrackets).
    pub outcome_prices: Vec<OutcomePrice>,

    pub time_window: TimeWindow,

    pub embedding: Option<Vec<f32>>,

    pub volume: f64,
    pub liquidity: f64,
    pub fee_hint: Option<f64>,

    pub status: ContractStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Contract {
    pub fn yes_outcome_price(&self) -> Option<OutcomePrice> {
        self.outcome_prices.first().copied()
    }

    pub fn no_outcome_price(&self) -> Option<OutcomePrice> {
        self.outcome_prices.get(1).copied()
    }

    pub fn is_stale(&self, staleness_threshold_sec: i64, now: DateTime<Utc>) -> bool {
        (now - self.updated_at).num_seconds() > staleness_threshold_sec
    }
}
