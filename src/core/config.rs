//! Runtime configuration for the bonding and arbitrage pipeline.
//!
//! Loaded once at startup from the environment (with a `.env` file read first,
//! same as the rest of the process); every field has a hard-coded default so an
//! absent variable never fails, but a present-and-malformed one does.

use crate::core::error::CoreError;
use anyhow::{Context, Result};
use std::env;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct FeatureWeights {
    pub text: f64,
    pub entity: f64,
    pub time: f64,
    pub outcome: f64,
    pub resolution: f64,
}

impl Default for FeatureWeights {
    fn default() -> Self {
        Self {
            text: 0.35,
            entity: 0.25,
            time: 0.15,
            outcome: 0.20,
            resolution: 0.05,
        }
    }
}

impl FeatureWeights {
    pub fn sum(&self) -> f64 {
        self.text + self.entity + self.time + self.outcome + self.resolution
    }
}

#[derive(Debug, Clone)]
pub struct TierFloors {
    pub text: f64,
    pub entity: f64,
    pub outcome: f64,
    pub time: f64,
    pub resolution: f64,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub weights: FeatureWeights,
    /// beta[0] is the intercept; beta[1..=5] multiply (text, entity, time, outcome, resolution).
    pub beta: [f64; 6],

    pub tier1_min_similarity: f64,
    pub tier2_min_similarity: f64,
    pub tier1_p_match_threshold: f64,
    pub tier2_p_match_threshold: f64,
    pub tier1_min_f: TierFloors,
    pub tier2_min_f: TierFloors,

    pub hard_constraint_min_text_score: f64,
    pub hard_constraint_min_entity_score: f64,
    pub hard_constraint_max_time_delta_days: f64,

    pub candidate_limit: usize,

    pub price_update_interval_sec: u64,
    pub staleness_threshold_sec: i64,

    pub fee_rate_a: f64,
    pub fee_rate_b: f64,
    pub gas_hint_per_trade: f64,

    pub min_liquidity_usd: f64,
    pub max_position_cap_usd: f64,

    pub monitor_max_opportunities: usize,
    pub monitor_stale_ttl_min: i64,
    pub monitor_min_profit: f64,

    pub poll_interval_sec: u64,

    pub embedding_dim: usize,

    pub bond_validation_interval_sec: u64,
    pub bond_validation_lookback_days: i64,

    pub database_path: String,
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_f64(key: &str, default: f64) -> Result<f64> {
    match env::var(key) {
        Err(_) => Ok(default),
        Ok(raw) => raw
            .parse::<f64>()
            .with_context(|| format!("{key}={raw:?} is not a valid number")),
    }
}

fn env_usize(key: &str, default: usize) -> Result<usize> {
    match env::var(key) {
        Err(_) => Ok(default),
        Ok(raw) => raw
            .parse::<usize>()
            .with_context(|| format!("{key}={raw:?} is not a valid non-negative integer")),
    }
}

fn env_u64(key: &str, default: u64) -> Result<u64> {
    match env::var(key) {
        Err(_) => Ok(default),
        Ok(raw) => raw
            .parse::<u64>()
            .with_context(|| format!("{key}={raw:?} is not a valid non-negative integer")),
    }
}

fn env_i64(key: &str, default: i64) -> Result<i64> {
    match env::var(key) {
        Err(_) => Ok(default),
        Ok(raw) => raw
            .parse::<i64>()
            .with_context(|| format!("{key}={raw:?} is not a valid integer")),
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        load_env();

        let weights = FeatureWeights {
            text: env_f64("WEIGHT_TEXT", 0.35)?,
            entity: env_f64("WEIGHT_ENTITY", 0.25)?,
            time: env_f64("WEIGHT_TIME", 0.15)?,
            outcome: env_f64("WEIGHT_OUTCOME", 0.20)?,
            resolution: env_f64("WEIGHT_RESOLUTION", 0.05)?,
        };

        let beta = [
            env_f64("BETA_0", -5.0)?,
            env_f64("BETA_TEXT", 4.2)?,
            env_f64("BETA_ENTITY", 3.1)?,
            env_f64("BETA_TIME", 2.5)?,
            env_f64("BETA_OUTCOME", 3.8)?,
            env_f64("BETA_RESOLUTION", 1.2)?,
        ];

        let config = Self {
            weights,
            beta,
            tier1_min_similarity: env_f64("TIER1_MIN_SIMILARITY", 0.80)?,
            tier2_min_similarity: env_f64("TIER2_MIN_SIMILARITY", 0.70)?,
            tier1_p_match_threshold: env_f64("TIER1_P_MATCH_THRESHOLD", 0.95)?,
            tier2_p_match_threshold: env_f64("TIER2_P_MATCH_THRESHOLD", 0.90)?,
            tier1_min_f: TierFloors {
                text: env_f64("TIER1_MIN_F_TEXT", 0.90)?,
                entity: env_f64("TIER1_MIN_F_ENTITY", 0.70)?,
                outcome: env_f64("TIER1_MIN_F_OUTCOME", 0.98)?,
                time: env_f64("TIER1_MIN_F_TIME", 0.50)?,
                resolution: env_f64("TIER1_MIN_F_RESOLUTION", 0.20)?,
            },
            tier2_min_f: TierFloors {
                text: env_f64("TIER2_MIN_F_TEXT", 0.80)?,
                entity: env_f64("TIER2_MIN_F_ENTITY", 0.50)?,
                outcome: env_f64("TIER2_MIN_F_OUTCOME", 0.90)?,
                time: env_f64("TIER2_MIN_F_TIME", 0.30)?,
                resolution: 0.0,
            },
            hard_constraint_min_text_score: env_f64("HARD_CONSTRAINT_MIN_TEXT_SCORE", 0.70)?,
            hard_constraint_min_entity_score: env_f64("HARD_CONSTRAINT_MIN_ENTITY_SCORE", 0.0)?,
            hard_constraint_max_time_delta_days: env_f64(
                "HARD_CONSTRAINT_MAX_TIME_DELTA_DAYS",
                90.0,
            )?,
            candidate_limit: env_usize("CANDIDATE_LIMIT", 50)?,
            price_update_interval_sec: env_u64("PRICE_UPDATE_INTERVAL_SEC", 10)?,
            staleness_threshold_sec: env_i64("STALENESS_THRESHOLD_SEC", 300)?,
            fee_rate_a: env_f64("FEE_RATE_A", 0.02)?,
            fee_rate_b: env_f64("FEE_RATE_B", 0.02)?,
            gas_hint_per_trade: env_f64("GAS_HINT_PER_TRADE", 0.10)?,
            min_liquidity_usd: env_f64("MIN_LIQUIDITY_USD", 1000.0)?,
            max_position_cap_usd: env_f64("MAX_POSITION_CAP_USD", 10000.0)?,
            monitor_max_opportunities: env_usize("MONITOR_MAX_OPPORTUNITIES", 100)?,
            monitor_stale_ttl_min: env_i64("MONITOR_STALE_TTL_MIN", 10)?,
            monitor_min_profit: env_f64("MONITOR_MIN_PROFIT", 0.01)?,
            poll_interval_sec: env_u64("POLL_INTERVAL_SEC", 60)?,
            embedding_dim: env_usize("EMBEDDING_DIM", 256)?,
            bond_validation_interval_sec: env_u64("BOND_VALIDATION_INTERVAL_SEC", 3600)?,
            bond_validation_lookback_days: env_i64("BOND_VALIDATION_LOOKBACK_DAYS", 7)?,
            database_path: resolve_data_path(
                env_or("BONDING_DATABASE_PATH", "./bonding.db").as_str(),
                "bonding.db",
            ),
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        let sum = self.weights.sum();
        if (sum - 1.0).abs() > 1e-3 {
            return Err(CoreError::ConfigurationInvalid(format!(
                "feature weights must sum to 1.0, got {sum}"
            ))
            .into());
        }
        if [
            self.weights.text,
            self.weights.entity,
            self.weights.time,
            self.weights.outcome,
            self.weights.resolution,
        ]
        .iter()
        .any(|w| *w < 0.0)
        {
            return Err(
                CoreError::ConfigurationInvalid("feature weights must be non-negative".into())
                    .into(),
            );
        }

        let probability_fields = [
            ("tier1_min_similarity", self.tier1_min_similarity),
            ("tier2_min_similarity", self.tier2_min_similarity),
            ("tier1_p_match_threshold", self.tier1_p_match_threshold),
            ("tier2_p_match_threshold", self.tier2_p_match_threshold),
            (
                "hard_constraint_min_text_score",
                self.hard_constraint_min_text_score,
            ),
            (
                "hard_constraint_min_entity_score",
                self.hard_constraint_min_entity_score,
            ),
        ];
        for (name, value) in probability_fields {
            if !(0.0..=1.0).contains(&value) {
                return Err(CoreError::ConfigurationInvalid(format!(
                    "{name}={value} must lie in [0, 1]"
                ))
                .into());
            }
        }

        if self.candidate_limit == 0 {
            return Err(
                CoreError::ConfigurationInvalid("candidate_limit must be positive".into()).into(),
            );
        }
        if self.price_update_interval_sec == 0 || self.poll_interval_sec == 0 {
            return Err(CoreError::ConfigurationInvalid(
                "polling intervals must be positive".into(),
            )
            .into());
        }
        if self.embedding_dim == 0 {
            return Err(
                CoreError::ConfigurationInvalid("embedding_dim must be positive".into()).into(),
            );
        }

        Ok(())
    }
}

/// Resolves a path from configuration against the crate root rather than the
/// process's current working directory, so a relative `BONDING_DATABASE_PATH`
/// doesn't end up creating a database wherever the binary happened to be launched.
pub fn resolve_data_path(configured: &str, default_filename: &str) -> String {
    let path = Path::new(configured);
    if path.is_absolute() {
        return configured.to_string();
    }

    let manifest_dir = env!("CARGO_MANIFEST_DIR");
    let joined: PathBuf = if configured.is_empty() {
        Path::new(manifest_dir).join(default_filename)
    } else {
        Path::new(manifest_dir).join(configured)
    };
    joined.to_string_lossy().into_owned()
}

/// Loads `.env` from the working directory, its parent, and the crate root, in
/// that order; later reads never override variables already present in the process
/// environment.
pub fn load_env() {
    dotenv::dotenv().ok();

    let manifest_dir = env!("CARGO_MANIFEST_DIR");
    let _ = dotenv::from_path(Path::new(manifest_dir).join(".env"));
    let _ = dotenv::from_path(Path::new(manifest_dir).join("../.env"));
}

#[cfg(test)]
impl Config {
    /// Builds a config from compiled-in defaults only, bypassing the
    /// environment entirely, so scorer/tier tests stay hermetic.
    pub fn from_env_for_tests() -> Self {
        Self {
            weights: FeatureWeights::default(),
            beta: [-5.0, 4.2, 3.1, 2.5, 3.8, 1.2],
            tier1_min_similarity: 0.80,
            tier2_min_similarity: 0.70,
            tier1_p_match_threshold: 0.95,
            tier2_p_match_threshold: 0.90,
            tier1_min_f: TierFloors {
                text: 0.90,
                entity: 0.70,
                outcome: 0.98,
                time: 0.50,
                resolution: 0.20,
            },
            tier2_min_f: TierFloors {
                text: 0.80,
                entity: 0.50,
                outcome: 0.90,
                time: 0.30,
                resolution: 0.0,
            },
            hard_constraint_min_text_score: 0.70,
            hard_constraint_min_entity_score: 0.0,
            hard_constraint_max_time_delta_days: 90.0,
            candidate_limit: 50,
            price_update_interval_sec: 10,
            staleness_threshold_sec: 300,
            fee_rate_a: 0.02,
            fee_rate_b: 0.02,
            gas_hint_per_trade: 0.10,
            min_liquidity_usd: 1000.0,
            max_position_cap_usd: 10000.0,
            monitor_max_opportunities: 100,
            monitor_stale_ttl_min: 10,
            monitor_min_profit: 0.01,
            poll_interval_sec: 60,
            embedding_dim: 256,
            bond_validation_interval_sec: 3600,
            bond_validation_lookback_days: 7,
            database_path: ":memory:".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_weights_sum_to_one() {
        let weights = FeatureWeights::default();
        assert!((weights.sum() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn resolve_data_path_passes_through_absolute_paths() {
        assert_eq!(resolve_data_path("/tmp/x.db", "default.db"), "/tmp/x.db");
    }

    #[test]
    fn resolve_data_path_anchors_relative_paths_to_manifest_dir() {
        let resolved = resolve_data_path("relative.db", "default.db");
        assert!(resolved.ends_with("relative.db"));
        assert!(resolved.starts_with(env!("CARGO_MANIFEST_DIR")));
    }
}
