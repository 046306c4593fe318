//! Exchange client contract (C1): the narrow, read-only interface the core
//! consumes from each exchange, and the raw wire shapes of §6.
//!
//! The core does not own either exchange's wire protocol — HTTP transport,
//! auth, pagination cursors, and rate-limit bookkeeping live in the scraper
//! modules that implement these traits. What lives here is the *contract*
//! those scrapers are adapted to, the raw-record shapes §6 promises, and the
//! conversion into C5's `normalize::RawContract`, plus the bounded-retry
//! helper every in-loop caller wraps these trait calls in.

use crate::core::contract::{ContractStatus, OutcomePrice, OutcomeSchema, Platform, Polarity};
use crate::core::error::CoreError;
use crate::core::normalize::RawContract;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::Rng;
use std::time::Duration;
use tracing::warn;

/// One side of a resting order book, best price first.
pub type BookLevel = (f64, f64);

#[derive(Debug, Clone)]
pub struct OrderBook {
    /// Descending by price.
    pub bids: Vec<BookLevel>,
    /// Ascending by price.
    pub asks: Vec<BookLevel>,
    pub timestamp: DateTime<Utc>,
}

impl OrderBook {
    pub fn best_bid(&self) -> Option<f64> {
        self.bids.first().map(|(price, _)| *price)
    }

    pub fn best_ask(&self) -> Option<f64> {
        self.asks.first().map(|(price, _)| *price)
    }

    pub fn depth_at_best_bid(&self) -> Option<f64> {
        self.bids.first().map(|(_, size)| *size)
    }

    pub fn depth_at_best_ask(&self) -> Option<f64> {
        self.asks.first().map(|(_, size)| *size)
    }
}

/// EX-A's raw wire record, per §6: `{ticker, title, subtitle, close_time,
/// expiration_time, status, category, yes_bid, yes_ask, last_price, volume,
/// liquidity}`. Prices arrive as integer cents in `[0, 100]`.
#[derive(Debug, Clone)]
pub struct ExchangeARawContract {
    pub ticker: String,
    pub title: String,
    pub subtitle: String,
    pub close_time: Option<DateTime<Utc>>,
    pub expiration_time: Option<DateTime<Utc>>,
    pub status: String,
    pub category: String,
    pub yes_bid: Option<i64>,
    pub yes_ask: Option<i64>,
    pub last_price: Option<i64>,
    pub volume: f64,
    pub liquidity: f64,
}

/// EX-B's raw wire record, per §6: `{conditionId, question, description,
/// endDate, active, closed, tags, clobTokenIds, volume, liquidity}`. Prices
/// arrive as decimal strings in `[0, 1]`.
#[derive(Debug, Clone)]
pub struct ExchangeBRawContract {
    pub condition_id: String,
    pub question: String,
    pub description: String,
    pub end_date: Option<DateTime<Utc>>,
    pub active: bool,
    pub closed: bool,
    pub tags: Vec<String>,
    pub clob_token_ids: Vec<String>,
    /// Decimal-string mid price per outcome, positionally aligned with `clob_token_ids`.
    pub outcome_prices: Vec<Option<String>>,
    pub volume: f64,
    pub liquidity: f64,
}

fn cents_to_unit(cents: Option<i64>) -> Option<f64> {
    cents.map(|c| (c as f64 / 100.0).clamp(0.0, 1.0))
}

fn parse_decimal_price(raw: &Option<String>) -> Option<f64> {
    raw.as_deref()
        .and_then(|s| s.trim().parse::<f64>().ok())
        .map(|p| p.clamp(0.0, 1.0))
}

/// Synthesizes a bid/ask around a single observed mid when the upstream
/// client provides no book-derived spread, per §8 scenario 4's "small
/// synthetic ±0.5% spread fallback", reused here so every contract entering
/// the store carries a usable bid/ask even before C11's first refresh.
fn synthetic_spread(mid: f64) -> (f64, f64) {
    let half_spread = mid * 0.005;
    ((mid - half_spread).max(0.0), (mid + half_spread).min(1.0))
}

/// Converts an EX-A raw record into C5's pre-text-cleaning `RawContract`.
/// Fails with `NormalizationError` when required fields (a resolution
/// timestamp) are absent.
pub fn exchange_a_to_raw_contract(raw: ExchangeARawContract) -> Result<RawContract, CoreError> {
    let resolution = raw.expiration_time.or(raw.close_time).ok_or_else(|| {
        CoreError::NormalizationError {
            raw_id: raw.ticker.clone(),
            reason: "missing close_time/expiration_time".to_string(),
        }
    })?;

    let mid = cents_to_unit(raw.last_price).or_else(|| {
        match (cents_to_unit(raw.yes_bid), cents_to_unit(raw.yes_ask)) {
            (Some(bid), Some(ask)) => Some((bid + ask) / 2.0),
            (Some(bid), None) => Some(bid),
            (None, Some(ask)) => Some(ask),
            (None, None) => None,
        }
    });

    let yes_bid = cents_to_unit(raw.yes_bid);
    let yes_ask = cents_to_unit(raw.yes_ask);
    let yes_price = match mid {
        Some(mid_value) => {
            let (synth_bid, synth_ask) = synthetic_spread(mid_value);
            OutcomePrice {
                mid: Some(mid_value),
                bid: yes_bid.or(Some(synth_bid)),
                ask: yes_ask.or(Some(synth_ask)),
            }
        }
        None => OutcomePrice::default(),
    };
    let no_price = match mid {
        Some(mid_value) => {
            let no_mid = 1.0 - mid_value;
            let (synth_bid, synth_ask) = synthetic_spread(no_mid);
            OutcomePrice {
                mid: Some(no_mid),
                bid: yes_ask.map(|a| 1.0 - a).or(Some(synth_bid)),
                ask: yes_bid.map(|b| 1.0 - b).or(Some(synth_ask)),
            }
        }
        None => OutcomePrice::default(),
    };

    let status = match raw.status.to_lowercase().as_str() {
        "closed" => ContractStatus::Closed,
        "settled" | "resolved" | "finalized" => ContractStatus::Resolved,
        _ => ContractStatus::Active,
    };

    Ok(RawContract {
        platform: Platform::ExchangeA,
        id: raw.ticker,
        condition_id: None,
        token_ids: vec![],
        title: raw.title,
        description: raw.subtitle,
        category: raw.category,
        resolution_source: None,
        outcome_schema: OutcomeSchema::YesNo {
            polarity: Polarity::Positive,
        },
        outcome_prices: vec![yes_price, no_price],
        resolution: Some(resolution),
        observation_start: None,
        observation_end: None,
        volume: raw.volume,
        liquidity: raw.liquidity,
        fee_hint: None,
        status,
    })
}

/// Converts an EX-B raw record into C5's pre-text-cleaning `RawContract`.
pub fn exchange_b_to_raw_contract(raw: ExchangeBRawContract) -> Result<RawContract, CoreError> {
    let resolution = raw.end_date.ok_or_else(|| CoreError::NormalizationError {
        raw_id: raw.condition_id.clone(),
        reason: "missing endDate".to_string(),
    })?;

    let outcome_prices: Vec<OutcomePrice> = raw
        .outcome_prices
        .iter()
        .map(|raw_price| match parse_decimal_price(raw_price) {
            Some(mid) => {
                let (bid, ask) = synthetic_spread(mid);
                OutcomePrice {
                    mid: Some(mid),
                    bid: Some(bid),
                    ask: Some(ask),
                }
            }
            None => OutcomePrice::default(),
        })
        .collect();

    let status = if raw.closed {
        ContractStatus::Closed
    } else if raw.active {
        ContractStatus::Active
    } else {
        ContractStatus::Closed
    };

    let category = raw
        .tags
        .first()
        .cloned()
        .unwrap_or_else(|| "general".to_string());

    Ok(RawContract {
        platform: Platform::ExchangeB,
        id: raw.condition_id.clone(),
        condition_id: Some(raw.condition_id),
        token_ids: raw.clob_token_ids,
        title: raw.question,
        description: raw.description,
        category,
        resolution_source: None,
        outcome_schema: OutcomeSchema::YesNo {
            polarity: Polarity::Positive,
        },
        outcome_prices,
        resolution: Some(resolution),
        observation_start: None,
        observation_end: None,
        volume: raw.volume,
        liquidity: raw.liquidity,
        fee_hint: None,
        status,
    })
}

#[async_trait]
pub trait ExchangeAClient: Send + Sync {
    async fn list_active_contracts(
        &self,
        cursor: Option<&str>,
    ) -> Result<(Vec<ExchangeARawContract>, Option<String>), CoreError>;

    async fn get_contracts_by_ids(
        &self,
        ids: &[String],
    ) -> Result<Vec<ExchangeARawContract>, CoreError>;

    async fn get_contract(&self, id: &str) -> Result<Option<ExchangeARawContract>, CoreError>;

    async fn get_order_book(&self, token_id: &str) -> Result<OrderBook, CoreError>;
}

#[async_trait]
pub trait ExchangeBClient: Send + Sync {
    async fn list_active_contracts(
        &self,
        cursor: Option<&str>,
    ) -> Result<(Vec<ExchangeBRawContract>, Option<String>), CoreError>;

    /// EX-B may not support a bulk-by-id lookup (§4.1); the default rejects so
    /// C11 falls back to `list_active_contracts` filtered to the bonded set.
    async fn get_contracts_by_ids(
        &self,
        _ids: &[String],
    ) -> Result<Vec<ExchangeBRawContract>, CoreError> {
        Err(CoreError::UpstreamUnavailable(
            "exchange B does not support bulk id lookup".to_string(),
        ))
    }

    async fn get_contract(&self, id: &str) -> Result<Option<ExchangeBRawContract>, CoreError>;

    async fn get_order_book(&self, token_id: &str) -> Result<OrderBook, CoreError>;
}

/// Bounded exponential backoff with full jitter, shared by every in-loop
/// caller of a client-trait method (§5, §7). Retries only `is_retryable`
/// errors; any other error, or the final attempt's error, is returned as-is.
pub async fn with_retry<T, F, Fut>(
    operation: &str,
    max_attempts: u32,
    base_delay: Duration,
    mut f: F,
) -> Result<T, CoreError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, CoreError>>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match f().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt < max_attempts => {
                let backoff_ms = base_delay.as_millis() as u64 * (1u64 << (attempt - 1));
                let jitter_ms = rand::thread_rng().gen_range(0..=backoff_ms.max(1));
                warn!(
                    operation,
                    attempt, max_attempts, %err, "retrying after transient failure"
                );
                tokio::time::sleep(Duration::from_millis(jitter_ms)).await;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn cents_to_unit_clamps_and_scales() {
        assert_eq!(cents_to_unit(Some(61)), Some(0.61));
        assert_eq!(cents_to_unit(Some(150)), Some(1.0));
        assert_eq!(cents_to_unit(None), None);
    }

    #[test]
    fn parse_decimal_price_handles_malformed_input() {
        assert_eq!(parse_decimal_price(&Some("0.42".to_string())), Some(0.42));
        assert_eq!(parse_decimal_price(&Some("not-a-number".to_string())), None);
        assert_eq!(parse_decimal_price(&None), None);
    }

    #[test]
    fn exchange_a_conversion_scales_cents_and_derives_no_outcome() {
        let raw = ExchangeARawContract {
            ticker: "EXA-BTC-100K".to_string(),
            title: "Will Bitcoin reach $100,000?".to_string(),
            subtitle: String::new(),
            close_time: Some(Utc::now()),
            expiration_time: None,
            status: "active".to_string(),
            category: "crypto".to_string(),
            yes_bid: Some(60),
            yes_ask: Some(62),
            last_price: Some(61),
            volume: 1000.0,
            liquidity: 5000.0,
        };
        let contract = exchange_a_to_raw_contract(raw).unwrap();
        assert_eq!(contract.outcome_prices[0].mid, Some(0.61));
        assert_eq!(contract.outcome_prices[1].mid, Some(0.39));
        assert_eq!(contract.outcome_prices[1].bid, Some(0.38));
    }

    #[test]
    fn exchange_a_conversion_rejects_missing_resolution_time() {
        let raw = ExchangeARawContract {
            ticker: "EXA-X".to_string(),
            title: "X".to_string(),
            subtitle: String::new(),
            close_time: None,
            expiration_time: None,
            status: "active".to_string(),
            category: "general".to_string(),
            yes_bid: None,
            yes_ask: None,
            last_price: None,
            volume: 0.0,
            liquidity: 0.0,
        };
        assert!(exchange_a_to_raw_contract(raw).is_err());
    }

    #[test]
    fn exchange_b_conversion_parses_decimal_strings() {
        let raw = ExchangeBRawContract {
            condition_id: "0xabc".to_string(),
            question: "Bitcoin to $100k in 2025?".to_string(),
            description: "desc".to_string(),
            end_date: Some(Utc::now()),
            active: true,
            closed: false,
            tags: vec!["crypto".to_string()],
            clob_token_ids: vec!["tok-yes".to_string(), "tok-no".to_string()],
            outcome_prices: vec![Some("0.61".to_string()), Some("0.39".to_string())],
            volume: 2000.0,
            liquidity: 8000.0,
        };
        let contract = exchange_b_to_raw_contract(raw).unwrap();
        assert_eq!(contract.outcome_prices[0].mid, Some(0.61));
        assert_eq!(contract.category, "crypto");
        assert_eq!(contract.token_ids.len(), 2);
    }

    #[tokio::test]
    async fn with_retry_retries_then_succeeds() {
        let attempts = AtomicU32::new(0);
        let result = with_retry("test_op", 3, Duration::from_millis(1), || {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(CoreError::RateLimited("slow down".to_string()))
                } else {
                    Ok(42)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn with_retry_does_not_retry_non_retryable_errors() {
        let attempts = AtomicU32::new(0);
        let result: Result<(), CoreError> = with_retry("test_op", 5, Duration::from_millis(1), || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                Err(CoreError::NormalizationError {
                    raw_id: "x".to_string(),
                    reason: "bad".to_string(),
                })
            }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
