// Price oracle integration
//
// The engines are agnostic to where prices come from. They depend on the PriceOracle
// trait only; InMemoryOracle backs tests and simulations, MedianOracle combines several
// sources the way a production feed would.

use crate::types::{Price, Symbol, Timestamp};
use dashmap::DashMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A price observation for one symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceQuote {
    pub price: Price,
    pub timestamp: Timestamp,
}

impl PriceQuote {
    pub fn new(price: Price, timestamp: Timestamp) -> Self {
        Self { price, timestamp }
    }

    pub fn age_millis(&self, now: Timestamp) -> i64 {
        self.timestamp.millis_until(&now)
    }

    pub fn is_stale(&self, now: Timestamp, max_age_ms: i64) -> bool {
        self.age_millis(now) > max_age_ms
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OracleError {
    #[error("No price available for {0}")]
    PriceUnavailable(Symbol),

    #[error("No price for {symbol} at {at}")]
    NoPriceAt { symbol: Symbol, at: Timestamp },

    #[error("Oracle source unavailable")]
    SourceDown,

    #[error("Insufficient sources for {symbol}: required {required}, available {available}")]
    InsufficientSources {
        symbol: Symbol,
        required: usize,
        available: usize,
    },

    #[error("Sources disagree on {symbol} by {deviation}")]
    ExcessiveDeviation { symbol: Symbol, deviation: Decimal },
}

/// Source of current and historical prices.
pub trait PriceOracle: Send + Sync {
    /// Latest known price and when it was observed.
    fn get_price(&self, symbol: Symbol) -> Result<PriceQuote, OracleError>;

    /// Price in effect at `at` (the last observation at or before it).
    fn get_price_at(&self, symbol: Symbol, at: Timestamp) -> Result<Price, OracleError>;
}

/// In-memory price history per symbol.
#[derive(Debug)]
pub struct InMemoryOracle {
    history: DashMap<Symbol, Vec<PriceQuote>>,
    healthy: AtomicBool,
    max_history: usize,
    // an observation older than this relative to the requested time is not used
    max_lookback_ms: i64,
}

impl Default for InMemoryOracle {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryOracle {
    pub fn new() -> Self {
        Self {
            history: DashMap::new(),
            healthy: AtomicBool::new(true),
            max_history: 10_000,
            max_lookback_ms: 5 * 60 * 1000,
        }
    }

    pub fn with_max_lookback(mut self, millis: i64) -> Self {
        self.max_lookback_ms = millis;
        self
    }

    pub fn set_price(&self, symbol: Symbol, price: Price, timestamp: Timestamp) {
        let mut entry = self.history.entry(symbol).or_default();
        let quote = PriceQuote::new(price, timestamp);
        // keep history ordered even when updates arrive late
        let idx = entry.partition_point(|q| q.timestamp <= timestamp);
        entry.insert(idx, quote);
        if entry.len() > self.max_history {
            let overflow = entry.len() - self.max_history;
            entry.drain(0..overflow);
        }
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }
}

impl PriceOracle for InMemoryOracle {
    fn get_price(&self, symbol: Symbol) -> Result<PriceQuote, OracleError> {
        if !self.is_healthy() {
            return Err(OracleError::SourceDown);
        }
        self.history
            .get(&symbol)
            .and_then(|h| h.last().copied())
            .ok_or(OracleError::PriceUnavailable(symbol))
    }

    fn get_price_at(&self, symbol: Symbol, at: Timestamp) -> Result<Price, OracleError> {
        if !self.is_healthy() {
            return Err(OracleError::SourceDown);
        }
        let history = self
            .history
            .get(&symbol)
            .ok_or(OracleError::PriceUnavailable(symbol))?;

        let idx = history.partition_point(|q| q.timestamp <= at);
        if idx == 0 {
            return Err(OracleError::NoPriceAt { symbol, at });
        }
        let quote = history[idx - 1];
        if quote.is_stale(at, self.max_lookback_ms) {
            return Err(OracleError::NoPriceAt { symbol, at });
        }
        Ok(quote.price)
    }
}

/// Median of several oracles. Fails rather than guess when too few sources answer or
/// when they disagree by more than `max_deviation`.
pub struct MedianOracle {
    sources: Vec<Arc<dyn PriceOracle>>,
    min_sources: usize,
    max_deviation: Decimal,
}

impl MedianOracle {
    pub fn new(sources: Vec<Arc<dyn PriceOracle>>, min_sources: usize, max_deviation: Decimal) -> Self {
        Self {
            sources,
            min_sources: min_sources.max(1),
            max_deviation,
        }
    }

    fn aggregate(&self, symbol: Symbol, mut prices: Vec<Decimal>) -> Result<Price, OracleError> {
        if prices.len() < self.min_sources {
            return Err(OracleError::InsufficientSources {
                symbol,
                required: self.min_sources,
                available: prices.len(),
            });
        }
        prices.sort();
        let (min, max) = (prices[0], prices[prices.len() - 1]);
        let deviation = (max - min) / min;
        if deviation > self.max_deviation {
            return Err(OracleError::ExcessiveDeviation { symbol, deviation });
        }

        let len = prices.len();
        let median = if len % 2 == 0 {
            (prices[len / 2 - 1] + prices[len / 2]) / Decimal::new(2, 0)
        } else {
            prices[len / 2]
        };
        Price::new(median).ok_or(OracleError::PriceUnavailable(symbol))
    }
}

impl PriceOracle for MedianOracle {
    fn get_price(&self, symbol: Symbol) -> Result<PriceQuote, OracleError> {
        let quotes: Vec<PriceQuote> = self
            .sources
            .iter()
            .filter_map(|s| s.get_price(symbol).ok())
            .collect();
        // the aggregate is only as fresh as its oldest input
        let oldest = quotes.iter().map(|q| q.timestamp).min();
        let price = self.aggregate(symbol, quotes.iter().map(|q| q.price.value()).collect())?;
        let timestamp = oldest.ok_or(OracleError::PriceUnavailable(symbol))?;
        Ok(PriceQuote::new(price, timestamp))
    }

    fn get_price_at(&self, symbol: Symbol, at: Timestamp) -> Result<Price, OracleError> {
        let prices = self
            .sources
            .iter()
            .filter_map(|s| s.get_price_at(symbol, at).ok())
            .map(|p| p.value())
            .collect();
        self.aggregate(symbol, prices)
    }
}
