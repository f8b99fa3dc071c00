//! Instant conversion between two assets at a quoted price.
//!
//! A quote fixes the pair, direction and price at the moment it was issued. Conversion
//! truncates the gross output at the output asset's precision and rounds the fee up, so
//! the user never receives more than the exact quoted amount.

use crate::engine::EngineError;
use crate::types::{Asset, Bps, Price, Symbol, Timestamp};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapQuote {
    pub symbol: Symbol,
    pub asset_in: Asset,
    pub asset_out: Asset,
    pub price: Price,
    pub issued_at: Timestamp,
}

impl SwapQuote {
    /// `price` is quoted as `symbol.quote` per unit of `symbol.base`; `asset_in` must be one
    /// side of the pair and the other side is what the user receives.
    pub fn new(symbol: Symbol, asset_in: Asset, price: Price, issued_at: Timestamp) -> Result<Self, EngineError> {
        let asset_out = if asset_in == symbol.quote {
            symbol.base
        } else if asset_in == symbol.base {
            symbol.quote
        } else {
            return Err(EngineError::validation(format!("{asset_in} is not part of {symbol}")));
        };
        if asset_in == asset_out {
            return Err(EngineError::validation("cannot swap an asset into itself"));
        }
        Ok(Self {
            symbol,
            asset_in,
            asset_out,
            price,
            issued_at,
        })
    }

    pub fn is_expired(&self, now: Timestamp, ttl_ms: i64) -> bool {
        self.issued_at.millis_until(&now) > ttl_ms
    }

    /// Exact (unrounded) output for `amount_in`. `None` on overflow.
    pub fn exact_output(&self, amount_in: Decimal) -> Option<Decimal> {
        if self.asset_in == self.symbol.quote {
            amount_in.checked_div(self.price.value())
        } else {
            amount_in.checked_mul(self.price.value())
        }
    }

    pub fn matches(&self, asset_in: Asset, asset_out: Asset) -> bool {
        self.asset_in == asset_in && self.asset_out == asset_out
    }
}

/// Applies `spread` against the user: buying the base costs more, selling it pays less.
pub fn spread_price(symbol: Symbol, asset_in: Asset, mid: Price, spread: Bps) -> Price {
    let adjust = spread.as_fraction();
    let raw = if asset_in == symbol.quote {
        mid.value() * (Decimal::ONE + adjust)
    } else {
        mid.value() * (Decimal::ONE - adjust)
    };
    Price::new(raw).unwrap_or(mid)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapBreakdown {
    pub gross_out: Decimal,
    pub fee: Decimal,
    pub net_out: Decimal,
}

pub fn compute_output(quote: &SwapQuote, amount_in: Decimal, fee_rate: Bps) -> Option<SwapBreakdown> {
    let asset = quote.asset_out;
    let gross_out = asset.truncate(quote.exact_output(amount_in)?);
    let fee = asset.round_up(gross_out * fee_rate.as_fraction()).min(gross_out);
    Some(SwapBreakdown {
        gross_out,
        fee,
        net_out: gross_out - fee,
    })
}
