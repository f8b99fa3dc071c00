// 5.1 binary.rs: fixed-payout options on the price at expiry.
// the stake leaves the account at open. settlement happens once, at or after expiry,
// from the oracle price in effect at expiry.

use crate::types::{AccountId, Asset, PositionId, Price, Symbol, Timestamp};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OptionDirection {
    /// Wins if the price at expiry is above strike.
    Call,
    /// Wins if the price at expiry is below strike.
    Put,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BinaryStatus {
    Active,
    Won,
    Lost,
    Refunded,
}

/// What happens when the price at expiry equals strike.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TiePolicy {
    #[default]
    Lose,
    Refund,
}

pub fn outcome(direction: OptionDirection, strike: Price, settle: Price, tie: TiePolicy) -> BinaryStatus {
    if settle == strike {
        return match tie {
            TiePolicy::Lose => BinaryStatus::Lost,
            TiePolicy::Refund => BinaryStatus::Refunded,
        };
    }
    let won = match direction {
        OptionDirection::Call => settle > strike,
        OptionDirection::Put => settle < strike,
    };
    if won {
        BinaryStatus::Won
    } else {
        BinaryStatus::Lost
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BinaryPosition {
    pub id: PositionId,
    pub owner: AccountId,
    pub symbol: Symbol,
    pub direction: OptionDirection,
    pub stake: Decimal,
    pub strike: Price,
    pub expiry: Timestamp,
    // fixed at open
    pub payout_percent: Decimal,
    pub status: BinaryStatus,
    pub opened_at: Timestamp,
    pub settled_at: Option<Timestamp>,
    pub settle_price: Option<Price>,
    pub payout: Option<Decimal>,
}

impl BinaryPosition {
    pub fn stake_asset(&self) -> Asset {
        self.symbol.quote
    }

    pub fn label(&self) -> String {
        format!("binary {}", self.id.0)
    }

    pub fn reference(&self) -> String {
        format!("bin:{}", self.id.0)
    }

    pub fn is_due(&self, now: Timestamp) -> bool {
        self.status == BinaryStatus::Active && now >= self.expiry
    }

    /// Credit for a final status, truncated at the stake asset's precision.
    pub fn payout_for(&self, status: BinaryStatus) -> Decimal {
        match status {
            BinaryStatus::Won => self
                .stake_asset()
                .truncate(self.stake * (Decimal::ONE + self.payout_percent)),
            BinaryStatus::Refunded => self.stake,
            BinaryStatus::Lost | BinaryStatus::Active => Decimal::ZERO,
        }
    }
}
