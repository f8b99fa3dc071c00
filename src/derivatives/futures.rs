// 5.0 futures.rs: leveraged positions settled against the oracle price.
// margin goes into the margin pool at open; at close the margin is split between the
// payee, the fee sink and the treasury (which also pays out profit).

use super::liquidation::is_liquidatable;
use crate::engine::EngineError;
use crate::events::CloseReason;
use crate::types::{AccountId, Asset, CopyId, Leverage, PositionId, Price, Side, Symbol, Timestamp};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Optional exit triggers attached at open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Triggers {
    pub stop_loss: Option<Price>,
    pub take_profit: Option<Price>,
}

impl Triggers {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn with_stop_loss(mut self, price: Price) -> Self {
        self.stop_loss = Some(price);
        self
    }

    pub fn with_take_profit(mut self, price: Price) -> Self {
        self.take_profit = Some(price);
        self
    }

    /// Stop-loss must sit on the losing side of entry and take-profit on the winning side.
    pub fn validate(&self, side: Side, entry: Price) -> Result<(), EngineError> {
        let losing = |p: Price| match side {
            Side::Long => p < entry,
            Side::Short => p > entry,
        };
        if let Some(sl) = self.stop_loss {
            if !losing(sl) {
                return Err(EngineError::validation(format!("stop-loss {sl} is on the wrong side of entry for {side:?}")));
            }
        }
        if let Some(tp) = self.take_profit {
            if losing(tp) || tp == entry {
                return Err(EngineError::validation(format!(
                    "take-profit {tp} is not beyond entry for {side:?}"
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FuturePosition {
    pub id: PositionId,
    pub owner: AccountId,
    // pays the margin and receives the payout. the owner unless the copy allocator funds it
    pub funding_account: AccountId,
    pub symbol: Symbol,
    pub side: Side,
    pub leverage: Leverage,
    pub margin: Decimal,
    // base units
    pub amount: Decimal,
    pub entry_price: Price,
    pub liquidation_price: Price,
    pub triggers: Triggers,
    pub open: bool,
    pub opened_at: Timestamp,
    pub open_fee: Decimal,
    pub copy: Option<CopyId>,
    pub closed_at: Option<Timestamp>,
    pub exit_price: Option<Price>,
    pub realized_pnl: Option<Decimal>,
    pub payout: Option<Decimal>,
    pub close_reason: Option<CloseReason>,
}

impl FuturePosition {
    /// Margin is denominated in the quote asset.
    pub fn margin_asset(&self) -> Asset {
        self.symbol.quote
    }

    pub fn label(&self) -> String {
        format!("future {}", self.id.0)
    }

    pub fn reference(&self) -> String {
        format!("fut:{}", self.id.0)
    }

    /// `margin × leverage`, equal to `amount × entry` without the division error.
    pub fn entry_notional(&self) -> Decimal {
        self.margin * self.leverage.value()
    }

    pub fn unrealized_pnl(&self, mark: Price) -> Decimal {
        position_pnl(self.side, self.entry_price, mark, self.amount)
    }

    /// Margin plus unrealized pnl, floored at zero.
    pub fn equity(&self, mark: Price) -> Decimal {
        (self.margin + self.unrealized_pnl(mark)).max(Decimal::ZERO)
    }

    /// What the sweep should do at `mark`, and at which price. Liquidation wins over the
    /// user triggers and settles at the liquidation price itself.
    pub fn trigger(&self, mark: Price) -> Option<(CloseReason, Price)> {
        if !self.open {
            return None;
        }
        if is_liquidatable(self.side, self.liquidation_price, mark) {
            return Some((CloseReason::Liquidation, self.liquidation_price));
        }
        let (hit_stop, hit_take) = match self.side {
            Side::Long => (
                self.triggers.stop_loss.is_some_and(|sl| mark <= sl),
                self.triggers.take_profit.is_some_and(|tp| mark >= tp),
            ),
            Side::Short => (
                self.triggers.stop_loss.is_some_and(|sl| mark >= sl),
                self.triggers.take_profit.is_some_and(|tp| mark <= tp),
            ),
        };
        if hit_stop {
            Some((CloseReason::StopLoss, mark))
        } else if hit_take {
            Some((CloseReason::TakeProfit, mark))
        } else {
            None
        }
    }
}

/// `(exit − entry) × amount × sign(side)`
pub fn position_pnl(side: Side, entry: Price, exit: Price, amount: Decimal) -> Decimal {
    (exit.value() - entry.value()) * amount * side.sign()
}

/// Base amount controlled by `margin` at `leverage`.
pub fn position_amount(margin: Decimal, leverage: Leverage, entry: Price) -> Decimal {
    margin * leverage.value() / entry.value()
}
