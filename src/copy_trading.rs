// 6.0 copy_trading.rs: a follower's sub-balance that mirrors a trader's futures.
// the allocation sits in the copy pool. cash is the undeployed part; every mirror is a
// real futures position owned by the follower and funded from that cash. a mirror's
// payout is never negative, so the follower can lose at most the allocation.

use crate::types::{AccountId, Asset, CopyId, Leverage, PositionId, Timestamp};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CopyMode {
    /// Every mirror stakes this margin.
    FixedAmount(Decimal),
    /// Mirrors stake `trader margin × allocation / trader AUM`.
    Proportional,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CopySettings {
    pub mode: CopyMode,
    // fractions of the allocation, e.g. 0.2 = stop at −20%
    pub stop_loss_pct: Option<Decimal>,
    pub take_profit_pct: Option<Decimal>,
}

impl CopySettings {
    pub fn proportional() -> Self {
        Self {
            mode: CopyMode::Proportional,
            stop_loss_pct: None,
            take_profit_pct: None,
        }
    }

    pub fn fixed(margin: Decimal) -> Self {
        Self {
            mode: CopyMode::FixedAmount(margin),
            stop_loss_pct: None,
            take_profit_pct: None,
        }
    }

    pub fn with_stop_loss(mut self, pct: Decimal) -> Self {
        self.stop_loss_pct = Some(pct);
        self
    }

    pub fn with_take_profit(mut self, pct: Decimal) -> Self {
        self.take_profit_pct = Some(pct);
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        if let CopyMode::FixedAmount(margin) = self.mode {
            if margin <= Decimal::ZERO {
                return Err("fixed copy margin must be positive".to_string());
            }
        }
        if self.stop_loss_pct.is_some_and(|p| p <= Decimal::ZERO || p > Decimal::ONE) {
            return Err("stop-loss must be in (0, 1]".to_string());
        }
        if self.take_profit_pct.is_some_and(|p| p <= Decimal::ZERO) {
            return Err("take-profit must be positive".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CopyStatus {
    Active,
    /// Stopped by its own stop-loss or take-profit, or by running out of value.
    Stopped,
    /// Stopped by the follower.
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CopyStopReason {
    Follower,
    StopLoss,
    TakeProfit,
    Exhausted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CopyPosition {
    pub id: CopyId,
    pub follower: AccountId,
    pub trader: AccountId,
    pub allocated: Decimal,
    pub cash: Decimal,
    pub current_value: Decimal,
    pub settings: CopySettings,
    // trader position → follower mirror
    pub mirrors: BTreeMap<PositionId, PositionId>,
    pub status: CopyStatus,
    pub started_at: Timestamp,
    pub stopped_at: Option<Timestamp>,
    pub stop_reason: Option<CopyStopReason>,
    // set when the copy stops
    pub returned: Option<Decimal>,
    pub profit_share_paid: Option<Decimal>,
}

impl CopyPosition {
    pub fn label(&self) -> String {
        format!("copy {}", self.id.0)
    }

    pub fn reference(&self) -> String {
        format!("copy:{}", self.id.0)
    }

    pub fn is_active(&self) -> bool {
        self.status == CopyStatus::Active
    }

    /// `(value − allocated) / allocated`
    pub fn return_ratio(&self) -> Decimal {
        if self.allocated.is_zero() {
            return Decimal::ZERO;
        }
        (self.current_value - self.allocated) / self.allocated
    }

    /// Why this copy must stop at its current value, if it must.
    pub fn stop_trigger(&self) -> Option<CopyStopReason> {
        if self.current_value <= Decimal::ZERO {
            return Some(CopyStopReason::Exhausted);
        }
        let ratio = self.return_ratio();
        if self.settings.stop_loss_pct.is_some_and(|sl| ratio <= -sl) {
            return Some(CopyStopReason::StopLoss);
        }
        if self.settings.take_profit_pct.is_some_and(|tp| ratio >= tp) {
            return Some(CopyStopReason::TakeProfit);
        }
        None
    }
}

/// Margin for a new mirror before cash limits are applied.
pub fn target_margin(
    mode: CopyMode,
    trader_margin: Decimal,
    allocated: Decimal,
    trader_aum: Decimal,
) -> Decimal {
    match mode {
        CopyMode::FixedAmount(margin) => margin,
        CopyMode::Proportional => {
            if trader_aum <= Decimal::ZERO {
                Decimal::ZERO
            } else {
                trader_margin * allocated / trader_aum
            }
        }
    }
}

/// Largest margin `cash` can fund once the open fee (a fraction of notional) is added.
pub fn affordable_margin(cash: Decimal, leverage: Leverage, open_fee_fraction: Decimal) -> Decimal {
    cash / (Decimal::ONE + leverage.value() * open_fee_fraction)
}

/// Profit share owed to the trader on `returned` against `allocated`. Rounded up.
pub fn profit_share(asset: Asset, allocated: Decimal, returned: Decimal, share: Decimal) -> Decimal {
    let profit = returned - allocated;
    if profit <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    asset.round_up(profit * share).min(profit)
}
