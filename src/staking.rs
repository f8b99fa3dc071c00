//! Staking plans and positions.
//!
//! Rewards accrue linearly: `amount × apy × days / 365`, capped at maturity for fixed-term
//! plans. A position keeps the rewards persisted so far plus the start of the current
//! accrual segment; every mutating call closes the segment, so a principal change never
//! re-prices time already elapsed. Persisted rewards keep full precision and are only
//! truncated to the asset's precision when read or paid.

use crate::types::{AccountId, Asset, PlanId, StakeId, Timestamp};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

const DAYS_PER_YEAR: Decimal = dec!(365);

/// What a fixed-term plan does when the owner leaves before maturity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EarlyExit {
    Reject,
    /// Fraction of principal forfeited. Accrued rewards are forfeited too.
    Penalty(Decimal),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlanKind {
    Flexible,
    Fixed { duration_days: i64, early_exit: EarlyExit },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StakingPlan {
    pub id: PlanId,
    pub asset: Asset,
    pub apy: Decimal,
    pub kind: PlanKind,
    pub min_amount: Decimal,
}

impl StakingPlan {
    pub fn validate(&self) -> Result<(), String> {
        if self.apy < Decimal::ZERO || self.apy > Decimal::ONE {
            return Err(format!("plan {} apy must be in [0, 1]", self.id.0));
        }
        if self.min_amount <= Decimal::ZERO {
            return Err(format!("plan {} minimum must be positive", self.id.0));
        }
        if let PlanKind::Fixed {
            duration_days,
            early_exit,
        } = self.kind
        {
            if duration_days <= 0 {
                return Err(format!("plan {} duration must be positive", self.id.0));
            }
            if let EarlyExit::Penalty(rate) = early_exit {
                if rate <= Decimal::ZERO || rate >= Decimal::ONE {
                    return Err(format!("plan {} penalty must be in (0, 1)", self.id.0));
                }
            }
        }
        Ok(())
    }

    pub fn is_flexible(&self) -> bool {
        matches!(self.kind, PlanKind::Flexible)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StakeStatus {
    Active,
    /// Left through `unstake` (flexible, or fixed with an early exit).
    Unstaked,
    /// Matured fixed-term position paid out.
    Redeemed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StakingPosition {
    pub id: StakeId,
    pub owner: AccountId,
    pub plan_id: PlanId,
    pub asset: Asset,
    pub amount: Decimal,
    pub apy: Decimal,
    pub start_date: Timestamp,
    pub segment_start: Timestamp,
    pub accumulated_rewards: Decimal,
    pub maturity: Option<Timestamp>,
    pub early_exit: Option<EarlyExit>,
    pub status: StakeStatus,
    pub closed_at: Option<Timestamp>,
}

impl StakingPosition {
    pub fn open(id: StakeId, owner: AccountId, plan: &StakingPlan, amount: Decimal, now: Timestamp) -> Self {
        let (maturity, early_exit) = match plan.kind {
            PlanKind::Flexible => (None, None),
            PlanKind::Fixed {
                duration_days,
                early_exit,
            } => (Some(now.plus_days(duration_days)), Some(early_exit)),
        };
        Self {
            id,
            owner,
            plan_id: plan.id,
            asset: plan.asset,
            amount,
            apy: plan.apy,
            start_date: now,
            segment_start: now,
            accumulated_rewards: Decimal::ZERO,
            maturity,
            early_exit,
            status: StakeStatus::Active,
            closed_at: None,
        }
    }

    pub fn label(&self) -> String {
        format!("stake {}", self.id.0)
    }

    pub fn reference(&self) -> String {
        format!("stake:{}", self.id.0)
    }

    pub fn is_flexible(&self) -> bool {
        self.maturity.is_none()
    }

    pub fn is_matured(&self, now: Timestamp) -> bool {
        self.maturity.is_some_and(|m| now >= m)
    }

    // accrual stops at maturity
    fn accrual_end(&self, now: Timestamp) -> Timestamp {
        match self.maturity {
            Some(maturity) => now.min(maturity),
            None => now,
        }
    }

    /// Unrounded rewards of the open segment, not yet persisted.
    pub fn pending_rewards(&self, now: Timestamp) -> Decimal {
        if self.status != StakeStatus::Active {
            return Decimal::ZERO;
        }
        let days = self.segment_start.elapsed_days(&self.accrual_end(now));
        self.amount * self.apy * days / DAYS_PER_YEAR
    }

    /// Payable rewards at `now`, truncated at the asset's precision.
    pub fn rewards_at(&self, now: Timestamp) -> Decimal {
        self.asset.truncate(self.accumulated_rewards + self.pending_rewards(now))
    }

    /// Persists the open segment and starts a new one. Returns the payable total.
    pub fn accrue(&mut self, now: Timestamp) -> Decimal {
        self.accumulated_rewards += self.pending_rewards(now);
        let end = self.accrual_end(now);
        if end > self.segment_start {
            self.segment_start = end;
        }
        self.asset.truncate(self.accumulated_rewards)
    }

    pub fn close(&mut self, status: StakeStatus, now: Timestamp) {
        self.status = status;
        self.closed_at = Some(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flexible() -> StakingPlan {
        StakingPlan {
            id: PlanId(1),
            asset: Asset::Usdt,
            apy: dec!(0.0365),
            kind: PlanKind::Flexible,
            min_amount: dec!(1),
        }
    }

    fn fixed(days: i64) -> StakingPlan {
        StakingPlan {
            id: PlanId(2),
            asset: Asset::Usdt,
            apy: dec!(0.0365),
            kind: PlanKind::Fixed {
                duration_days: days,
                early_exit: EarlyExit::Reject,
            },
            min_amount: dec!(1),
        }
    }

    #[test]
    fn linear_rewards() {
        let start = Timestamp::from_millis(0);
        let pos = StakingPosition::open(StakeId(1), AccountId(1), &flexible(), dec!(1000), start);
        // 1000 × 0.0365 / 365 = 0.1 per day
        assert_eq!(pos.rewards_at(start.plus_days(1)), dec!(0.1));
        assert_eq!(pos.rewards_at(start.plus_days(10)), dec!(1));
        assert_eq!(pos.rewards_at(start), Decimal::ZERO);
    }

    #[test]
    fn fixed_rewards_cap_at_maturity() {
        let start = Timestamp::from_millis(0);
        let pos = StakingPosition::open(StakeId(1), AccountId(1), &fixed(30), dec!(1000), start);
        assert_eq!(pos.maturity, Some(start.plus_days(30)));
        assert_eq!(pos.rewards_at(start.plus_days(30)), dec!(3));
        assert_eq!(pos.rewards_at(start.plus_days(90)), dec!(3));
        assert!(pos.is_matured(start.plus_days(30)));
    }

    #[test]
    fn accrue_persists_without_changing_total() {
        let start = Timestamp::from_millis(0);
        let mut pos = StakingPosition::open(StakeId(1), AccountId(1), &flexible(), dec!(1000), start);
        let day5 = start.plus_days(5);
        let before = pos.rewards_at(day5);
        assert_eq!(pos.accrue(day5), before);
        assert_eq!(pos.rewards_at(day5), before);
        assert_eq!(pos.segment_start, day5);
        assert_eq!(pos.rewards_at(start.plus_days(6)), dec!(0.6));
    }

    #[test]
    fn rewards_truncate() {
        let start = Timestamp::from_millis(0);
        let pos = StakingPosition::open(StakeId(1), AccountId(1), &flexible(), dec!(1), start);
        // 1 × 0.0365 / 365 / 86400000 per ms: one ms earns nothing at 6 decimals
        assert_eq!(pos.rewards_at(start.plus_millis(1)), Decimal::ZERO);
    }

    #[test]
    fn hourly_accrual_keeps_sub_unit_rewards() {
        let plan = StakingPlan {
            id: PlanId(3),
            asset: Asset::Btc,
            apy: dec!(0.04),
            kind: PlanKind::Flexible,
            min_amount: dec!(0.001),
        };
        let start = Timestamp::from_millis(0);
        let mut hourly = StakingPosition::open(StakeId(1), AccountId(1), &plan, dec!(0.001), start);
        let idle = hourly.clone();

        // an hour earns ~4.6e-9 BTC, below one satoshi
        let mut now = start;
        for _ in 0..30 * 24 {
            now = now.plus_millis(60 * 60 * 1000);
            hourly.accrue(now);
        }

        assert_eq!(idle.rewards_at(now), dec!(0.00000328));
        assert!((hourly.rewards_at(now) - idle.rewards_at(now)).abs() <= Asset::Btc.unit());
        assert!(hourly.rewards_at(now) > Decimal::ZERO);
    }

    #[test]
    fn plan_validation() {
        assert!(flexible().validate().is_ok());
        assert!(fixed(0).validate().is_err());
        let mut bad = fixed(10);
        bad.kind = PlanKind::Fixed {
            duration_days: 10,
            early_exit: EarlyExit::Penalty(dec!(1.5)),
        };
        assert!(bad.validate().is_err());
    }
}
