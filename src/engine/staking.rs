//! Staking positions against the staking pool.
//!
//! Principal sits in the staking pool while a position is active. Rewards are paid by the
//! treasury in the same journal that returns the principal, so a payout either lands whole
//! or not at all.

use super::core::Platform;
use super::results::{EngineError, StakePayout, SweepReport};
use crate::events::{EventPayload, StakeClosedEvent, StakeOpenedEvent};
use crate::ledger::{Journal, SystemAccount, TxKind};
use crate::scheduler::SweepJob;
use crate::staking::{EarlyExit, StakeStatus, StakingPosition};
use crate::types::{AccountId, PlanId, StakeId, Timestamp};
use rust_decimal::Decimal;
use tracing::{debug, info};

impl Platform {
    pub fn stake(&self, account_id: AccountId, plan_id: PlanId, amount: Decimal) -> Result<StakeId, EngineError> {
        self.require_account(account_id)?;
        let plan = self
            .config
            .plan(plan_id)
            .ok_or_else(|| EngineError::NotFound(format!("staking plan {}", plan_id.0)))?;
        if amount < plan.min_amount {
            return Err(EngineError::validation(format!(
                "stake {amount} below plan minimum {}",
                plan.min_amount
            )));
        }
        if !plan.asset.fits_precision(amount) {
            return Err(EngineError::validation(format!("{amount} exceeds {} precision", plan.asset)));
        }

        let id = StakeId(self.stakes.next_id());
        let position = StakingPosition::open(id, account_id, plan, amount, self.now());
        self.ledger.transfer(
            account_id,
            SystemAccount::StakingPool.id(),
            plan.asset,
            amount,
            TxKind::Stake,
            position.reference(),
        )?;
        self.stakes.insert(id, position);

        info!(stake = id.0, owner = %account_id, plan = plan_id.0, %amount, "stake opened");
        self.emit(EventPayload::StakeOpened(StakeOpenedEvent {
            stake_id: id,
            account_id,
            plan_id,
            asset: plan.asset,
            amount,
        }));
        Ok(id)
    }

    /// Adds principal to a flexible position. Rewards up to now keep the old principal.
    pub fn top_up(&self, stake_id: StakeId, account_id: AccountId, amount: Decimal) -> Result<(), EngineError> {
        let now = self.now();
        self.stakes.with(stake_id, |position| {
            Self::check_owner(position, account_id, "top up this stake")?;
            if !position.is_flexible() {
                return Err(EngineError::conflict_in(position.label(), "fixed-term", "top up"));
            }
            if amount <= Decimal::ZERO || !position.asset.fits_precision(amount) {
                return Err(EngineError::validation(format!("invalid top-up amount {amount}")));
            }
            self.ledger.transfer(
                account_id,
                SystemAccount::StakingPool.id(),
                position.asset,
                amount,
                TxKind::Stake,
                position.reference(),
            )?;
            position.accrue(now);
            position.amount += amount;
            Ok(())
        })?;
        info!(stake = stake_id.0, %amount, "stake topped up");
        Ok(())
    }

    /// Rewards earned so far, persisted or not.
    pub fn rewards(&self, stake_id: StakeId) -> Result<Decimal, EngineError> {
        let now = self.now();
        Ok(self.stakes.get(stake_id)?.rewards_at(now))
    }

    /// Persists the rewards earned so far. Returns the total.
    pub fn accrue(&self, stake_id: StakeId) -> Result<Decimal, EngineError> {
        let now = self.now();
        self.stakes.with(stake_id, |position| {
            if position.status != StakeStatus::Active {
                return Err(EngineError::conflict(position.label(), position.status, "accrue"));
            }
            Ok(position.accrue(now))
        })
    }

    /// Leaves a position. Fixed-term positions before maturity follow their plan's early
    /// exit rule; a matured one is redeemed.
    pub fn unstake(&self, stake_id: StakeId, account_id: AccountId) -> Result<StakePayout, EngineError> {
        let now = self.now();
        self.stakes.with(stake_id, |position| {
            Self::check_owner(position, account_id, "unstake")?;
            if position.is_flexible() {
                return self.pay_out(position, now, StakeStatus::Unstaked, None);
            }
            if position.is_matured(now) {
                return self.pay_out(position, now, StakeStatus::Redeemed, None);
            }
            match position.early_exit {
                Some(EarlyExit::Penalty(rate)) => self.pay_out(position, now, StakeStatus::Unstaked, Some(rate)),
                Some(EarlyExit::Reject) | None => Err(EngineError::EarlyExitNotAllowed {
                    maturity: position.maturity.unwrap_or(now),
                }),
            }
        })
    }

    /// Pays out a matured fixed-term position.
    pub fn redeem(&self, stake_id: StakeId, account_id: AccountId) -> Result<StakePayout, EngineError> {
        let now = self.now();
        self.stakes.with(stake_id, |position| {
            Self::check_owner(position, account_id, "redeem")?;
            self.redeem_matured(position, now)
        })
    }

    pub fn stakes_for(&self, account_id: AccountId) -> Vec<StakingPosition> {
        self.stakes.filter(|s| s.owner == account_id)
    }

    /// Persists rewards on every active position and redeems matured ones.
    pub(super) fn sweep_staking(&self) -> SweepReport {
        let now = self.now();
        let auto_redeem = self.config.staking.auto_redeem;
        let mut report = SweepReport::new(SweepJob::StakingRewards, now);

        for position in self.stakes.filter(|s| s.status == StakeStatus::Active) {
            report.examined += 1;
            let result = self.stakes.with(position.id, |position| {
                if position.status != StakeStatus::Active {
                    return Ok(());
                }
                if auto_redeem && position.is_matured(now) {
                    self.redeem_matured(position, now)?;
                } else {
                    let total = position.accrue(now);
                    debug!(stake = position.id.0, rewards = %total, "rewards accrued");
                }
                Ok(())
            });
            match result {
                Ok(()) => report.transitioned += 1,
                Err(err) => report.skip(position.label(), err),
            }
        }
        report
    }

    fn redeem_matured(&self, position: &mut StakingPosition, now: Timestamp) -> Result<StakePayout, EngineError> {
        if position.is_flexible() {
            return Err(EngineError::conflict_in(position.label(), "flexible", "redeem"));
        }
        if !position.is_matured(now) {
            return Err(EngineError::EarlyExitNotAllowed {
                maturity: position.maturity.unwrap_or(now),
            });
        }
        self.pay_out(position, now, StakeStatus::Redeemed, None)
    }

    fn check_owner(position: &StakingPosition, account_id: AccountId, action: &'static str) -> Result<(), EngineError> {
        if position.owner != account_id {
            return Err(EngineError::Unauthorized {
                account: account_id,
                action,
            });
        }
        if position.status != StakeStatus::Active {
            return Err(EngineError::conflict(position.label(), position.status, action));
        }
        Ok(())
    }

    // a penalty forfeits the rewards along with its cut of the principal
    fn pay_out(
        &self,
        position: &mut StakingPosition,
        now: Timestamp,
        status: StakeStatus,
        penalty_rate: Option<Decimal>,
    ) -> Result<StakePayout, EngineError> {
        let asset = position.asset;
        let (penalty, rewards) = match penalty_rate {
            Some(rate) => (asset.round_up(position.amount * rate).min(position.amount), Decimal::ZERO),
            None => (Decimal::ZERO, position.rewards_at(now)),
        };
        let principal = position.amount - penalty;

        let pool = SystemAccount::StakingPool.id();
        let journal = Journal::new(TxKind::Unstake, position.reference())
            .transfer_nonzero(pool, position.owner, asset, principal)
            .transfer_as(TxKind::Fee, pool, SystemAccount::FeeSink.id(), asset, penalty)
            .transfer_as(TxKind::Reward, SystemAccount::Treasury.id(), position.owner, asset, rewards);
        self.ledger.commit(journal)?;

        if penalty_rate.is_none() {
            position.accrue(now);
        }
        position.close(status, now);

        info!(stake = position.id.0, ?status, %principal, %rewards, %penalty, "stake closed");
        self.emit(EventPayload::StakeClosed(StakeClosedEvent {
            stake_id: position.id,
            account_id: position.owner,
            principal,
            rewards,
            penalty,
        }));
        Ok(StakePayout {
            stake_id: position.id,
            asset,
            principal,
            rewards,
            penalty,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::PlatformConfig;
    use crate::directory::InMemoryDirectory;
    use crate::ledger::Tier;
    use crate::oracle::InMemoryOracle;
    use crate::types::Asset;
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    const USER: AccountId = AccountId(1);
    const FLEXIBLE_USDT: PlanId = PlanId(1);
    const FIXED_USDT: PlanId = PlanId(2);
    const FIXED_BTC: PlanId = PlanId(3);

    fn fixture() -> (Platform, Arc<ManualClock>) {
        let directory = InMemoryDirectory::new();
        directory.register(USER);
        let clock = Arc::new(ManualClock::new(Timestamp::from_millis(0)));
        let platform = Platform::new(
            PlatformConfig::default(),
            Arc::new(InMemoryOracle::new()),
            Arc::new(directory),
            clock.clone(),
        )
        .unwrap();
        platform.open_account(USER, Tier::Standard).unwrap();
        platform.deposit(USER, Asset::Usdt, dec!(10000)).unwrap();
        platform.deposit(USER, Asset::Btc, dec!(1)).unwrap();
        (platform, clock)
    }

    #[test]
    fn flexible_unstake_pays_rewards() {
        let (platform, clock) = fixture();
        let id = platform.stake(USER, FLEXIBLE_USDT, dec!(7300)).unwrap();
        assert_eq!(platform.balance(USER, Asset::Usdt).unwrap(), dec!(2700));

        // 7300 × 5% / 365 = 1 per day
        clock.advance_days(10);
        assert_eq!(platform.rewards(id).unwrap(), dec!(10));

        let payout = platform.unstake(id, USER).unwrap();
        assert_eq!(payout.principal, dec!(7300));
        assert_eq!(payout.rewards, dec!(10));
        assert_eq!(platform.balance(USER, Asset::Usdt).unwrap(), dec!(10010));

        let reward_txs = platform
            .ledger()
            .transactions_for(USER)
            .unwrap()
            .into_iter()
            .filter(|tx| tx.kind == TxKind::Reward)
            .count();
        assert_eq!(reward_txs, 1);
        assert!(matches!(platform.unstake(id, USER), Err(EngineError::StateConflict { .. })));
    }

    #[test]
    fn top_up_keeps_earlier_rewards() {
        let (platform, clock) = fixture();
        let id = platform.stake(USER, FLEXIBLE_USDT, dec!(3650)).unwrap();
        clock.advance_days(2);
        platform.top_up(id, USER, dec!(3650)).unwrap();
        clock.advance_days(1);
        // 2 days at 0.5/day, then 1 day at 1/day
        assert_eq!(platform.rewards(id).unwrap(), dec!(2));
    }

    #[test]
    fn early_exit_penalty_forfeits_rewards() {
        let (platform, clock) = fixture();
        let id = platform.stake(USER, FIXED_USDT, dec!(1000)).unwrap();
        clock.advance_days(10);
        assert!(platform.rewards(id).unwrap() > Decimal::ZERO);

        let payout = platform.unstake(id, USER).unwrap();
        assert_eq!(payout.penalty, dec!(20));
        assert_eq!(payout.principal, dec!(980));
        assert_eq!(payout.rewards, Decimal::ZERO);
        assert_eq!(platform.balance(USER, Asset::Usdt).unwrap(), dec!(9980));
        assert_eq!(
            platform.balance(SystemAccount::FeeSink.id(), Asset::Usdt).unwrap(),
            dec!(20)
        );
    }

    #[test]
    fn reject_plan_blocks_early_exit() {
        let (platform, clock) = fixture();
        let id = platform.stake(USER, FIXED_BTC, dec!(0.5)).unwrap();
        clock.advance_days(30);
        assert!(matches!(
            platform.unstake(id, USER),
            Err(EngineError::EarlyExitNotAllowed { .. })
        ));
        assert!(matches!(
            platform.redeem(id, USER),
            Err(EngineError::EarlyExitNotAllowed { .. })
        ));
        assert!(matches!(
            platform.top_up(id, USER, dec!(0.1)),
            Err(EngineError::StateConflict { .. })
        ));
    }

    #[test]
    fn matured_positions_redeem_with_capped_rewards() {
        let (platform, clock) = fixture();
        let id = platform.stake(USER, FIXED_BTC, dec!(0.5)).unwrap();
        clock.advance_days(120);

        let payout = platform.redeem(id, USER).unwrap();
        // 0.5 × 4% × 90 / 365
        assert_eq!(payout.rewards, dec!(0.00493150));
        assert_eq!(platform.stake_position(id).unwrap().status, StakeStatus::Redeemed);
    }

    #[test]
    fn hourly_sweeps_keep_sub_satoshi_rewards() {
        let (platform, clock) = fixture();
        let id = platform.stake(USER, FIXED_BTC, dec!(0.001)).unwrap();

        for _ in 0..30 * 24 {
            clock.advance(60 * 60 * 1000);
            platform.run_sweep(SweepJob::StakingRewards);
        }

        // 0.001 × 4% × 30 / 365
        let rewards = platform.rewards(id).unwrap();
        assert!((rewards - dec!(0.00000328)).abs() <= Asset::Btc.unit());

        clock.advance_days(60);
        let payout = platform.redeem(id, USER).unwrap();
        assert_eq!(payout.rewards, dec!(0.00000986));
        assert!(Asset::Btc.fits_precision(payout.rewards));
    }

    #[test]
    fn flexible_cannot_be_redeemed() {
        let (platform, _) = fixture();
        let id = platform.stake(USER, FLEXIBLE_USDT, dec!(100)).unwrap();
        assert!(matches!(platform.redeem(id, USER), Err(EngineError::StateConflict { .. })));
    }

    #[test]
    fn sweep_accrues_and_auto_redeems() {
        let (platform, clock) = fixture();
        let flexible = platform.stake(USER, FLEXIBLE_USDT, dec!(730)).unwrap();
        let fixed = platform.stake(USER, FIXED_USDT, dec!(1000)).unwrap();

        clock.advance_days(5);
        platform.run_sweep(SweepJob::StakingRewards);
        assert_eq!(platform.stake_position(flexible).unwrap().accumulated_rewards, dec!(0.5));

        clock.advance_days(30);
        let report = platform.run_sweep(SweepJob::StakingRewards);
        assert!(report.is_clean());
        assert_eq!(platform.stake_position(fixed).unwrap().status, StakeStatus::Redeemed);
        assert_eq!(platform.stake_position(flexible).unwrap().status, StakeStatus::Active);
    }

    #[test]
    fn below_minimum_and_unknown_plan() {
        let (platform, _) = fixture();
        assert!(matches!(platform.stake(USER, FIXED_USDT, dec!(50)), Err(EngineError::Validation(_))));
        assert!(matches!(platform.stake(USER, PlanId(99), dec!(50)), Err(EngineError::NotFound(_))));
    }
}
