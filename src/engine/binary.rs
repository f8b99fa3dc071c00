// 8.4 engine/binary.rs: binary options. the stake sits in the options pool until expiry.

use super::core::Platform;
use super::results::{EngineError, SweepReport};
use crate::derivatives::{outcome, BinaryPosition, BinaryStatus, OptionDirection};
use crate::events::{BinaryOpenedEvent, BinarySettledEvent, EventPayload};
use crate::ledger::{Journal, SystemAccount, TxKind};
use crate::scheduler::SweepJob;
use crate::types::{AccountId, PositionId, Price, Symbol, Timestamp};
use rust_decimal::Decimal;
use tracing::info;

#[derive(Debug, Clone, Copy)]
pub struct BinaryOrder {
    pub symbol: Symbol,
    pub direction: OptionDirection,
    pub stake: Decimal,
    /// Defaults to the current price.
    pub strike: Option<Price>,
    pub expiry: Timestamp,
}

impl Platform {
    pub fn open_binary(&self, account_id: AccountId, order: BinaryOrder) -> Result<PositionId, EngineError> {
        self.require_account(account_id)?;
        let cfg = &self.config.binary;
        let asset = order.symbol.quote;
        let now = self.now();

        if order.stake < cfg.min_stake || order.stake > cfg.max_stake {
            return Err(EngineError::validation(format!(
                "stake {} outside {}..={}",
                order.stake, cfg.min_stake, cfg.max_stake
            )));
        }
        if !asset.fits_precision(order.stake) {
            return Err(EngineError::validation(format!("{} exceeds {asset} precision", order.stake)));
        }
        let duration = now.millis_until(&order.expiry);
        if duration < cfg.min_duration_ms || duration > cfg.max_duration_ms {
            return Err(EngineError::validation(format!(
                "expiry must be {}ms to {}ms away, got {duration}ms",
                cfg.min_duration_ms, cfg.max_duration_ms
            )));
        }

        let current = self.fresh_price(order.symbol, cfg.max_price_age_ms)?.price;
        let strike = order.strike.unwrap_or(current);

        let id = PositionId(self.binaries.next_id());
        let position = BinaryPosition {
            id,
            owner: account_id,
            symbol: order.symbol,
            direction: order.direction,
            stake: order.stake,
            strike,
            expiry: order.expiry,
            payout_percent: cfg.payout_percent,
            status: BinaryStatus::Active,
            opened_at: now,
            settled_at: None,
            settle_price: None,
            payout: None,
        };
        self.ledger.transfer(
            account_id,
            SystemAccount::OptionsPool.id(),
            asset,
            order.stake,
            TxKind::BinaryOpen,
            position.reference(),
        )?;
        self.binaries.insert(id, position);

        info!(position = id.0, owner = %account_id, direction = ?order.direction, stake = %order.stake, %strike, "binary opened");
        self.emit(EventPayload::BinaryOpened(BinaryOpenedEvent {
            position_id: id,
            account_id,
            symbol: order.symbol,
            direction: order.direction,
            stake: order.stake,
            strike,
            expiry: order.expiry,
        }));
        Ok(id)
    }

    /// Settles an expired option from the price in effect at expiry. Runs once per position.
    pub fn settle_binary(&self, id: PositionId) -> Result<BinaryStatus, EngineError> {
        let snapshot = self.binaries.get(id)?;
        if snapshot.status != BinaryStatus::Active {
            return Err(EngineError::AlreadySettled(snapshot.label()));
        }
        let now = self.now();
        if now < snapshot.expiry {
            return Err(EngineError::conflict(snapshot.label(), snapshot.status, "settle before expiry"));
        }
        let settle_price = self.oracle.get_price_at(snapshot.symbol, snapshot.expiry)?;

        self.binaries.with(id, |position| {
            // another caller may have settled it since the snapshot
            if position.status != BinaryStatus::Active {
                return Err(EngineError::AlreadySettled(position.label()));
            }
            let status = outcome(position.direction, position.strike, settle_price, self.config.binary.tie_policy);
            let payout = position.payout_for(status);

            let asset = position.stake_asset();
            let pool = SystemAccount::OptionsPool.id();
            let treasury = SystemAccount::Treasury.id();
            let journal = Journal::new(TxKind::BinarySettle, position.reference());
            let journal = match status {
                BinaryStatus::Won => journal
                    .transfer(pool, position.owner, asset, position.stake)
                    .transfer_nonzero(treasury, position.owner, asset, payout - position.stake),
                BinaryStatus::Refunded => journal.transfer(pool, position.owner, asset, position.stake),
                BinaryStatus::Lost | BinaryStatus::Active => journal.transfer(pool, treasury, asset, position.stake),
            };
            self.ledger.commit(journal)?;

            position.status = status;
            position.settled_at = Some(now);
            position.settle_price = Some(settle_price);
            position.payout = Some(payout);

            info!(position = id.0, ?status, price = %settle_price, %payout, "binary settled");
            self.emit(EventPayload::BinarySettled(BinarySettledEvent {
                position_id: id,
                account_id: position.owner,
                status,
                settle_price,
                payout,
            }));
            Ok(status)
        })
    }

    pub fn binaries_for(&self, account_id: AccountId) -> Vec<BinaryPosition> {
        self.binaries.filter(|b| b.owner == account_id)
    }

    pub(super) fn sweep_binaries(&self) -> SweepReport {
        let now = self.now();
        let mut report = SweepReport::new(SweepJob::BinarySettlement, now);
        for position in self.binaries.filter(|b| b.is_due(now)) {
            report.examined += 1;
            match self.settle_binary(position.id) {
                Ok(_) => report.transitioned += 1,
                // settled by a direct call in between
                Err(EngineError::AlreadySettled(_)) => {}
                Err(err) => report.skip(position.label(), err),
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::config::PlatformConfig;
    use crate::directory::InMemoryDirectory;
    use crate::ledger::Tier;
    use crate::oracle::InMemoryOracle;
    use crate::types::Asset;
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    const USER: AccountId = AccountId(1);

    struct Fixture {
        platform: Platform,
        oracle: Arc<InMemoryOracle>,
        clock: Arc<ManualClock>,
    }

    fn fixture() -> Fixture {
        let directory = InMemoryDirectory::new();
        directory.register(USER);
        let oracle = Arc::new(InMemoryOracle::new());
        let clock = Arc::new(ManualClock::new(Timestamp::from_millis(0)));
        let platform = Platform::new(PlatformConfig::default(), oracle.clone(), Arc::new(directory), clock.clone()).unwrap();
        platform.open_account(USER, Tier::Standard).unwrap();
        platform.deposit(USER, Asset::Usdt, dec!(100)).unwrap();
        oracle.set_price(Symbol::eth_usdt(), Price::new_unchecked(dec!(3000)), clock.now());
        Fixture { platform, oracle, clock }
    }

    fn call(f: &Fixture, stake: Decimal) -> PositionId {
        f.platform
            .open_binary(
                USER,
                BinaryOrder {
                    symbol: Symbol::eth_usdt(),
                    direction: OptionDirection::Call,
                    stake,
                    strike: Some(Price::new_unchecked(dec!(3000))),
                    expiry: f.clock.now().plus_millis(300_000),
                },
            )
            .unwrap()
    }

    #[test]
    fn winning_call_settles_once() {
        let f = fixture();
        let id = call(&f, dec!(50));
        assert_eq!(f.platform.balance(USER, Asset::Usdt).unwrap(), dec!(50));

        f.clock.advance(300_000);
        f.oracle
            .set_price(Symbol::eth_usdt(), Price::new_unchecked(dec!(3100)), f.clock.now());
        assert_eq!(f.platform.run_sweep(SweepJob::BinarySettlement).transitioned, 1);
        assert_eq!(f.platform.balance(USER, Asset::Usdt).unwrap(), dec!(142.5));

        assert_eq!(f.platform.run_sweep(SweepJob::BinarySettlement).transitioned, 0);
        assert!(matches!(f.platform.settle_binary(id), Err(EngineError::AlreadySettled(_))));
        assert_eq!(f.platform.balance(USER, Asset::Usdt).unwrap(), dec!(142.5));
    }

    #[test]
    fn losing_stake_goes_to_treasury() {
        let f = fixture();
        let id = call(&f, dec!(40));
        f.clock.advance(300_000);
        f.oracle
            .set_price(Symbol::eth_usdt(), Price::new_unchecked(dec!(2999)), f.clock.now());

        assert_eq!(f.platform.settle_binary(id).unwrap(), BinaryStatus::Lost);
        assert_eq!(
            f.platform.balance(SystemAccount::Treasury.id(), Asset::Usdt).unwrap(),
            dec!(40)
        );
        assert_eq!(
            f.platform.balance(SystemAccount::OptionsPool.id(), Asset::Usdt).unwrap(),
            Decimal::ZERO
        );
    }

    #[test]
    fn settles_from_price_at_expiry() {
        let f = fixture();
        let id = call(&f, dec!(10));
        f.clock.advance(300_000);
        f.oracle
            .set_price(Symbol::eth_usdt(), Price::new_unchecked(dec!(3050)), f.clock.now());
        // later moves do not matter
        f.clock.advance(30_000);
        f.oracle
            .set_price(Symbol::eth_usdt(), Price::new_unchecked(dec!(2000)), f.clock.now());

        assert_eq!(f.platform.settle_binary(id).unwrap(), BinaryStatus::Won);
        assert_eq!(f.platform.binary(id).unwrap().settle_price, Some(Price::new_unchecked(dec!(3050))));
    }

    #[test]
    fn not_before_expiry() {
        let f = fixture();
        let id = call(&f, dec!(10));
        assert!(matches!(f.platform.settle_binary(id), Err(EngineError::StateConflict { .. })));
        assert_eq!(f.platform.run_sweep(SweepJob::BinarySettlement).examined, 0);
    }

    #[test]
    fn open_validation() {
        let f = fixture();
        let order = BinaryOrder {
            symbol: Symbol::eth_usdt(),
            direction: OptionDirection::Put,
            stake: dec!(10),
            strike: None,
            expiry: f.clock.now().plus_millis(1_000),
        };
        assert!(matches!(f.platform.open_binary(USER, order), Err(EngineError::Validation(_))));

        let big = BinaryOrder {
            stake: dec!(200),
            expiry: f.clock.now().plus_millis(120_000),
            ..order
        };
        assert!(matches!(
            f.platform.open_binary(USER, big),
            Err(EngineError::InsufficientBalance { .. })
        ));

        let ok = BinaryOrder {
            expiry: f.clock.now().plus_millis(120_000),
            ..order
        };
        let id = f.platform.open_binary(USER, ok).unwrap();
        assert_eq!(f.platform.binary(id).unwrap().strike, Price::new_unchecked(dec!(3000)));
    }
}
