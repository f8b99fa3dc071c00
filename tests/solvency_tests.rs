//! Solvency invariant tests.
//!
//! Whatever mix of products runs through the platform, every asset's total supply across
//! all accounts (system accounts included) equals deposits minus withdrawals, and the
//! ledger replays cleanly.

use proptest::prelude::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use settle_core::copy_trading::{CopySettings, CopyStatus};
use settle_core::derivatives::OptionDirection;
use settle_core::p2p::{EscrowStatus, OfferSide};
use settle_core::scheduler::SweepJob;
use settle_core::*;
use std::sync::Arc;

struct Fixture {
    platform: Platform,
    oracle: Arc<InMemoryOracle>,
    clock: Arc<ManualClock>,
    directory: Arc<InMemoryDirectory>,
}

impl Fixture {
    fn new() -> Self {
        let oracle = Arc::new(InMemoryOracle::new());
        let clock = Arc::new(ManualClock::new(Timestamp::from_millis(1_000_000)));
        let directory = Arc::new(InMemoryDirectory::new());
        let platform =
            Platform::new(PlatformConfig::default(), oracle.clone(), directory.clone(), clock.clone()).unwrap();
        Self {
            platform,
            oracle,
            clock,
            directory,
        }
    }

    fn user(&self, id: u64, usdt: Decimal) -> AccountId {
        let account = AccountId(id);
        self.directory.register(account);
        self.platform.open_account(account, Tier::Standard).unwrap();
        if usdt > Decimal::ZERO {
            self.platform.deposit(account, Asset::Usdt, usdt).unwrap();
        }
        account
    }

    fn btc(&self, value: Decimal) {
        self.oracle
            .set_price(Symbol::btc_usdt(), Price::new_unchecked(value), self.clock.now());
    }

    fn assert_solvent(&self) {
        let ledger = self.platform.ledger();
        for asset in [Asset::Usdt, Asset::Btc, Asset::Eth] {
            assert_eq!(
                ledger.total_supply(asset).unwrap(),
                ledger.net_external(asset).unwrap(),
                "{asset} supply drifted from deposits minus withdrawals"
            );
            assert_eq!(ledger.internal_delta(asset).unwrap(), Decimal::ZERO);
        }
        ledger.audit().unwrap();
    }
}

#[test]
fn mixed_products_conserve_supply() {
    let f = Fixture::new();
    let alice = f.user(1, dec!(10000));
    let bob = f.user(2, dec!(5000));
    f.btc(dec!(50000));

    // swap both ways
    let quote = f.platform.quote(Asset::Usdt, Asset::Btc).unwrap();
    f.platform.convert(alice, Asset::Usdt, dec!(1000), Asset::Btc, &quote).unwrap();
    let quote = f.platform.quote(Asset::Btc, Asset::Usdt).unwrap();
    f.platform.convert(alice, Asset::Btc, dec!(0.005), Asset::Usdt, &quote).unwrap();

    // a winning long and a losing short
    let lev = Leverage::new(dec!(10)).unwrap();
    let long = f
        .platform
        .open_future(alice, FutureOrder::new(Symbol::btc_usdt(), Side::Long, lev, dec!(500)))
        .unwrap();
    let short = f
        .platform
        .open_future(bob, FutureOrder::new(Symbol::btc_usdt(), Side::Short, lev, dec!(300)))
        .unwrap();
    f.btc(dec!(51000));
    f.platform.close_future(long, alice).unwrap();
    f.platform.close_future(short, bob).unwrap();

    // a binary option settled by the sweep
    let expiry = f.clock.now().plus_millis(120_000);
    f.platform
        .open_binary(
            bob,
            BinaryOrder {
                symbol: Symbol::btc_usdt(),
                direction: OptionDirection::Put,
                stake: dec!(100),
                strike: None,
                expiry,
            },
        )
        .unwrap();

    // flexible staking
    let stake = f.platform.stake(alice, PlanId(1), dec!(2000)).unwrap();

    f.clock.set(expiry);
    f.btc(dec!(49000));
    f.platform.tick();

    f.clock.advance_days(10);
    f.btc(dec!(49000));
    f.platform.tick();
    f.platform.unstake(stake, alice).unwrap();

    f.platform.withdraw(bob, Asset::Usdt, dec!(100)).unwrap();
    f.assert_solvent();
}

#[test]
fn escrow_hold_cannot_be_spent_twice() {
    let f = Fixture::new();
    let seller = f.user(1, Decimal::ZERO);
    let buyer = f.user(2, Decimal::ZERO);
    let other = f.user(3, Decimal::ZERO);
    f.platform.deposit(seller, Asset::Btc, dec!(0.01)).unwrap();

    let offer = f
        .platform
        .create_offer(
            seller,
            OfferTerms {
                side: OfferSide::Sell,
                asset: Asset::Btc,
                fiat_currency: "USD".to_string(),
                price: dec!(50000),
                amount: dec!(0.02),
                min_amount: dec!(0.001),
                max_amount: dec!(0.01),
            },
        )
        .unwrap();

    let first = f.platform.open_order(offer, buyer, dec!(0.008)).unwrap();
    let second = f.platform.open_order(offer, other, dec!(0.008));
    assert!(matches!(second, Err(EngineError::InsufficientBalance { .. })));

    // the held amount cannot be withdrawn either
    let withdraw = f.platform.withdraw(seller, Asset::Btc, dec!(0.005));
    assert!(withdraw.is_err());

    f.platform.mark_paid(first, buyer).unwrap();
    f.platform.release(first, seller).unwrap();
    assert!(f.platform.release(first, seller).is_err());

    assert_eq!(f.platform.balance(buyer, Asset::Btc).unwrap(), dec!(0.008));
    assert_eq!(f.platform.balance(seller, Asset::Btc).unwrap(), dec!(0.002));
    f.assert_solvent();
}

#[test]
fn unpaid_order_times_out_and_refunds_seller() {
    let f = Fixture::new();
    let seller = f.user(1, Decimal::ZERO);
    let buyer = f.user(2, Decimal::ZERO);
    f.platform.deposit(seller, Asset::Btc, dec!(0.01)).unwrap();

    let offer = f
        .platform
        .create_offer(
            seller,
            OfferTerms {
                side: OfferSide::Sell,
                asset: Asset::Btc,
                fiat_currency: "EUR".to_string(),
                price: dec!(46000),
                amount: dec!(0.01),
                min_amount: dec!(0.001),
                max_amount: dec!(0.01),
            },
        )
        .unwrap();
    let order = f.platform.open_order(offer, buyer, dec!(0.01)).unwrap();

    f.clock.advance(f.platform.config().p2p.payment_window_ms + 1);
    let report = f.platform.run_sweep(SweepJob::EscrowTimeouts);
    assert_eq!(report.transitioned, 1);

    assert_eq!(f.platform.order(order).unwrap().status, EscrowStatus::Cancelled);
    assert_eq!(f.platform.balance(seller, Asset::Btc).unwrap(), dec!(0.01));
    assert_eq!(
        f.platform.ledger().held(seller, HoldId::from(order), Asset::Btc).unwrap(),
        Decimal::ZERO
    );
    assert!(matches!(f.platform.mark_paid(order, buyer), Err(EngineError::StateConflict { .. })));
    f.assert_solvent();
}

#[test]
fn copy_loss_is_capped_at_allocation() {
    let f = Fixture::new();
    let trader = f.user(1, dec!(10000));
    let follower = f.user(2, dec!(1000));
    f.btc(dec!(50000));

    let copy = f
        .platform
        .allocate(follower, trader, dec!(1000), CopySettings::proportional())
        .unwrap();
    let lev = Leverage::new(dec!(20)).unwrap();
    f.platform
        .open_future(trader, FutureOrder::new(Symbol::btc_usdt(), Side::Long, lev, dec!(5000)))
        .unwrap();
    assert_eq!(f.platform.copy_position(copy).unwrap().mirrors.len(), 1);

    // far through both liquidation prices
    f.btc(dec!(40000));
    f.platform.run_sweep(SweepJob::Liquidations);
    f.platform.run_sweep(SweepJob::CopyTrading);

    let stopped = f.platform.stop_copying(copy, follower).unwrap();
    assert_eq!(stopped.status, CopyStatus::Closed);
    let returned = stopped.returned.unwrap();
    assert!(returned >= Decimal::ZERO);
    assert!(returned < dec!(1000));
    assert_eq!(stopped.profit_share_paid, Some(Decimal::ZERO));
    assert_eq!(f.platform.balance(follower, Asset::Usdt).unwrap(), returned);
    f.assert_solvent();
}

#[test]
fn treasury_funds_winning_trades() {
    let f = Fixture::new();
    let trader = f.user(1, dec!(1000));
    f.btc(dec!(50000));

    let lev = Leverage::new(dec!(10)).unwrap();
    let id = f
        .platform
        .open_future(trader, FutureOrder::new(Symbol::btc_usdt(), Side::Long, lev, dec!(100)))
        .unwrap();
    f.btc(dec!(60000));
    let settlement = f.platform.close_future(id, trader).unwrap();
    assert!(settlement.house < Decimal::ZERO);

    let treasury = f
        .platform
        .ledger()
        .available(SystemAccount::Treasury.id(), Asset::Usdt)
        .unwrap();
    assert!(treasury < Decimal::ZERO);
    f.assert_solvent();
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Random price paths through futures, liquidations and binaries never leak supply.
    #[test]
    fn random_price_paths_stay_solvent(
        leverages in proptest::collection::vec(2i64..50i64, 1..6),
        moves in proptest::collection::vec(-4000i64..4000i64, 1..8),
    ) {
        let f = Fixture::new();
        f.btc(dec!(50000));
        let mut traders = Vec::new();
        for (i, lev) in leverages.iter().enumerate() {
            let trader = f.user(i as u64 + 1, dec!(1000));
            let side = if i % 2 == 0 { Side::Long } else { Side::Short };
            let order = FutureOrder::new(
                Symbol::btc_usdt(),
                side,
                Leverage::new(Decimal::from(*lev)).unwrap(),
                dec!(200),
            );
            let id = f.platform.open_future(trader, order).unwrap();
            traders.push((trader, id));
        }

        let mut price = dec!(50000);
        for step in &moves {
            price += Decimal::from(*step);
            f.clock.advance(1_000);
            f.btc(price);
            f.platform.run_sweep(SweepJob::Liquidations);
        }

        for (trader, id) in &traders {
            if f.platform.future(*id).unwrap().open {
                f.platform.close_future(*id, *trader).unwrap();
            }
            prop_assert!(f.platform.balance(*trader, Asset::Usdt).unwrap() >= Decimal::ZERO);
        }

        let ledger = f.platform.ledger();
        prop_assert_eq!(ledger.total_supply(Asset::Usdt).unwrap(), ledger.net_external(Asset::Usdt).unwrap());
        prop_assert!(ledger.audit().is_ok());
    }

    /// Swaps in both directions keep every asset's supply equal to its deposits.
    #[test]
    fn swaps_conserve_each_asset(
        amounts in proptest::collection::vec(1i64..500i64, 1..10),
        price in 20000i64..80000i64,
    ) {
        let f = Fixture::new();
        let user = f.user(1, dec!(100000));
        f.btc(Decimal::from(price));

        for (i, amount) in amounts.iter().enumerate() {
            let (from, to, amount) = if i % 2 == 0 {
                (Asset::Usdt, Asset::Btc, Decimal::from(*amount))
            } else {
                (Asset::Btc, Asset::Usdt, Decimal::new(*amount, 5))
            };
            let quote = f.platform.quote(from, to).unwrap();
            // an odd step may lack BTC; a rejected swap must leave nothing behind
            let _ = f.platform.convert(user, from, amount, to, &quote);
        }

        let ledger = f.platform.ledger();
        for asset in [Asset::Usdt, Asset::Btc] {
            prop_assert_eq!(ledger.total_supply(asset).unwrap(), ledger.net_external(asset).unwrap());
        }
        prop_assert!(ledger.audit().is_ok());
    }
}
