//! Settlement engine simulation.
//!
//! Walks the platform through a swap, a P2P escrow trade, a liquidation, a binary option,
//! a staking payout and a copied trade, then audits the ledger.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use settle_core::copy_trading::CopySettings;
use settle_core::derivatives::OptionDirection;
use settle_core::p2p::OfferSide;
use settle_core::scheduler::SweepJob;
use settle_core::*;
use std::error::Error;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

type SimResult = Result<(), Box<dyn Error>>;

fn main() -> SimResult {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "settle_core=warn".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    println!("Settlement Engine Simulation");
    println!("One ledger, every product settled through it\n");

    scenario_1_swap()?;
    scenario_2_p2p_escrow()?;
    scenario_3_liquidation()?;
    scenario_4_binary_option()?;
    scenario_5_staking()?;
    scenario_6_copy_trading()?;

    println!("\nAll simulations completed successfully.");
    Ok(())
}

struct Sim {
    platform: Platform,
    oracle: Arc<InMemoryOracle>,
    clock: Arc<ManualClock>,
    directory: Arc<InMemoryDirectory>,
}

impl Sim {
    fn new() -> Result<Self, Box<dyn Error>> {
        let oracle = Arc::new(InMemoryOracle::new());
        let clock = Arc::new(ManualClock::new(Timestamp::from_millis(1_700_000_000_000)));
        let directory = Arc::new(InMemoryDirectory::new());
        let platform = Platform::new(
            PlatformConfig::default(),
            oracle.clone(),
            directory.clone(),
            clock.clone(),
        )?;
        Ok(Self {
            platform,
            oracle,
            clock,
            directory,
        })
    }

    fn user(&self, id: u64) -> Result<AccountId, Box<dyn Error>> {
        let account = AccountId(id);
        self.directory.register(account);
        self.platform.open_account(account, Tier::Standard)?;
        Ok(account)
    }

    fn price(&self, symbol: Symbol, value: Decimal) {
        self.oracle
            .set_price(symbol, Price::new_unchecked(value), self.clock.now());
    }

    fn audit(&self) -> SimResult {
        self.platform.ledger().audit()?;
        println!("  Ledger audit: ok, {} transactions\n", self.platform.ledger().transaction_count()?);
        Ok(())
    }
}

/// USDT → BTC conversion against the treasury.
fn scenario_1_swap() -> SimResult {
    println!("Scenario 1: Swap\n");
    let sim = Sim::new()?;
    let alice = sim.user(1)?;
    sim.platform.deposit(alice, Asset::Usdt, dec!(1000))?;
    sim.price(Symbol::btc_usdt(), dec!(50000));

    let quote = sim.platform.quote(Asset::Usdt, Asset::Btc)?;
    let result = sim.platform.convert(alice, Asset::Usdt, dec!(1000), Asset::Btc, &quote)?;

    println!("  Alice converts 1000 USDT at ${}", quote.price);
    println!("  Received {} BTC, fee {} BTC", result.amount_out, result.fee);
    println!(
        "  Balances: {} USDT, {} BTC",
        sim.platform.balance(alice, Asset::Usdt)?,
        sim.platform.balance(alice, Asset::Btc)?
    );
    sim.audit()
}

/// Seller lists BTC, buyer pays off-ledger, seller releases the escrow.
fn scenario_2_p2p_escrow() -> SimResult {
    println!("Scenario 2: P2P Escrow\n");
    let sim = Sim::new()?;
    let seller = sim.user(1)?;
    let buyer = sim.user(2)?;
    sim.platform.deposit(seller, Asset::Btc, dec!(0.01))?;

    let offer = sim.platform.create_offer(
        seller,
        OfferTerms {
            side: OfferSide::Sell,
            asset: Asset::Btc,
            fiat_currency: "USD".to_string(),
            price: dec!(50000),
            amount: dec!(0.01),
            min_amount: dec!(0.001),
            max_amount: dec!(0.01),
        },
    )?;
    let order = sim.platform.open_order(offer, buyer, dec!(0.01))?;
    println!(
        "  Order {:?}: {} BTC held in escrow",
        sim.platform.order(order)?.status,
        sim.platform.ledger().held(seller, HoldId::from(order), Asset::Btc)?
    );

    sim.platform.mark_paid(order, buyer)?;
    println!("  Buyer marks {:?}", sim.platform.order(order)?.status);

    sim.platform.release(order, seller)?;
    println!("  Seller releases: order {:?}", sim.platform.order(order)?.status);
    println!(
        "  Buyer {} BTC, seller escrow {} BTC",
        sim.platform.balance(buyer, Asset::Btc)?,
        sim.platform.ledger().held(seller, HoldId::from(order), Asset::Btc)?
    );
    sim.audit()
}

/// A 10x long swept below its liquidation price.
fn scenario_3_liquidation() -> SimResult {
    println!("Scenario 3: Liquidation\n");
    let sim = Sim::new()?;
    let trader = sim.user(1)?;
    sim.platform.deposit(trader, Asset::Usdt, dec!(1000))?;
    sim.price(Symbol::btc_usdt(), dec!(50000));

    let leverage = Leverage::new(dec!(10)).ok_or("invalid leverage")?;
    let id = sim
        .platform
        .open_future(trader, FutureOrder::new(Symbol::btc_usdt(), Side::Long, leverage, dec!(100)))?;
    let position = sim.platform.future(id)?;
    println!(
        "  10x LONG, margin 100 USDT @ ${}, liquidation price ${}",
        position.entry_price, position.liquidation_price
    );

    sim.price(Symbol::btc_usdt(), dec!(44000));
    let report = sim.platform.run_sweep(SweepJob::Liquidations);
    let position = sim.platform.future(id)?;
    println!("  Price drops to $44000, sweep closed {} position(s)", report.transitioned);
    println!(
        "  Closed by {:?} @ ${}, margin credited back: {}",
        position.close_reason.ok_or("position still open")?,
        position.exit_price.ok_or("no exit price")?,
        position.payout.unwrap_or(Decimal::ZERO)
    );
    sim.audit()
}

/// A call settled from the price in effect at expiry, then swept again.
fn scenario_4_binary_option() -> SimResult {
    println!("Scenario 4: Binary Option\n");
    let sim = Sim::new()?;
    let user = sim.user(1)?;
    sim.platform.deposit(user, Asset::Usdt, dec!(50))?;
    sim.price(Symbol::eth_usdt(), dec!(3000));

    let expiry = sim.clock.now().plus_millis(5 * 60 * 1000);
    let id = sim.platform.open_binary(
        user,
        BinaryOrder {
            symbol: Symbol::eth_usdt(),
            direction: OptionDirection::Call,
            stake: dec!(50),
            strike: Some(Price::new_unchecked(dec!(3000))),
            expiry,
        },
    )?;
    println!("  CALL, stake 50 USDT, strike $3000");

    sim.clock.set(expiry);
    sim.price(Symbol::eth_usdt(), dec!(3100));
    sim.platform.run_sweep(SweepJob::BinarySettlement);
    let position = sim.platform.binary(id)?;
    println!(
        "  Price at expiry $3100: {:?}, credited {}",
        position.status,
        position.payout.unwrap_or(Decimal::ZERO)
    );

    let again = sim.platform.run_sweep(SweepJob::BinarySettlement);
    println!(
        "  Second sweep settled {}, balance {} USDT",
        again.transitioned,
        sim.platform.balance(user, Asset::Usdt)?
    );
    sim.audit()
}

/// Flexible staking with the scheduler persisting rewards.
fn scenario_5_staking() -> SimResult {
    println!("Scenario 5: Staking\n");
    let sim = Sim::new()?;
    let user = sim.user(1)?;
    sim.platform.deposit(user, Asset::Usdt, dec!(7300))?;

    let stake = sim.platform.stake(user, PlanId(1), dec!(7300))?;
    for _ in 0..30 {
        sim.clock.advance_days(1);
        sim.platform.tick();
    }
    println!("  7300 USDT at 5% for 30 days: {} rewards", sim.platform.rewards(stake)?);

    let payout = sim.platform.unstake(stake, user)?;
    println!("  Unstaked {} principal + {} rewards", payout.principal, payout.rewards);
    sim.audit()
}

/// A follower mirroring a trader's winning long.
fn scenario_6_copy_trading() -> SimResult {
    println!("Scenario 6: Copy Trading\n");
    let sim = Sim::new()?;
    let trader = sim.user(1)?;
    let follower = sim.user(2)?;
    sim.platform.deposit(trader, Asset::Usdt, dec!(10000))?;
    sim.platform.deposit(follower, Asset::Usdt, dec!(1000))?;
    sim.price(Symbol::btc_usdt(), dec!(50000));

    let copy = sim.platform.allocate(follower, trader, dec!(1000), CopySettings::proportional())?;
    let leverage = Leverage::new(dec!(5)).ok_or("invalid leverage")?;
    let source = sim
        .platform
        .open_future(trader, FutureOrder::new(Symbol::btc_usdt(), Side::Long, leverage, dec!(2000)))?;
    println!("  Trader opens 5x LONG with 2000 USDT; follower mirrors {} position(s)", sim.platform.copy_position(copy)?.mirrors.len());

    sim.price(Symbol::btc_usdt(), dec!(52000));
    sim.platform.close_future(source, trader)?;
    let stopped = sim.platform.stop_copying(copy, follower)?;
    println!(
        "  Copy returned {} USDT, trader profit share {}",
        stopped.returned.unwrap_or(Decimal::ZERO),
        stopped.profit_share_paid.unwrap_or(Decimal::ZERO)
    );
    sim.audit()
}
