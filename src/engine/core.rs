// 8.0 engine/core.rs: the platform. one ledger, one oracle, every engine's tables.

use super::results::{EngineError, SweepReport};
use crate::clock::Clock;
use crate::config::{ConfigError, PlatformConfig};
use crate::copy_trading::CopyPosition;
use crate::derivatives::{BinaryPosition, FuturePosition};
use crate::directory::AccountDirectory;
use crate::events::{EventId, EventLog, EventPayload, SweepSkippedEvent};
use crate::ledger::{Ledger, Receipt, Tier};
use crate::oracle::{PriceOracle, PriceQuote};
use crate::p2p::{P2pOffer, P2pOrder};
use crate::scheduler::{Scheduler, SweepJob};
use crate::staking::StakingPosition;
use crate::store::EntityTable;
use crate::types::{AccountId, Asset, Bps, CopyId, OfferId, OrderId, PositionId, StakeId, Symbol, Timestamp};
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

/** 8.1: main platform struct. all state lives here, every method takes &self */
pub struct Platform {
    pub(super) config: PlatformConfig,
    pub(super) ledger: Ledger,
    pub(super) oracle: Arc<dyn PriceOracle>,
    pub(super) directory: Arc<dyn AccountDirectory>,
    pub(super) clock: Arc<dyn Clock>,
    pub(super) events: EventLog,
    pub(super) scheduler: Scheduler,
    pub(super) offers: EntityTable<OfferId, P2pOffer>,
    pub(super) orders: EntityTable<OrderId, P2pOrder>,
    pub(super) futures: EntityTable<PositionId, FuturePosition>,
    pub(super) binaries: EntityTable<PositionId, BinaryPosition>,
    pub(super) stakes: EntityTable<StakeId, StakingPosition>,
    pub(super) copies: EntityTable<CopyId, CopyPosition>,
    next_reference: AtomicU64,
}

impl Platform {
    pub fn new(
        config: PlatformConfig,
        oracle: Arc<dyn PriceOracle>,
        directory: Arc<dyn AccountDirectory>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let ledger = Ledger::new(&config.assets, Arc::clone(&directory), Arc::clone(&clock));
        let scheduler = Scheduler::new(config.scheduler.clone(), Arc::clone(&clock));
        let events = EventLog::new(config.max_events);
        info!(assets = config.assets.len(), plans = config.staking.plans.len(), "platform started");

        Ok(Self {
            config,
            ledger,
            oracle,
            directory,
            clock,
            events,
            scheduler,
            offers: EntityTable::new("offer"),
            orders: EntityTable::new("p2p order"),
            futures: EntityTable::new("future"),
            binaries: EntityTable::new("binary"),
            stakes: EntityTable::new("stake"),
            copies: EntityTable::new("copy"),
            next_reference: AtomicU64::new(1),
        })
    }

    pub fn config(&self) -> &PlatformConfig {
        &self.config
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn events(&self) -> &EventLog {
        &self.events
    }

    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    pub fn open_account(&self, account_id: AccountId, tier: Tier) -> Result<(), EngineError> {
        self.ledger.open_account(account_id, tier)?;
        Ok(())
    }

    pub fn deposit(&self, account_id: AccountId, asset: Asset, amount: Decimal) -> Result<Receipt, EngineError> {
        let reference = self.reference("dep");
        Ok(self.ledger.credit(account_id, asset, amount, reference)?)
    }

    pub fn withdraw(&self, account_id: AccountId, asset: Asset, amount: Decimal) -> Result<Receipt, EngineError> {
        let reference = self.reference("wd");
        Ok(self.ledger.debit(account_id, asset, amount, reference)?)
    }

    pub fn balance(&self, account_id: AccountId, asset: Asset) -> Result<Decimal, EngineError> {
        Ok(self.ledger.available(account_id, asset)?)
    }

    pub fn future(&self, id: PositionId) -> Result<FuturePosition, EngineError> {
        self.futures.get(id)
    }

    pub fn binary(&self, id: PositionId) -> Result<BinaryPosition, EngineError> {
        self.binaries.get(id)
    }

    pub fn offer(&self, id: OfferId) -> Result<P2pOffer, EngineError> {
        self.offers.get(id)
    }

    pub fn order(&self, id: OrderId) -> Result<P2pOrder, EngineError> {
        self.orders.get(id)
    }

    pub fn stake_position(&self, id: StakeId) -> Result<StakingPosition, EngineError> {
        self.stakes.get(id)
    }

    pub fn copy_position(&self, id: CopyId) -> Result<CopyPosition, EngineError> {
        self.copies.get(id)
    }

    /// Runs every sweep whose interval has elapsed.
    pub fn tick(&self) -> Vec<SweepReport> {
        self.scheduler.due().into_iter().map(|job| self.run_sweep(job)).collect()
    }

    pub fn next_sweep_due(&self) -> Option<Timestamp> {
        self.scheduler.next_due()
    }

    /// Runs one sweep now, regardless of schedule.
    pub fn run_sweep(&self, job: SweepJob) -> SweepReport {
        let report = match job {
            SweepJob::Liquidations => self.sweep_futures(),
            SweepJob::BinarySettlement => self.sweep_binaries(),
            SweepJob::EscrowTimeouts => self.sweep_escrow_timeouts(),
            SweepJob::StakingRewards => self.sweep_staking(),
            SweepJob::CopyTrading => self.sweep_copy_trading(),
        };
        for (entity, err) in &report.skipped {
            warn!(?job, entity = %entity, error = %err, "sweep skipped entity");
            self.emit(EventPayload::SweepSkipped(SweepSkippedEvent {
                job,
                entity: entity.clone(),
                reason: err.to_string(),
            }));
        }
        report
    }

    pub(super) fn emit(&self, payload: EventPayload) -> EventId {
        self.events.emit(self.clock.now(), payload)
    }

    pub(super) fn reference(&self, prefix: &str) -> String {
        format!("{prefix}:{}", self.next_reference.fetch_add(1, Ordering::SeqCst))
    }

    /// Latest oracle price, rejected if older than `max_age_ms`.
    pub(super) fn fresh_price(&self, symbol: Symbol, max_age_ms: i64) -> Result<PriceQuote, EngineError> {
        let quote = self.oracle.get_price(symbol)?;
        self.check_fresh(symbol, &quote, max_age_ms)?;
        Ok(quote)
    }

    pub(super) fn check_fresh(&self, symbol: Symbol, quote: &PriceQuote, max_age_ms: i64) -> Result<(), EngineError> {
        let now = self.clock.now();
        if quote.is_stale(now, max_age_ms) {
            return Err(EngineError::PriceUnavailable(format!(
                "{symbol} price is {}ms old",
                quote.age_millis(now)
            )));
        }
        Ok(())
    }

    /// `base` less the account tier's discount.
    pub(super) fn fee_rate(&self, account_id: AccountId, base: Bps) -> Result<Bps, EngineError> {
        let tier = self.ledger.tier(account_id)?;
        Ok(base.saturating_sub(tier.fee_discount()))
    }

    pub(super) fn require_account(&self, account_id: AccountId) -> Result<(), EngineError> {
        if self.ledger.has_account(account_id) {
            Ok(())
        } else {
            Err(EngineError::NotFound(format!("account {account_id}")))
        }
    }
}
