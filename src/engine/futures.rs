// 8.3 engine/futures.rs: opening, closing and liquidating leveraged positions.
// margin + open fee leave the funding account at open. at close the margin splits into
// payout / fee / house (settle_close); the treasury covers any profit beyond the margin.

use super::core::Platform;
use super::results::{EngineError, SweepReport};
use crate::derivatives::{
    calculate_liquidation_price, evaluate_liquidation, position_amount, position_pnl, settle_close, CloseSettlement,
    FuturePosition, LiquidationStatus, Triggers,
};
use crate::events::{CloseReason, EventPayload, FutureClosedEvent, FutureOpenedEvent};
use crate::ledger::{Journal, SystemAccount, TxKind};
use crate::scheduler::SweepJob;
use crate::types::{AccountId, CopyId, Leverage, PositionId, Price, Side, Symbol};
use rust_decimal::Decimal;
use std::collections::BTreeSet;
use tracing::{info, warn};

/// Everything needed to open a position, minus who pays for it.
#[derive(Debug, Clone, Copy)]
pub struct FutureOrder {
    pub symbol: Symbol,
    pub side: Side,
    pub leverage: Leverage,
    pub margin: Decimal,
    pub triggers: Triggers,
}

impl FutureOrder {
    pub fn new(symbol: Symbol, side: Side, leverage: Leverage, margin: Decimal) -> Self {
        Self {
            symbol,
            side,
            leverage,
            margin,
            triggers: Triggers::none(),
        }
    }

    pub fn with_triggers(mut self, triggers: Triggers) -> Self {
        self.triggers = triggers;
        self
    }
}

impl Platform {
    /// 8.3.1: opens a position paid for by the owner.
    pub fn open_future(&self, account_id: AccountId, order: FutureOrder) -> Result<PositionId, EngineError> {
        let position = self.open_funded(account_id, account_id, order, None)?;

        // traders' own positions are picked up by their followers right away
        if let Err(err) = self.sync_trader(account_id) {
            warn!(trader = %account_id, error = %err, "copy sync after open failed");
        }
        Ok(position.id)
    }

    /// Opens a position owned by `owner` but funded from (and paying out to) `funder`.
    pub(super) fn open_funded(
        &self,
        owner: AccountId,
        funder: AccountId,
        order: FutureOrder,
        copy: Option<CopyId>,
    ) -> Result<FuturePosition, EngineError> {
        self.require_account(owner)?;
        let cfg = &self.config.futures;
        let asset = order.symbol.quote;

        if order.leverage.value() > cfg.max_leverage {
            return Err(EngineError::validation(format!(
                "leverage {} exceeds maximum {}x",
                order.leverage, cfg.max_leverage
            )));
        }
        if order.margin < cfg.min_margin {
            return Err(EngineError::validation(format!(
                "margin {} below minimum {}",
                order.margin, cfg.min_margin
            )));
        }
        if !asset.fits_precision(order.margin) {
            return Err(EngineError::validation(format!("{} exceeds {asset} precision", order.margin)));
        }

        let entry = self.fresh_price(order.symbol, cfg.max_price_age_ms)?.price;
        order.triggers.validate(order.side, entry)?;

        let amount = position_amount(order.margin, order.leverage, entry);
        let fee_rate = self.fee_rate(owner, cfg.open_fee)?;
        let open_fee = asset.round_up(order.margin * order.leverage.value() * fee_rate.as_fraction());
        let liquidation_price =
            calculate_liquidation_price(entry, order.leverage, order.side, cfg.liquidation_fee.as_fraction());

        let id = PositionId(self.futures.next_id());
        let position = FuturePosition {
            id,
            owner,
            funding_account: funder,
            symbol: order.symbol,
            side: order.side,
            leverage: order.leverage,
            margin: order.margin,
            amount,
            entry_price: entry,
            liquidation_price,
            triggers: order.triggers,
            open: true,
            opened_at: self.now(),
            open_fee,
            copy,
            closed_at: None,
            exit_price: None,
            realized_pnl: None,
            payout: None,
            close_reason: None,
        };

        let journal = Journal::new(TxKind::MarginOpen, position.reference())
            .transfer(funder, SystemAccount::MarginPool.id(), asset, order.margin)
            .transfer_as(TxKind::Fee, funder, SystemAccount::FeeSink.id(), asset, open_fee);
        self.ledger.commit(journal)?;
        self.futures.insert(id, position.clone());

        info!(
            position = id.0,
            owner = %owner,
            symbol = %order.symbol,
            side = ?order.side,
            leverage = %order.leverage,
            margin = %order.margin,
            entry = %entry,
            liquidation = %liquidation_price,
            "future opened"
        );
        self.emit(EventPayload::FutureOpened(FutureOpenedEvent {
            position_id: id,
            account_id: owner,
            symbol: order.symbol,
            side: order.side,
            leverage: order.leverage,
            margin: order.margin,
            entry_price: entry,
            liquidation_price,
        }));
        Ok(position)
    }

    /// 8.3.2: closes at the current oracle price. Copy mirrors are closed by their copy.
    pub fn close_future(&self, id: PositionId, actor: AccountId) -> Result<CloseSettlement, EngineError> {
        let position = self.futures.get(id)?;
        if position.owner != actor {
            return Err(EngineError::Unauthorized {
                account: actor,
                action: "close this position",
            });
        }
        if position.copy.is_some() {
            return Err(EngineError::Unauthorized {
                account: actor,
                action: "close a copy-trading mirror directly",
            });
        }

        let mark = self.fresh_price(position.symbol, self.config.futures.max_price_age_ms)?.price;
        let settlement = self.futures.with(id, |position| {
            if !position.open {
                return Err(EngineError::conflict_in(position.label(), "closed", "close"));
            }
            self.settle_position(position, mark, CloseReason::UserClosed)
        })?;

        if let Err(err) = self.sync_trader(actor) {
            warn!(trader = %actor, error = %err, "copy sync after close failed");
        }
        Ok(settlement)
    }

    /// Closes `id` at `mark` for `reason`. Used for mirrors, which have no user close.
    pub(super) fn force_close(
        &self,
        id: PositionId,
        mark: Price,
        reason: CloseReason,
    ) -> Result<CloseSettlement, EngineError> {
        self.futures.with(id, |position| {
            if !position.open {
                return Err(EngineError::AlreadySettled(position.label()));
            }
            self.settle_position(position, mark, reason)
        })
    }

    /// Current health of an open position.
    pub fn position_health(&self, id: PositionId) -> Result<LiquidationStatus, EngineError> {
        let position = self.futures.get(id)?;
        if !position.open {
            return Err(EngineError::conflict_in(position.label(), "closed", "evaluate"));
        }
        let mark = self.fresh_price(position.symbol, self.config.futures.max_price_age_ms)?.price;
        Ok(evaluate_liquidation(
            position.side,
            position.entry_price,
            position.amount,
            position.margin,
            position.liquidation_price,
            mark,
        ))
    }

    pub fn open_futures_for(&self, account_id: AccountId) -> Vec<FuturePosition> {
        self.futures.filter(|p| p.open && p.owner == account_id)
    }

    /// Liquidations, stop-losses and take-profits at the latest mark.
    pub(super) fn sweep_futures(&self) -> SweepReport {
        let mut report = SweepReport::new(SweepJob::Liquidations, self.now());
        let max_age = self.config.futures.max_price_age_ms;
        let mut traders = BTreeSet::new();

        for position in self.futures.filter(|p| p.open) {
            report.examined += 1;
            let mark = match self.fresh_price(position.symbol, max_age) {
                Ok(quote) => quote.price,
                Err(err) => {
                    report.skip(position.label(), err);
                    continue;
                }
            };

            let closed = self.futures.with(position.id, |position| match position.trigger(mark) {
                Some((reason, exit)) => self.settle_position(position, exit, reason).map(|_| true),
                None => Ok(false),
            });
            match closed {
                Ok(true) => {
                    report.transitioned += 1;
                    if position.copy.is_none() {
                        traders.insert(position.owner);
                    }
                }
                Ok(false) => {}
                Err(err) => report.skip(position.label(), err),
            }
        }

        for trader in traders {
            if let Err(err) = self.sync_trader(trader) {
                report.skip(format!("copy sync for {trader}"), err);
            }
        }
        report
    }

    // books the close and only then marks the row closed
    fn settle_position(
        &self,
        position: &mut FuturePosition,
        exit: Price,
        reason: CloseReason,
    ) -> Result<CloseSettlement, EngineError> {
        let asset = position.margin_asset();
        let pnl = position_pnl(position.side, position.entry_price, exit, position.amount);
        let (kind, fee_base) = if reason == CloseReason::Liquidation {
            (
                TxKind::Liquidation,
                position.entry_notional() * self.config.futures.liquidation_fee.as_fraction(),
            )
        } else {
            let rate = self.fee_rate(position.owner, self.config.futures.close_fee)?;
            (TxKind::MarginClose, position.amount * exit.value() * rate.as_fraction())
        };
        let settlement = settle_close(asset, position.margin, pnl, fee_base);

        let pool = SystemAccount::MarginPool.id();
        let treasury = SystemAccount::Treasury.id();
        let mut journal = Journal::new(kind, position.reference());
        // profit beyond the margin comes from the treasury before the pool pays out
        if settlement.house < Decimal::ZERO {
            journal = journal.transfer(treasury, pool, asset, -settlement.house);
        }
        journal = journal
            .transfer_nonzero(pool, position.funding_account, asset, settlement.payout)
            .transfer_as(TxKind::Fee, pool, SystemAccount::FeeSink.id(), asset, settlement.fee);
        if settlement.house > Decimal::ZERO {
            journal = journal.transfer(pool, treasury, asset, settlement.house);
        }
        self.ledger.commit(journal)?;

        let now = self.now();
        position.open = false;
        position.closed_at = Some(now);
        position.exit_price = Some(exit);
        position.realized_pnl = Some(settlement.pnl);
        position.payout = Some(settlement.payout);
        position.close_reason = Some(reason);

        if reason == CloseReason::Liquidation {
            warn!(position = position.id.0, owner = %position.owner, price = %exit, "position liquidated");
        } else {
            info!(
                position = position.id.0,
                owner = %position.owner,
                ?reason,
                price = %exit,
                pnl = %settlement.pnl,
                payout = %settlement.payout,
                "future closed"
            );
        }
        self.emit(EventPayload::FutureClosed(FutureClosedEvent {
            position_id: position.id,
            account_id: position.owner,
            exit_price: exit,
            realized_pnl: settlement.pnl,
            payout: settlement.payout,
            close_reason: reason,
        }));
        Ok(settlement)
    }
}
