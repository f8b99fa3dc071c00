// 8.6 engine/copy_trading.rs: followers mirroring a trader's futures.
// lock order: copy row, then futures rows, then ledger. the copy row is the only writer of
// its cash: mirror payouts land in the copy pool and are folded into cash here, including
// mirrors the liquidation sweep closed on its own.

use super::core::Platform;
use super::futures::FutureOrder;
use super::results::{EngineError, SweepReport};
use crate::copy_trading::{
    affordable_margin, profit_share, target_margin, CopyPosition, CopySettings, CopyStatus, CopyStopReason,
};
use crate::derivatives::FuturePosition;
use crate::events::{CloseReason, CopyMirroredEvent, CopyStartedEvent, CopyStoppedEvent, EventPayload};
use crate::ledger::{Journal, SystemAccount, TxKind};
use crate::scheduler::SweepJob;
use crate::types::{AccountId, CopyId, PositionId, Price, Symbol};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::{debug, info, warn};

type Marks = HashMap<Symbol, Price>;

impl Platform {
    /// Moves `amount` from the follower into the copy pool and starts mirroring `trader`.
    pub fn allocate(
        &self,
        follower: AccountId,
        trader: AccountId,
        amount: Decimal,
        settings: CopySettings,
    ) -> Result<CopyId, EngineError> {
        self.require_account(follower)?;
        self.require_account(trader)?;
        if follower == trader {
            return Err(EngineError::validation("cannot copy yourself"));
        }
        settings.validate().map_err(EngineError::Validation)?;

        let cfg = &self.config.copy;
        let asset = cfg.settlement_asset;
        if amount < cfg.min_allocation {
            return Err(EngineError::validation(format!(
                "allocation {amount} below minimum {}",
                cfg.min_allocation
            )));
        }
        if !asset.fits_precision(amount) {
            return Err(EngineError::validation(format!("{amount} exceeds {asset} precision")));
        }
        if let Some(existing) = self
            .copies
            .filter(|c| c.is_active() && c.follower == follower && c.trader == trader)
            .first()
        {
            return Err(EngineError::conflict(existing.label(), existing.status, "allocate again"));
        }

        let id = CopyId(self.copies.next_id());
        let copy = CopyPosition {
            id,
            follower,
            trader,
            allocated: amount,
            cash: amount,
            current_value: amount,
            settings,
            mirrors: BTreeMap::new(),
            status: CopyStatus::Active,
            started_at: self.now(),
            stopped_at: None,
            stop_reason: None,
            returned: None,
            profit_share_paid: None,
        };
        self.ledger.transfer(
            follower,
            SystemAccount::CopyPool.id(),
            asset,
            amount,
            TxKind::CopyAllocate,
            copy.reference(),
        )?;
        self.copies.insert(id, copy);

        info!(copy = id.0, %follower, %trader, %amount, "copy started");
        self.emit(EventPayload::CopyStarted(CopyStartedEvent {
            copy_id: id,
            follower,
            trader,
            allocated: amount,
        }));
        Ok(id)
    }

    /// Closes every mirror and pays the allocation's value back, less the trader's share.
    pub fn stop_copying(&self, copy_id: CopyId, follower: AccountId) -> Result<CopyPosition, EngineError> {
        let snapshot = self.copies.get(copy_id)?;
        if snapshot.follower != follower {
            return Err(EngineError::Unauthorized {
                account: follower,
                action: "stop this copy",
            });
        }
        let marks = self.mark_prices(self.mirror_symbols(&snapshot));

        self.copies.with(copy_id, |copy| {
            if !copy.is_active() {
                return Err(EngineError::conflict(copy.label(), copy.status, "stop"));
            }
            self.reconcile_mirrors(copy)?;
            self.stop_copy(copy, CopyStopReason::Follower, &marks)?;
            Ok(copy.clone())
        })
    }

    pub fn copies_for(&self, follower: AccountId) -> Vec<CopyPosition> {
        self.copies.filter(|c| c.follower == follower)
    }

    pub fn followers_of(&self, trader: AccountId) -> Vec<CopyPosition> {
        self.copies.filter(|c| c.is_active() && c.trader == trader)
    }

    /// Brings every active copy of `trader` in line with the trader's positions.
    /// Returns how many copies synced; the first failure is returned after all were tried.
    pub fn sync_trader(&self, trader: AccountId) -> Result<usize, EngineError> {
        let mut synced = 0;
        let mut first_err = None;
        for (copy, result) in self.sync_copies(trader) {
            match result {
                Ok(()) => synced += 1,
                Err(err) => {
                    warn!(copy = copy.0, error = %err, "copy sync failed");
                    first_err.get_or_insert(err);
                }
            }
        }
        match first_err {
            Some(err) => Err(err),
            None => Ok(synced),
        }
    }

    pub(super) fn sweep_copy_trading(&self) -> SweepReport {
        let mut report = SweepReport::new(SweepJob::CopyTrading, self.now());
        let traders: BTreeSet<AccountId> = self
            .copies
            .filter(|c| c.is_active())
            .into_iter()
            .map(|c| c.trader)
            .collect();

        for trader in traders {
            for (copy, result) in self.sync_copies(trader) {
                report.examined += 1;
                match result {
                    Ok(()) => report.transitioned += 1,
                    Err(err) => report.skip(format!("copy {}", copy.0), err),
                }
            }
        }
        report
    }

    fn sync_copies(&self, trader: AccountId) -> Vec<(CopyId, Result<(), EngineError>)> {
        let copies = self.followers_of(trader);
        if copies.is_empty() {
            return Vec::new();
        }

        let sources = self.futures.filter(|p| p.owner == trader && p.copy.is_none());
        let aum = match self.trader_aum(trader, &sources) {
            Ok(aum) => aum,
            Err(err) => return copies.into_iter().map(|c| (c.id, Err(err.clone()))).collect(),
        };

        copies
            .into_iter()
            .map(|copy| {
                let mut symbols = self.mirror_symbols(&copy);
                symbols.extend(sources.iter().filter(|s| s.open).map(|s| s.symbol));
                let marks = self.mark_prices(symbols);
                let result = self.sync_copy(copy.id, &sources, aum, &marks);
                (copy.id, result)
            })
            .collect()
    }

    fn sync_copy(
        &self,
        copy_id: CopyId,
        sources: &[FuturePosition],
        aum: Decimal,
        marks: &Marks,
    ) -> Result<(), EngineError> {
        let settlement_asset = self.config.copy.settlement_asset;
        self.copies.with(copy_id, |copy| {
            if !copy.is_active() {
                return Ok(());
            }
            self.reconcile_mirrors(copy)?;

            // the trader closed these
            let orphaned: Vec<(PositionId, PositionId)> = copy
                .mirrors
                .iter()
                .filter(|(source, _)| sources.iter().any(|s| s.id == **source && !s.open))
                .map(|(source, mirror)| (*source, *mirror))
                .collect();
            for (source, mirror) in orphaned {
                self.close_mirror(copy, source, mirror, marks, CloseReason::MirrorClosed)?;
            }

            for source in sources {
                let eligible = source.open
                    && source.opened_at >= copy.started_at
                    && source.margin_asset() == settlement_asset
                    && !copy.mirrors.contains_key(&source.id);
                if eligible {
                    self.open_mirror(copy, source, aum)?;
                }
            }

            if let Some(value) = self.copy_value(copy, marks) {
                copy.current_value = value;
                if let Some(reason) = copy.stop_trigger() {
                    self.stop_copy(copy, reason, marks)?;
                }
            }
            Ok(())
        })
    }

    // folds payouts of mirrors that closed elsewhere (liquidation) into cash
    fn reconcile_mirrors(&self, copy: &mut CopyPosition) -> Result<(), EngineError> {
        let mirrors: Vec<(PositionId, PositionId)> = copy.mirrors.iter().map(|(s, m)| (*s, *m)).collect();
        for (source, mirror) in mirrors {
            let position = self.futures.get(mirror)?;
            if !position.open {
                copy.cash += position.payout.unwrap_or(Decimal::ZERO);
                copy.mirrors.remove(&source);
                debug!(copy = copy.id.0, mirror = mirror.0, "closed mirror reconciled");
            }
        }
        Ok(())
    }

    fn open_mirror(&self, copy: &mut CopyPosition, source: &FuturePosition, aum: Decimal) -> Result<(), EngineError> {
        let asset = source.margin_asset();
        let cfg = &self.config.futures;
        let fee = self.fee_rate(copy.follower, cfg.open_fee)?.as_fraction();
        let leverage = source.leverage;

        let target = target_margin(copy.settings.mode, source.margin, copy.allocated, aum);
        let mut margin = asset.truncate(target.min(affordable_margin(copy.cash, leverage, fee)));
        // the rounded-up fee may not fit next to a margin sized on the exact fee
        let cost = margin + asset.round_up(margin * leverage.value() * fee);
        if cost > copy.cash {
            margin = asset.truncate(margin - (cost - copy.cash));
        }
        if margin < cfg.min_margin {
            debug!(copy = copy.id.0, source = source.id.0, %margin, "mirror below minimum margin, not opened");
            return Ok(());
        }

        let order = FutureOrder::new(source.symbol, source.side, leverage, margin);
        let mirror = self.open_funded(copy.follower, SystemAccount::CopyPool.id(), order, Some(copy.id))?;
        copy.cash -= mirror.margin + mirror.open_fee;
        copy.mirrors.insert(source.id, mirror.id);

        info!(copy = copy.id.0, source = source.id.0, mirror = mirror.id.0, %margin, "position mirrored");
        self.emit(EventPayload::CopyMirrored(CopyMirroredEvent {
            copy_id: copy.id,
            trader_position: source.id,
            follower_position: mirror.id,
            margin,
        }));
        Ok(())
    }

    fn close_mirror(
        &self,
        copy: &mut CopyPosition,
        source: PositionId,
        mirror: PositionId,
        marks: &Marks,
        reason: CloseReason,
    ) -> Result<(), EngineError> {
        let position = self.futures.get(mirror)?;
        let payout = if position.open {
            let mark = mark_for(marks, position.symbol)?;
            match self.force_close(mirror, mark, reason) {
                Ok(settlement) => settlement.payout,
                // liquidated between the read and the close
                Err(EngineError::AlreadySettled(_)) => self.futures.get(mirror)?.payout.unwrap_or(Decimal::ZERO),
                Err(err) => return Err(err),
            }
        } else {
            position.payout.unwrap_or(Decimal::ZERO)
        };
        copy.cash += payout;
        copy.mirrors.remove(&source);
        Ok(())
    }

    fn stop_copy(&self, copy: &mut CopyPosition, reason: CopyStopReason, marks: &Marks) -> Result<(), EngineError> {
        let mirrors: Vec<(PositionId, PositionId)> = copy.mirrors.iter().map(|(s, m)| (*s, *m)).collect();
        for (source, mirror) in mirrors {
            self.close_mirror(copy, source, mirror, marks, CloseReason::CopyStopped)?;
        }

        let asset = self.config.copy.settlement_asset;
        let returned = copy.cash;
        let share = profit_share(asset, copy.allocated, returned, self.config.copy.profit_share);
        let pool = SystemAccount::CopyPool.id();
        let journal = Journal::new(TxKind::CopyRedeem, copy.reference())
            .transfer_nonzero(pool, copy.follower, asset, returned - share)
            .transfer_as(TxKind::Fee, pool, copy.trader, asset, share);
        if !journal.is_empty() {
            self.ledger.commit(journal)?;
        }

        copy.cash = Decimal::ZERO;
        copy.current_value = returned;
        copy.returned = Some(returned);
        copy.profit_share_paid = Some(share);
        copy.status = match reason {
            CopyStopReason::Follower => CopyStatus::Closed,
            CopyStopReason::StopLoss | CopyStopReason::TakeProfit | CopyStopReason::Exhausted => CopyStatus::Stopped,
        };
        copy.stop_reason = Some(reason);
        copy.stopped_at = Some(self.now());

        info!(copy = copy.id.0, ?reason, %returned, %share, "copy stopped");
        self.emit(EventPayload::CopyStopped(CopyStoppedEvent {
            copy_id: copy.id,
            reason,
            value: returned,
        }));
        Ok(())
    }

    /// Cash plus the equity of open mirrors. `None` while any mirror has no mark.
    fn copy_value(&self, copy: &CopyPosition, marks: &Marks) -> Option<Decimal> {
        let mut value = copy.cash;
        for mirror in copy.mirrors.values() {
            let position = self.futures.get(*mirror).ok()?;
            let mark = marks.get(&position.symbol)?;
            value += position.equity(*mark);
        }
        Some(value)
    }

    // what the trader has in the settlement asset: free balance plus margin at work
    fn trader_aum(&self, trader: AccountId, sources: &[FuturePosition]) -> Result<Decimal, EngineError> {
        let asset = self.config.copy.settlement_asset;
        let deployed: Decimal = sources
            .iter()
            .filter(|p| p.open && p.margin_asset() == asset)
            .map(|p| p.margin)
            .sum();
        Ok(self.ledger.available(trader, asset)? + deployed)
    }

    fn mirror_symbols(&self, copy: &CopyPosition) -> BTreeSet<Symbol> {
        copy.mirrors
            .values()
            .filter_map(|m| self.futures.get(*m).ok())
            .map(|p| p.symbol)
            .collect()
    }

    // prices that fail to load are left out; whoever needs them reports it
    fn mark_prices(&self, symbols: BTreeSet<Symbol>) -> Marks {
        let max_age = self.config.futures.max_price_age_ms;
        symbols
            .into_iter()
            .filter_map(|symbol| match self.fresh_price(symbol, max_age) {
                Ok(quote) => Some((symbol, quote.price)),
                Err(err) => {
                    debug!(%symbol, error = %err, "no mark for copy valuation");
                    None
                }
            })
            .collect()
    }
}

fn mark_for(marks: &Marks, symbol: Symbol) -> Result<Price, EngineError> {
    marks
        .get(&symbol)
        .copied()
        .ok_or_else(|| EngineError::PriceUnavailable(format!("no fresh {symbol} price")))
}
