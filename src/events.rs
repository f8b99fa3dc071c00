// 11.0: every non-balance state transition produces an event. balance changes are already in
// the ledger's transaction log; this log records the lifecycle around them (escrow status,
// position opens/closes, settlements, sweep skips). the EventPayload enum lists all event types.

use crate::copy_trading::CopyStopReason;
use crate::derivatives::{BinaryStatus, OptionDirection};
use crate::p2p::EscrowStatus;
use crate::scheduler::SweepJob;
use crate::types::{
    AccountId, Asset, CopyId, Leverage, OrderId, PlanId, PositionId, Price, Side, StakeId, Symbol, Timestamp,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventId(pub u64);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub timestamp: Timestamp,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(id: EventId, timestamp: Timestamp, payload: EventPayload) -> Self {
        Self {
            id,
            timestamp,
            payload,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EventPayload {
    // Trade events
    SwapExecuted(SwapExecutedEvent),

    // Escrow events
    EscrowTransition(EscrowTransitionEvent),

    // Derivative events
    FutureOpened(FutureOpenedEvent),
    FutureClosed(FutureClosedEvent),
    BinaryOpened(BinaryOpenedEvent),
    BinarySettled(BinarySettledEvent),

    // Staking events
    StakeOpened(StakeOpenedEvent),
    StakeClosed(StakeClosedEvent),

    // Copy trading events
    CopyStarted(CopyStartedEvent),
    CopyMirrored(CopyMirroredEvent),
    CopyStopped(CopyStoppedEvent),

    // Sweep events
    SweepSkipped(SweepSkippedEvent),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwapExecutedEvent {
    pub account_id: AccountId,
    pub asset_in: Asset,
    pub amount_in: Decimal,
    pub asset_out: Asset,
    pub amount_out: Decimal,
    pub fee: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscrowTransitionEvent {
    pub order_id: OrderId,
    pub from: Option<EscrowStatus>,
    pub to: EscrowStatus,
    pub actor: Option<AccountId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FutureOpenedEvent {
    pub position_id: PositionId,
    pub account_id: AccountId,
    pub symbol: Symbol,
    pub side: Side,
    pub leverage: Leverage,
    pub margin: Decimal,
    pub entry_price: Price,
    pub liquidation_price: Price,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FutureClosedEvent {
    pub position_id: PositionId,
    pub account_id: AccountId,
    pub exit_price: Price,
    pub realized_pnl: Decimal,
    pub payout: Decimal,
    pub close_reason: CloseReason,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CloseReason {
    UserClosed,
    StopLoss,
    TakeProfit,
    Liquidation,
    /// The copied trader closed the source position.
    MirrorClosed,
    /// The follower's copy allocation was stopped.
    CopyStopped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BinaryOpenedEvent {
    pub position_id: PositionId,
    pub account_id: AccountId,
    pub symbol: Symbol,
    pub direction: OptionDirection,
    pub stake: Decimal,
    pub strike: Price,
    pub expiry: Timestamp,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BinarySettledEvent {
    pub position_id: PositionId,
    pub account_id: AccountId,
    pub status: BinaryStatus,
    pub settle_price: Price,
    pub payout: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StakeOpenedEvent {
    pub stake_id: StakeId,
    pub account_id: AccountId,
    pub plan_id: PlanId,
    pub asset: Asset,
    pub amount: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StakeClosedEvent {
    pub stake_id: StakeId,
    pub account_id: AccountId,
    pub principal: Decimal,
    pub rewards: Decimal,
    pub penalty: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CopyStartedEvent {
    pub copy_id: CopyId,
    pub follower: AccountId,
    pub trader: AccountId,
    pub allocated: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CopyMirroredEvent {
    pub copy_id: CopyId,
    pub trader_position: PositionId,
    pub follower_position: PositionId,
    pub margin: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CopyStoppedEvent {
    pub copy_id: CopyId,
    pub reason: CopyStopReason,
    pub value: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepSkippedEvent {
    pub job: SweepJob,
    pub entity: String,
    pub reason: String,
}

/// Bounded in-memory event log. Oldest events are dropped past `max_events`.
#[derive(Debug)]
pub struct EventLog {
    events: Mutex<VecDeque<Event>>,
    next_event_id: AtomicU64,
    max_events: usize,
}

impl EventLog {
    pub fn new(max_events: usize) -> Self {
        Self {
            events: Mutex::new(VecDeque::new()),
            next_event_id: AtomicU64::new(1),
            max_events: max_events.max(1),
        }
    }

    pub fn emit(&self, timestamp: Timestamp, payload: EventPayload) -> EventId {
        let id = EventId(self.next_event_id.fetch_add(1, Ordering::SeqCst));
        debug!(event = id.0, payload = ?payload, "event");

        // a poisoned event log only loses audit entries, never balances
        if let Ok(mut events) = self.events.lock() {
            events.push_back(Event::new(id, timestamp, payload));
            while events.len() > self.max_events {
                events.pop_front();
            }
        }
        id
    }

    pub fn recent(&self, count: usize) -> Vec<Event> {
        self.events
            .lock()
            .map(|events| {
                let start = events.len().saturating_sub(count);
                events.iter().skip(start).cloned().collect()
            })
            .unwrap_or_default()
    }

    pub fn all(&self) -> Vec<Event> {
        self.recent(usize::MAX)
    }

    pub fn len(&self) -> usize {
        self.events.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn skipped(entity: &str) -> EventPayload {
        EventPayload::SweepSkipped(SweepSkippedEvent {
            job: SweepJob::Liquidations,
            entity: entity.to_string(),
            reason: "oracle down".to_string(),
        })
    }

    #[test]
    fn log_is_bounded() {
        let log = EventLog::new(2);
        log.emit(Timestamp::from_millis(1), skipped("a"));
        log.emit(Timestamp::from_millis(2), skipped("b"));
        let last = log.emit(Timestamp::from_millis(3), skipped("c"));

        let events = log.all();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].id, last);
        assert_eq!(events[0].timestamp, Timestamp::from_millis(2));
    }

    #[test]
    fn recent_returns_tail() {
        let log = EventLog::new(10);
        for i in 0..5 {
            log.emit(Timestamp::from_millis(i), skipped("x"));
        }
        let recent = log.recent(2);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].id, EventId(4));
    }

    #[test]
    fn events_serialize() {
        let payload = EventPayload::SwapExecuted(SwapExecutedEvent {
            account_id: AccountId(1),
            asset_in: Asset::Usdt,
            amount_in: dec!(1000),
            asset_out: Asset::Btc,
            amount_out: dec!(0.01998),
            fee: dec!(0.00002),
        });
        let json = serde_json::to_string(&payload).unwrap();
        assert!(json.contains("SwapExecuted"));
    }
}
