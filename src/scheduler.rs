//! Periodic sweep queue.
//!
//! Time-driven transitions (liquidations, binary expiry, escrow timeouts, reward
//! persistence, copy syncs) are never triggered by the caller. Each job sits in a min-heap
//! keyed by its next due time; `due` pops everything whose time has come and reschedules
//! it one interval later. Time comes from the injected clock, so tests drive it by hand.

use crate::clock::Clock;
use crate::config::SchedulerConfig;
use crate::types::Timestamp;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SweepJob {
    Liquidations,
    BinarySettlement,
    EscrowTimeouts,
    StakingRewards,
    CopyTrading,
}

impl SweepJob {
    pub const ALL: [SweepJob; 5] = [
        SweepJob::Liquidations,
        SweepJob::BinarySettlement,
        SweepJob::EscrowTimeouts,
        SweepJob::StakingRewards,
        SweepJob::CopyTrading,
    ];
}

pub struct Scheduler {
    queue: Mutex<BinaryHeap<Reverse<(Timestamp, SweepJob)>>>,
    config: SchedulerConfig,
    clock: Arc<dyn Clock>,
}

impl Scheduler {
    /// Every job is due immediately.
    pub fn new(config: SchedulerConfig, clock: Arc<dyn Clock>) -> Self {
        let now = clock.now();
        let queue = SweepJob::ALL.iter().map(|job| Reverse((now, *job))).collect();
        Self {
            queue: Mutex::new(queue),
            config,
            clock,
        }
    }

    /// Pops the jobs due now, in due-time order, and schedules their next run.
    pub fn due(&self) -> Vec<SweepJob> {
        let now = self.clock.now();
        let mut queue = self.queue();

        let mut ready = Vec::new();
        while let Some(Reverse((at, job))) = queue.peek().copied() {
            if at > now {
                break;
            }
            queue.pop();
            ready.push(job);
        }
        for job in &ready {
            queue.push(Reverse((now.plus_millis(self.config.interval(*job)), *job)));
        }
        ready
    }

    pub fn next_due(&self) -> Option<Timestamp> {
        self.queue().peek().map(|Reverse((at, _))| *at)
    }

    // a poisoned queue still holds a valid schedule
    fn queue(&self) -> MutexGuard<'_, BinaryHeap<Reverse<(Timestamp, SweepJob)>>> {
        self.queue.lock().unwrap_or_else(|poisoned: PoisonError<_>| {
            warn!("sweep queue lock poisoned, recovering");
            poisoned.into_inner()
        })
    }
}
