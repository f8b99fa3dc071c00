//! Account balances.
//!
//! An account holds, per asset, a spendable `available` amount plus any number of
//! non-spendable holds keyed by [`HoldId`]. Holds are still owned by the account but can
//! only be moved by an explicit hold leg.

use super::book::LedgerError;
use super::transaction::Bucket;
use crate::types::{AccountId, Asset, Bps, HoldId, Timestamp};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Fee tier. Higher tiers get a discount off every percentage fee.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub enum Tier {
    #[default]
    Standard,
    Silver,
    Gold,
    Vip,
}

impl Tier {
    pub fn fee_discount(&self) -> Bps {
        match self {
            Tier::Standard => Bps::new(0),
            Tier::Silver => Bps::new(1),
            Tier::Gold => Bps::new(2),
            Tier::Vip => Bps::new(4),
        }
    }
}

/// Accounts owned by the platform itself. Their ids sit at the top of the id space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SystemAccount {
    /// House counterparty for swaps, derivative pnl and staking rewards. May go negative.
    Treasury,
    FeeSink,
    MarginPool,
    OptionsPool,
    StakingPool,
    CopyPool,
}

impl SystemAccount {
    pub const ALL: [SystemAccount; 6] = [
        SystemAccount::Treasury,
        SystemAccount::FeeSink,
        SystemAccount::MarginPool,
        SystemAccount::OptionsPool,
        SystemAccount::StakingPool,
        SystemAccount::CopyPool,
    ];

    pub fn id(&self) -> AccountId {
        let offset = match self {
            SystemAccount::Treasury => 0,
            SystemAccount::FeeSink => 1,
            SystemAccount::MarginPool => 2,
            SystemAccount::OptionsPool => 3,
            SystemAccount::StakingPool => 4,
            SystemAccount::CopyPool => 5,
        };
        AccountId(u64::MAX - offset)
    }

    pub fn from_id(id: AccountId) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.id() == id)
    }

    pub fn allows_negative(&self) -> bool {
        matches!(self, SystemAccount::Treasury)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssetBalance {
    pub available: Decimal,
    pub holds: BTreeMap<HoldId, Decimal>,
}

impl AssetBalance {
    pub fn held(&self) -> Decimal {
        self.holds.values().copied().sum()
    }

    pub fn total(&self) -> Decimal {
        self.available + self.held()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub tier: Tier,
    pub balances: HashMap<Asset, AssetBalance>,
    pub allow_negative: bool,
    pub created_at: Timestamp,
}

impl Account {
    pub fn new(id: AccountId, tier: Tier, timestamp: Timestamp) -> Self {
        Self {
            id,
            tier,
            balances: HashMap::new(),
            allow_negative: false,
            created_at: timestamp,
        }
    }

    pub fn system(kind: SystemAccount, timestamp: Timestamp) -> Self {
        let mut account = Self::new(kind.id(), Tier::Standard, timestamp);
        account.allow_negative = kind.allows_negative();
        account
    }

    pub fn available(&self, asset: Asset) -> Decimal {
        self.balances.get(&asset).map(|b| b.available).unwrap_or(Decimal::ZERO)
    }

    pub fn held(&self, asset: Asset) -> Decimal {
        self.balances.get(&asset).map(|b| b.held()).unwrap_or(Decimal::ZERO)
    }

    pub fn hold(&self, asset: Asset, hold: HoldId) -> Decimal {
        self.balances
            .get(&asset)
            .and_then(|b| b.holds.get(&hold).copied())
            .unwrap_or(Decimal::ZERO)
    }

    pub fn total(&self, asset: Asset) -> Decimal {
        self.balances.get(&asset).map(|b| b.total()).unwrap_or(Decimal::ZERO)
    }

    pub fn bucket_balance(&self, asset: Asset, bucket: Bucket) -> Decimal {
        match bucket {
            Bucket::Available => self.available(asset),
            Bucket::Hold(hold) => self.hold(asset, hold),
        }
    }

    /// Applies a signed delta to one bucket and returns the bucket's new balance.
    /// Leaves the account untouched on error.
    pub fn apply(&mut self, asset: Asset, bucket: Bucket, delta: Decimal) -> Result<Decimal, LedgerError> {
        let current = self.bucket_balance(asset, bucket);
        let next = current + delta;

        match bucket {
            Bucket::Available => {
                if next < Decimal::ZERO && !self.allow_negative {
                    return Err(LedgerError::InsufficientBalance {
                        account: self.id,
                        asset,
                        requested: -delta,
                        available: current,
                    });
                }
                self.balances.entry(asset).or_default().available = next;
            }
            Bucket::Hold(hold) => {
                if next < Decimal::ZERO {
                    return Err(LedgerError::InsufficientHold {
                        account: self.id,
                        hold,
                        requested: -delta,
                        held: current,
                    });
                }
                let balance = self.balances.entry(asset).or_default();
                if next.is_zero() {
                    balance.holds.remove(&hold);
                } else {
                    balance.holds.insert(hold, next);
                }
            }
        }
        Ok(next)
    }
}
