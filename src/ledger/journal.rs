// 2.2 journal.rs: a batch of legs the ledger applies atomically.
// internal journals must net to zero per asset. only deposit/withdraw may cross the boundary.

use super::transaction::{Bucket, Direction, TxKind};
use crate::types::{AccountId, Asset, HoldId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Leg {
    pub account: AccountId,
    pub asset: Asset,
    pub bucket: Bucket,
    pub direction: Direction,
    pub amount: Decimal,
    pub counter: Option<(Asset, Decimal)>,
    pub fee: Decimal,
    // recorded kind when it differs from the journal's (fee and reward legs)
    pub kind: Option<TxKind>,
}

impl Leg {
    pub fn new(account: AccountId, asset: Asset, bucket: Bucket, direction: Direction, amount: Decimal) -> Self {
        Self {
            account,
            asset,
            bucket,
            direction,
            amount,
            counter: None,
            fee: Decimal::ZERO,
            kind: None,
        }
    }

    pub fn credit(account: AccountId, asset: Asset, amount: Decimal) -> Self {
        Self::new(account, asset, Bucket::Available, Direction::Credit, amount)
    }

    pub fn debit(account: AccountId, asset: Asset, amount: Decimal) -> Self {
        Self::new(account, asset, Bucket::Available, Direction::Debit, amount)
    }

    pub fn with_counter(mut self, asset: Asset, amount: Decimal) -> Self {
        self.counter = Some((asset, amount));
        self
    }

    pub fn with_fee(mut self, fee: Decimal) -> Self {
        self.fee = fee;
        self
    }

    pub fn with_kind(mut self, kind: TxKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn signed_amount(&self) -> Decimal {
        self.direction.sign() * self.amount
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Journal {
    pub kind: TxKind,
    pub reference: String,
    pub legs: Vec<Leg>,
}

impl Journal {
    pub fn new(kind: TxKind, reference: impl Into<String>) -> Self {
        Self {
            kind,
            reference: reference.into(),
            legs: Vec::new(),
        }
    }

    pub fn push(mut self, leg: Leg) -> Self {
        self.legs.push(leg);
        self
    }

    pub fn credit(self, account: AccountId, asset: Asset, amount: Decimal) -> Self {
        self.push(Leg::credit(account, asset, amount))
    }

    pub fn debit(self, account: AccountId, asset: Asset, amount: Decimal) -> Self {
        self.push(Leg::debit(account, asset, amount))
    }

    pub fn transfer(self, from: AccountId, to: AccountId, asset: Asset, amount: Decimal) -> Self {
        self.debit(from, asset, amount).credit(to, asset, amount)
    }

    // zero-amount transfers are dropped so callers can pass floored payouts directly
    pub fn transfer_nonzero(self, from: AccountId, to: AccountId, asset: Asset, amount: Decimal) -> Self {
        if amount.is_zero() {
            self
        } else {
            self.transfer(from, to, asset, amount)
        }
    }

    /// Like `transfer_nonzero`, but both legs are recorded as `kind`.
    pub fn transfer_as(self, kind: TxKind, from: AccountId, to: AccountId, asset: Asset, amount: Decimal) -> Self {
        if amount.is_zero() {
            self
        } else {
            self.push(Leg::debit(from, asset, amount).with_kind(kind))
                .push(Leg::credit(to, asset, amount).with_kind(kind))
        }
    }

    /// Moves `amount` from the account's available balance into one of its holds.
    pub fn hold(self, account: AccountId, asset: Asset, amount: Decimal, hold: HoldId) -> Self {
        self.debit(account, asset, amount)
            .push(Leg::new(account, asset, Bucket::Hold(hold), Direction::Credit, amount))
    }

    /// Moves `amount` out of `owner`'s hold into `to`'s available balance.
    pub fn release_hold(self, owner: AccountId, hold: HoldId, to: AccountId, asset: Asset, amount: Decimal) -> Self {
        self.push(Leg::new(owner, asset, Bucket::Hold(hold), Direction::Debit, amount))
            .credit(to, asset, amount)
    }

    pub fn is_empty(&self) -> bool {
        self.legs.is_empty()
    }

    /// Net signed amount per asset. Zero everywhere for a balanced journal.
    pub fn net_by_asset(&self) -> HashMap<Asset, Decimal> {
        let mut net: HashMap<Asset, Decimal> = HashMap::new();
        for leg in &self.legs {
            *net.entry(leg.asset).or_default() += leg.signed_amount();
        }
        net
    }

    pub fn is_balanced(&self) -> bool {
        self.net_by_asset().values().all(|v| v.is_zero())
    }

    pub fn accounts(&self) -> Vec<AccountId> {
        let mut ids: Vec<AccountId> = self.legs.iter().map(|l| l.account).collect();
        ids.sort();
        ids.dedup();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn transfer_is_balanced() {
        let journal = Journal::new(TxKind::Transfer, "t1").transfer(AccountId(1), AccountId(2), Asset::Usdt, dec!(5));
        assert_eq!(journal.legs.len(), 2);
        assert!(journal.is_balanced());
    }

    #[test]
    fn single_credit_is_unbalanced() {
        let journal = Journal::new(TxKind::Deposit, "d1").credit(AccountId(1), Asset::Btc, dec!(1));
        assert!(!journal.is_balanced());
        assert_eq!(journal.net_by_asset()[&Asset::Btc], dec!(1));
    }

    #[test]
    fn hold_and_release_stay_balanced() {
        let hold = HoldId(3);
        let journal = Journal::new(TxKind::EscrowHold, "p2p:3")
            .hold(AccountId(1), Asset::Btc, dec!(0.01), hold)
            .release_hold(AccountId(1), hold, AccountId(2), Asset::Btc, dec!(0.01));
        assert!(journal.is_balanced());
        assert_eq!(journal.legs[1].bucket, Bucket::Hold(hold));
    }

    #[test]
    fn accounts_are_sorted_and_unique() {
        let journal = Journal::new(TxKind::Transfer, "x")
            .transfer(AccountId(9), AccountId(2), Asset::Usdt, dec!(1))
            .transfer(AccountId(2), AccountId(9), Asset::Usdt, dec!(1));
        assert_eq!(journal.accounts(), vec![AccountId(2), AccountId(9)]);
    }

    #[test]
    fn tagged_legs_keep_their_kind() {
        let journal = Journal::new(TxKind::Swap, "s").transfer_as(
            TxKind::Fee,
            AccountId(1),
            AccountId(2),
            Asset::Usdt,
            dec!(0.5),
        );
        assert!(journal.legs.iter().all(|l| l.kind == Some(TxKind::Fee)));
        assert!(journal.is_balanced());
    }

    #[test]
    fn zero_transfer_is_skipped() {
        let journal = Journal::new(TxKind::MarginClose, "c").transfer_nonzero(
            AccountId(1),
            AccountId(2),
            Asset::Usdt,
            Decimal::ZERO,
        );
        assert!(journal.is_empty());
    }
}
