// 2.1 transaction.rs: the immutable record. one entry per journal leg, never edited after append.

use crate::types::{AccountId, Asset, HoldId, Timestamp, TxId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// What caused a balance change. Closed set so every consumer handles every case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxKind {
    Deposit,
    Withdraw,
    Swap,
    EscrowHold,
    EscrowRelease,
    EscrowRefund,
    MarginOpen,
    MarginClose,
    Liquidation,
    BinaryOpen,
    BinarySettle,
    Stake,
    Unstake,
    Reward,
    CopyAllocate,
    CopyMirror,
    CopyRedeem,
    Fee,
    Transfer,
}

impl TxKind {
    // the only kinds allowed to create or destroy supply
    pub fn is_external(&self) -> bool {
        matches!(self, TxKind::Deposit | TxKind::Withdraw)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Credit,
    Debit,
}

impl Direction {
    pub fn sign(&self) -> Decimal {
        match self {
            Direction::Credit => Decimal::ONE,
            Direction::Debit => Decimal::NEGATIVE_ONE,
        }
    }
}

/// Which sub-balance of an (account, asset) a leg touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Bucket {
    Available,
    Hold(HoldId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxStatus {
    Completed,
    /// Funds entered a hold and are not spendable.
    Held,
    /// Funds left a hold.
    Released,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TxId,
    pub reference: String,
    pub kind: TxKind,
    pub account: AccountId,
    pub direction: Direction,
    pub amount: Decimal,
    pub asset: Asset,
    pub bucket: Bucket,
    pub counter_asset: Option<Asset>,
    pub counter_amount: Option<Decimal>,
    pub fee: Decimal,
    pub status: TxStatus,
    pub balance_after: Decimal,
    pub timestamp: Timestamp,
}

impl Transaction {
    pub fn signed_amount(&self) -> Decimal {
        self.direction.sign() * self.amount
    }

    pub fn balance_before(&self) -> Decimal {
        self.balance_after - self.signed_amount()
    }
}
