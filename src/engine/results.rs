// 8.0.2: result types and errors shared by every engine.

use crate::ledger::LedgerError;
use crate::oracle::OracleError;
use crate::scheduler::SweepJob;
use crate::types::{AccountId, Asset, StakeId, Timestamp, TxId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Insufficient {asset} balance on {account}: requested {requested}, available {available}")]
    InsufficientBalance {
        account: AccountId,
        asset: Asset,
        requested: Decimal,
        available: Decimal,
    },

    #[error("{entity} is {state}, cannot {action}")]
    StateConflict {
        entity: String,
        state: String,
        action: &'static str,
    },

    #[error("Quote issued at {issued_at} expired at {now}")]
    QuoteExpired { issued_at: Timestamp, now: Timestamp },

    #[error("Price unavailable: {0}")]
    PriceUnavailable(String),

    #[error("Early exit not allowed before {maturity}")]
    EarlyExitNotAllowed { maturity: Timestamp },

    #[error("{0} already settled")]
    AlreadySettled(String),

    #[error("{0} timed out")]
    Timeout(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("{account} is not allowed to {action}")]
    Unauthorized { account: AccountId, action: &'static str },

    #[error("Storage unavailable")]
    StorageUnavailable,

    #[error("Ledger error: {0}")]
    Ledger(LedgerError),
}

impl EngineError {
    pub fn validation(reason: impl Into<String>) -> Self {
        EngineError::Validation(reason.into())
    }

    pub fn conflict(entity: impl Into<String>, state: impl std::fmt::Debug, action: &'static str) -> Self {
        EngineError::StateConflict {
            entity: entity.into(),
            state: format!("{state:?}"),
            action,
        }
    }

    /// Like `conflict`, for states that are not an enum variant.
    pub fn conflict_in(entity: impl Into<String>, state: &str, action: &'static str) -> Self {
        EngineError::StateConflict {
            entity: entity.into(),
            state: state.to_string(),
            action,
        }
    }
}

impl From<LedgerError> for EngineError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::InsufficientBalance {
                account,
                asset,
                requested,
                available,
            } => EngineError::InsufficientBalance {
                account,
                asset,
                requested,
                available,
            },
            LedgerError::AmountNotPositive(amount) => {
                EngineError::Validation(format!("amount must be positive, got {amount}"))
            }
            LedgerError::InvalidAsset(asset) => EngineError::Validation(format!("asset {asset} not enabled")),
            LedgerError::PrecisionExceeded { asset, amount } => {
                EngineError::Validation(format!("{amount} exceeds {asset} precision"))
            }
            LedgerError::UnknownAccount(id) => EngineError::NotFound(format!("account {id}")),
            LedgerError::StorageUnavailable => EngineError::StorageUnavailable,
            other => EngineError::Ledger(other),
        }
    }
}

impl From<OracleError> for EngineError {
    fn from(err: OracleError) -> Self {
        EngineError::PriceUnavailable(err.to_string())
    }
}

/// Result of a completed conversion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwapResult {
    pub reference: String,
    pub asset_in: Asset,
    pub amount_in: Decimal,
    pub asset_out: Asset,
    pub gross_out: Decimal,
    pub fee: Decimal,
    pub amount_out: Decimal,
    pub tx_ids: Vec<TxId>,
}

/// What leaving a staking position paid out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StakePayout {
    pub stake_id: StakeId,
    pub asset: Asset,
    /// Principal returned, after any penalty.
    pub principal: Decimal,
    pub rewards: Decimal,
    pub penalty: Decimal,
}

/// Outcome of one sweep pass over one job's entities.
#[derive(Debug, Clone)]
pub struct SweepReport {
    pub job: SweepJob,
    pub ran_at: Timestamp,
    /// Entities examined.
    pub examined: usize,
    /// Entities that transitioned (liquidated, settled, cancelled, accrued, synced).
    pub transitioned: usize,
    /// Entities left for the next tick, with why.
    pub skipped: Vec<(String, EngineError)>,
}

impl SweepReport {
    pub fn new(job: SweepJob, ran_at: Timestamp) -> Self {
        Self {
            job,
            ran_at,
            examined: 0,
            transitioned: 0,
            skipped: Vec::new(),
        }
    }

    pub fn skip(&mut self, entity: impl Into<String>, err: EngineError) {
        self.skipped.push((entity.into(), err));
    }

    pub fn is_clean(&self) -> bool {
        self.skipped.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn ledger_errors_map_into_taxonomy() {
        let err: EngineError = LedgerError::InsufficientBalance {
            account: AccountId(1),
            asset: Asset::Usdt,
            requested: dec!(10),
            available: dec!(5),
        }
        .into();
        assert!(matches!(err, EngineError::InsufficientBalance { .. }));

        let err: EngineError = LedgerError::AmountNotPositive(dec!(0)).into();
        assert!(matches!(err, EngineError::Validation(_)));

        let err: EngineError = LedgerError::StorageUnavailable.into();
        assert_eq!(err, EngineError::StorageUnavailable);
    }

    #[test]
    fn oracle_errors_become_price_unavailable() {
        let err: EngineError = OracleError::SourceDown.into();
        assert!(matches!(err, EngineError::PriceUnavailable(_)));
    }
}
