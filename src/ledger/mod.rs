// 2.0: ledger core. the only code allowed to change a balance.
// every change is a journal of legs, applied atomically and recorded as immutable transactions.

mod account;
mod book;
mod journal;
mod transaction;

pub use account::{Account, AssetBalance, SystemAccount, Tier};
pub use book::{AuditError, Ledger, LedgerError, Receipt};
pub use journal::{Journal, Leg};
pub use transaction::{Bucket, Direction, Transaction, TxKind, TxStatus};
