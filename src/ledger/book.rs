//! The ledger itself.
//!
//! Accounts live in a concurrent map, each behind its own mutex. A journal locks every
//! account it touches in ascending id order, stages the new balances on copies, and only
//! then publishes the balances and appends the transactions while still holding the locks.
//! Either every leg lands or none does.

use super::account::{Account, SystemAccount, Tier};
use super::journal::Journal;
use super::transaction::{Bucket, Direction, Transaction, TxKind, TxStatus};
use crate::clock::Clock;
use crate::directory::AccountDirectory;
use crate::types::{AccountId, Asset, HoldId, Timestamp, TxId};
use dashmap::DashMap;
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    #[error("Amount must be positive, got {0}")]
    AmountNotPositive(Decimal),

    #[error("Asset {0} is not enabled on this ledger")]
    InvalidAsset(Asset),

    #[error("Amount {amount} exceeds {asset} precision")]
    PrecisionExceeded { asset: Asset, amount: Decimal },

    #[error("Account {0} not found")]
    UnknownAccount(AccountId),

    #[error("Account {0} already exists")]
    AccountExists(AccountId),

    #[error("Insufficient {asset} balance on {account}: requested {requested}, available {available}")]
    InsufficientBalance {
        account: AccountId,
        asset: Asset,
        requested: Decimal,
        available: Decimal,
    },

    #[error("Insufficient hold {hold:?} on {account}: requested {requested}, held {held}")]
    InsufficientHold {
        account: AccountId,
        hold: HoldId,
        requested: Decimal,
        held: Decimal,
    },

    #[error("Journal {reference} does not balance in {asset}")]
    Unbalanced { reference: String, asset: Asset },

    #[error("Journal {0} mixes external and internal legs")]
    BoundaryMismatch(String),

    #[error("Journal {0} has no legs")]
    EmptyJournal(String),

    #[error("Ledger storage unavailable")]
    StorageUnavailable,
}

/// What a successful commit wrote.
#[derive(Debug, Clone)]
pub struct Receipt {
    pub reference: String,
    pub kind: TxKind,
    pub tx_ids: Vec<TxId>,
    pub timestamp: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuditError {
    #[error("Transaction {0:?} does not chain from the previous balance")]
    BrokenChain(TxId),

    #[error("Account {account} {asset} balance {actual} differs from replayed {replayed}")]
    BalanceMismatch {
        account: AccountId,
        asset: Asset,
        actual: Decimal,
        replayed: Decimal,
    },

    #[error("Ledger storage unavailable")]
    StorageUnavailable,
}

type AccountHandle = Arc<Mutex<Account>>;

pub struct Ledger {
    accounts: DashMap<AccountId, AccountHandle>,
    log: Mutex<Vec<Transaction>>,
    next_tx_id: AtomicU64,
    assets: HashSet<Asset>,
    directory: Arc<dyn AccountDirectory>,
    clock: Arc<dyn Clock>,
}

impl Ledger {
    pub fn new(assets: &[Asset], directory: Arc<dyn AccountDirectory>, clock: Arc<dyn Clock>) -> Self {
        let now = clock.now();
        let accounts = DashMap::new();
        for kind in SystemAccount::ALL {
            accounts.insert(kind.id(), Arc::new(Mutex::new(Account::system(kind, now))));
        }
        Self {
            accounts,
            log: Mutex::new(Vec::new()),
            next_tx_id: AtomicU64::new(1),
            assets: assets.iter().copied().collect(),
            directory,
            clock,
        }
    }

    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    /// Registers a wallet for an account known to the directory.
    pub fn open_account(&self, account_id: AccountId, tier: Tier) -> Result<(), LedgerError> {
        if SystemAccount::from_id(account_id).is_some() || !self.directory.exists(account_id) {
            return Err(LedgerError::UnknownAccount(account_id));
        }
        let account = Account::new(account_id, tier, self.clock.now());
        match self.accounts.entry(account_id) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(LedgerError::AccountExists(account_id)),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(Arc::new(Mutex::new(account)));
                debug!(account = %account_id, ?tier, "account opened");
                Ok(())
            }
        }
    }

    pub fn has_account(&self, account_id: AccountId) -> bool {
        self.accounts.contains_key(&account_id)
    }

    pub fn set_tier(&self, account_id: AccountId, tier: Tier) -> Result<(), LedgerError> {
        let handle = self.handle(account_id)?;
        let mut account = lock(&handle)?;
        account.tier = tier;
        Ok(())
    }

    pub fn tier(&self, account_id: AccountId) -> Result<Tier, LedgerError> {
        Ok(self.account(account_id)?.tier)
    }

    /// Snapshot of one account.
    pub fn account(&self, account_id: AccountId) -> Result<Account, LedgerError> {
        let handle = self.handle(account_id)?;
        let account = lock(&handle)?;
        Ok(account.clone())
    }

    pub fn available(&self, account_id: AccountId, asset: Asset) -> Result<Decimal, LedgerError> {
        Ok(self.account(account_id)?.available(asset))
    }

    pub fn held(&self, account_id: AccountId, hold: HoldId, asset: Asset) -> Result<Decimal, LedgerError> {
        Ok(self.account(account_id)?.hold(asset, hold))
    }

    /// External deposit. Creates supply.
    pub fn credit(
        &self,
        account_id: AccountId,
        asset: Asset,
        amount: Decimal,
        reference: impl Into<String>,
    ) -> Result<Receipt, LedgerError> {
        self.commit(Journal::new(TxKind::Deposit, reference).credit(account_id, asset, amount))
    }

    /// External withdrawal. Destroys supply.
    pub fn debit(
        &self,
        account_id: AccountId,
        asset: Asset,
        amount: Decimal,
        reference: impl Into<String>,
    ) -> Result<Receipt, LedgerError> {
        self.commit(Journal::new(TxKind::Withdraw, reference).debit(account_id, asset, amount))
    }

    pub fn transfer(
        &self,
        from: AccountId,
        to: AccountId,
        asset: Asset,
        amount: Decimal,
        kind: TxKind,
        reference: impl Into<String>,
    ) -> Result<Receipt, LedgerError> {
        self.commit(Journal::new(kind, reference).transfer(from, to, asset, amount))
    }

    pub fn hold(
        &self,
        account_id: AccountId,
        asset: Asset,
        amount: Decimal,
        hold: HoldId,
        reference: impl Into<String>,
    ) -> Result<Receipt, LedgerError> {
        self.commit(Journal::new(TxKind::EscrowHold, reference).hold(account_id, asset, amount, hold))
    }

    pub fn release_hold(
        &self,
        owner: AccountId,
        hold: HoldId,
        to: AccountId,
        asset: Asset,
        amount: Decimal,
        reference: impl Into<String>,
    ) -> Result<Receipt, LedgerError> {
        self.commit(Journal::new(TxKind::EscrowRelease, reference).release_hold(owner, hold, to, asset, amount))
    }

    pub fn refund_hold(
        &self,
        owner: AccountId,
        hold: HoldId,
        asset: Asset,
        amount: Decimal,
        reference: impl Into<String>,
    ) -> Result<Receipt, LedgerError> {
        self.commit(Journal::new(TxKind::EscrowRefund, reference).release_hold(owner, hold, owner, asset, amount))
    }

    /// Applies every leg of `journal` or none of them.
    pub fn commit(&self, journal: Journal) -> Result<Receipt, LedgerError> {
        self.validate(&journal)?;

        let ids = journal.accounts();
        let handles: Vec<AccountHandle> = ids.iter().map(|id| self.handle(*id)).collect::<Result<_, _>>()?;
        // ids are sorted, so locks are always taken in the same global order
        let mut guards: Vec<MutexGuard<'_, Account>> = handles.iter().map(lock).collect::<Result<_, _>>()?;

        let mut staged: Vec<Account> = guards.iter().map(|g| (**g).clone()).collect();
        let mut balances_after = Vec::with_capacity(journal.legs.len());
        for leg in &journal.legs {
            let idx = ids
                .binary_search(&leg.account)
                .map_err(|_| LedgerError::UnknownAccount(leg.account))?;
            balances_after.push(staged[idx].apply(leg.asset, leg.bucket, leg.signed_amount())?);
        }

        let timestamp = self.clock.now();
        let mut log = self.log.lock().map_err(|_| LedgerError::StorageUnavailable)?;

        for (guard, account) in guards.iter_mut().zip(staged) {
            **guard = account;
        }

        let mut tx_ids = Vec::with_capacity(journal.legs.len());
        for (leg, balance_after) in journal.legs.iter().zip(balances_after) {
            let id = TxId(self.next_tx_id.fetch_add(1, Ordering::SeqCst));
            let status = match (leg.bucket, leg.direction) {
                (Bucket::Available, _) => TxStatus::Completed,
                (Bucket::Hold(_), Direction::Credit) => TxStatus::Held,
                (Bucket::Hold(_), Direction::Debit) => TxStatus::Released,
            };
            log.push(Transaction {
                id,
                reference: journal.reference.clone(),
                kind: leg.kind.unwrap_or(journal.kind),
                account: leg.account,
                direction: leg.direction,
                amount: leg.amount,
                asset: leg.asset,
                bucket: leg.bucket,
                counter_asset: leg.counter.map(|(a, _)| a),
                counter_amount: leg.counter.map(|(_, v)| v),
                fee: leg.fee,
                status,
                balance_after,
                timestamp,
            });
            tx_ids.push(id);
        }

        debug!(reference = %journal.reference, kind = ?journal.kind, legs = tx_ids.len(), "journal committed");

        Ok(Receipt {
            reference: journal.reference,
            kind: journal.kind,
            tx_ids,
            timestamp,
        })
    }

    fn validate(&self, journal: &Journal) -> Result<(), LedgerError> {
        if journal.is_empty() {
            return Err(LedgerError::EmptyJournal(journal.reference.clone()));
        }
        for leg in &journal.legs {
            if leg.amount <= Decimal::ZERO {
                return Err(LedgerError::AmountNotPositive(leg.amount));
            }
            if !self.assets.contains(&leg.asset) {
                return Err(LedgerError::InvalidAsset(leg.asset));
            }
            if leg.kind.is_some_and(|k| k.is_external() != journal.kind.is_external()) {
                return Err(LedgerError::BoundaryMismatch(journal.reference.clone()));
            }
            if !leg.asset.fits_precision(leg.amount) {
                return Err(LedgerError::PrecisionExceeded {
                    asset: leg.asset,
                    amount: leg.amount,
                });
            }
        }
        if !journal.kind.is_external() {
            if let Some((asset, _)) = journal.net_by_asset().into_iter().find(|(_, net)| !net.is_zero()) {
                return Err(LedgerError::Unbalanced {
                    reference: journal.reference.clone(),
                    asset,
                });
            }
        }
        Ok(())
    }

    fn handle(&self, account_id: AccountId) -> Result<AccountHandle, LedgerError> {
        self.accounts
            .get(&account_id)
            .map(|h| Arc::clone(h.value()))
            .ok_or(LedgerError::UnknownAccount(account_id))
    }

    pub fn transactions(&self) -> Result<Vec<Transaction>, LedgerError> {
        let log = self.log.lock().map_err(|_| LedgerError::StorageUnavailable)?;
        Ok(log.clone())
    }

    pub fn transactions_for(&self, account_id: AccountId) -> Result<Vec<Transaction>, LedgerError> {
        let log = self.log.lock().map_err(|_| LedgerError::StorageUnavailable)?;
        Ok(log.iter().filter(|t| t.account == account_id).cloned().collect())
    }

    pub fn transactions_by_reference(&self, reference: &str) -> Result<Vec<Transaction>, LedgerError> {
        let log = self.log.lock().map_err(|_| LedgerError::StorageUnavailable)?;
        Ok(log.iter().filter(|t| t.reference == reference).cloned().collect())
    }

    pub fn transaction_count(&self) -> Result<usize, LedgerError> {
        Ok(self.log.lock().map_err(|_| LedgerError::StorageUnavailable)?.len())
    }

    /// Consistent snapshot of every account, taken under all account locks.
    pub fn snapshot(&self) -> Result<Vec<Account>, LedgerError> {
        let mut ids: Vec<AccountId> = self.accounts.iter().map(|e| *e.key()).collect();
        ids.sort();
        let handles: Vec<AccountHandle> = ids.iter().map(|id| self.handle(*id)).collect::<Result<_, _>>()?;
        let guards: Vec<MutexGuard<'_, Account>> = handles.iter().map(lock).collect::<Result<_, _>>()?;
        Ok(guards.iter().map(|g| (**g).clone()).collect())
    }

    /// Sum of every bucket of every account, system accounts included.
    pub fn total_supply(&self, asset: Asset) -> Result<Decimal, LedgerError> {
        Ok(self.snapshot()?.iter().map(|a| a.total(asset)).sum())
    }

    /// Deposits minus withdrawals. Equals `total_supply` when nothing leaked.
    pub fn net_external(&self, asset: Asset) -> Result<Decimal, LedgerError> {
        let log = self.log.lock().map_err(|_| LedgerError::StorageUnavailable)?;
        Ok(log
            .iter()
            .filter(|t| t.asset == asset && t.kind.is_external())
            .map(|t| t.signed_amount())
            .sum())
    }

    /// Sum of all internal transaction deltas for one asset. Always zero.
    pub fn internal_delta(&self, asset: Asset) -> Result<Decimal, LedgerError> {
        let log = self.log.lock().map_err(|_| LedgerError::StorageUnavailable)?;
        Ok(log
            .iter()
            .filter(|t| t.asset == asset && !t.kind.is_external())
            .map(|t| t.signed_amount())
            .sum())
    }

    /// Replays the log and checks every `balance_after` and every current balance.
    pub fn audit(&self) -> Result<(), AuditError> {
        let accounts = self.snapshot().map_err(|_| AuditError::StorageUnavailable)?;
        let log = self.transactions().map_err(|_| AuditError::StorageUnavailable)?;

        let mut replayed: HashMap<(AccountId, Asset, Bucket), Decimal> = HashMap::new();
        for tx in &log {
            let slot = replayed.entry((tx.account, tx.asset, tx.bucket)).or_default();
            if *slot + tx.signed_amount() != tx.balance_after {
                return Err(AuditError::BrokenChain(tx.id));
            }
            *slot = tx.balance_after;
        }

        for account in &accounts {
            for (asset, balance) in &account.balances {
                let replayed_total: Decimal = replayed
                    .iter()
                    .filter(|((id, a, _), _)| *id == account.id && a == asset)
                    .map(|(_, v)| *v)
                    .sum();
                if replayed_total != balance.total() {
                    return Err(AuditError::BalanceMismatch {
                        account: account.id,
                        asset: *asset,
                        actual: balance.total(),
                        replayed: replayed_total,
                    });
                }
            }
        }
        Ok(())
    }
}

fn lock(handle: &AccountHandle) -> Result<MutexGuard<'_, Account>, LedgerError> {
    handle.lock().map_err(|_| LedgerError::StorageUnavailable)
}
