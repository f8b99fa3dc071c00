//! Identity lookups. Authentication lives outside this crate; the engines only need to know
//! whether an account exists and whether it may act as an administrator.

use crate::types::AccountId;
use dashmap::DashMap;

pub trait AccountDirectory: Send + Sync {
    fn exists(&self, account_id: AccountId) -> bool;

    fn is_admin(&self, account_id: AccountId) -> bool;
}

#[derive(Debug, Default)]
pub struct InMemoryDirectory {
    // account -> admin flag
    accounts: DashMap<AccountId, bool>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, account_id: AccountId) {
        self.accounts.entry(account_id).or_insert(false);
    }

    pub fn register_admin(&self, account_id: AccountId) {
        self.accounts.insert(account_id, true);
    }

    pub fn remove(&self, account_id: AccountId) {
        self.accounts.remove(&account_id);
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }
}

impl AccountDirectory for InMemoryDirectory {
    fn exists(&self, account_id: AccountId) -> bool {
        self.accounts.contains_key(&account_id)
    }

    fn is_admin(&self, account_id: AccountId) -> bool {
        self.accounts.get(&account_id).map(|admin| *admin).unwrap_or(false)
    }
}
