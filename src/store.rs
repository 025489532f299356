use std::{
    collections::{BTreeMap, HashMap},
    fmt,
    sync::Arc,
    time::Duration,
};

use parking_lot::{Mutex, RwLock};
use rust_decimal::Decimal;
use thiserror::Error;
use tracing::debug;

use crate::account::{Account, AccountId};

/// How an external caller names an account: by its assigned id or by its
/// display name. Name lookups are unambiguous because the store enforces
/// name uniqueness at creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccountRef {
    Id(AccountId),
    Name(String),
}

impl fmt::Display for AccountRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccountRef::Id(id) => write!(f, "id {id}"),
            AccountRef::Name(name) => write!(f, "name `{name}`"),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Account name must not be empty")]
    EmptyName,
    #[error("Balance must not be negative, got {0}")]
    NegativeBalance(Decimal),
    #[error("Account name `{0}` is already taken")]
    NameTaken(String),
    #[error("No account with {0}")]
    NotFound(AccountRef),
    #[error("Account {0} is referenced by the transfer ledger and cannot be deleted")]
    Referenced(AccountId),
    #[error("Timed out waiting for exclusive access to account {0}")]
    LockTimeout(AccountId),
}

/// Partial update applied by [`AccountStore::update`]. Absent fields are left
/// untouched; a present `balance` is an absolute correction, not a delta.
#[derive(Debug, Clone, Default)]
pub struct AccountUpdate {
    pub name: Option<String>,
    pub balance: Option<Decimal>,
}

pub(crate) type Slot = Arc<Mutex<Account>>;

#[derive(Default)]
struct Registry {
    accounts: BTreeMap<AccountId, Slot>,
    names: HashMap<String, AccountId>,
    next_id: AccountId,
}

/// Owns all account records. Each account lives in its own exclusively
/// lockable slot so the engine can serialize writers per account; the registry
/// map itself sits behind a separate read-write lock.
///
/// Lock order: an account slot is always acquired *before* the registry lock.
/// Nothing in this module (or the engine) waits on a slot while holding the
/// registry lock, which keeps registry access deadlock free.
#[derive(Default)]
pub struct AccountStore {
    registry: RwLock<Registry>,
}

impl AccountStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Persists a new account under a freshly assigned id.
    pub fn create(&self, name: &str, initial_balance: Decimal) -> Result<Account, StoreError> {
        if name.is_empty() {
            return Err(StoreError::EmptyName);
        }
        if initial_balance < Decimal::ZERO {
            return Err(StoreError::NegativeBalance(initial_balance));
        }

        let mut registry = self.registry.write();
        if registry.names.contains_key(name) {
            return Err(StoreError::NameTaken(name.to_string()));
        }
        registry.next_id += 1;
        let id = registry.next_id;
        let account = Account::new(id, name.to_string(), initial_balance);
        registry.names.insert(name.to_string(), id);
        registry.accounts.insert(id, Arc::new(Mutex::new(account.clone())));
        debug!(id, name, "account created");
        Ok(account)
    }

    /// Snapshot of a single account.
    pub fn get(&self, account: &AccountRef) -> Result<Account, StoreError> {
        let (_, slot) = self.resolve(account)?;
        let snapshot = slot.lock().clone();
        Ok(snapshot)
    }

    /// Snapshot of all accounts, ordered by id ascending. The listing is not
    /// transactionally consistent with in-flight transfers, but every balance
    /// it shows was observed under that account's lock and is never negative.
    pub fn list(&self) -> Vec<Account> {
        let slots: Vec<Slot> = {
            let registry = self.registry.read();
            registry.accounts.values().cloned().collect()
        };
        slots.iter().map(|slot| slot.lock().clone()).collect()
    }

    /// Applies a partial update. A balance correction takes the account's
    /// exclusive lock with the same bounded wait as a transfer, so it cannot
    /// race an in-flight debit or credit.
    pub fn update(
        &self,
        id: AccountId,
        update: AccountUpdate,
        wait: Duration,
    ) -> Result<Account, StoreError> {
        if let Some(name) = &update.name {
            if name.is_empty() {
                return Err(StoreError::EmptyName);
            }
        }
        if let Some(balance) = update.balance {
            if balance < Decimal::ZERO {
                return Err(StoreError::NegativeBalance(balance));
            }
        }

        let (id, slot) = self.resolve(&AccountRef::Id(id))?;
        let mut guard = slot
            .try_lock_for(wait)
            .ok_or(StoreError::LockTimeout(id))?;

        if let Some(name) = update.name {
            if name != guard.name() {
                let mut registry = self.registry.write();
                if registry.names.contains_key(&name) {
                    return Err(StoreError::NameTaken(name));
                }
                registry.names.remove(guard.name());
                registry.names.insert(name.clone(), id);
                drop(registry);
                guard.rename(name);
            }
        }
        if let Some(balance) = update.balance {
            guard.correct_balance(balance);
        }
        Ok(guard.clone())
    }

    /// Removes an account. `is_referenced` is evaluated while the account's
    /// lock is held, so no transfer can slip a new ledger reference in between
    /// the check and the removal.
    pub fn remove(
        &self,
        id: AccountId,
        wait: Duration,
        is_referenced: impl FnOnce(AccountId) -> bool,
    ) -> Result<(), StoreError> {
        let (id, slot) = self.resolve(&AccountRef::Id(id))?;
        let guard = slot
            .try_lock_for(wait)
            .ok_or(StoreError::LockTimeout(id))?;

        if is_referenced(id) {
            return Err(StoreError::Referenced(id));
        }

        let mut registry = self.registry.write();
        // a concurrent remove may have won while we waited on the slot
        match registry.accounts.get(&id) {
            Some(current) if Arc::ptr_eq(current, &slot) => {}
            _ => return Err(StoreError::NotFound(AccountRef::Id(id))),
        }
        registry.accounts.remove(&id);
        registry.names.remove(guard.name());
        debug!(id, "account removed");
        Ok(())
    }

    /// Resolves a reference to the account's id and lock slot.
    pub(crate) fn resolve(&self, account: &AccountRef) -> Result<(AccountId, Slot), StoreError> {
        let registry = self.registry.read();
        let id = match account {
            AccountRef::Id(id) => *id,
            AccountRef::Name(name) => *registry
                .names
                .get(name)
                .ok_or_else(|| StoreError::NotFound(account.clone()))?,
        };
        let slot = registry
            .accounts
            .get(&id)
            .ok_or_else(|| StoreError::NotFound(account.clone()))?;
        Ok((id, slot.clone()))
    }

    /// True while the account is still registered. The engine re-checks this
    /// after locking a slot, since a remove may have raced the resolution.
    pub(crate) fn contains(&self, id: AccountId) -> bool {
        self.registry.read().accounts.contains_key(&id)
    }
}
