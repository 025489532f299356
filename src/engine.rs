use std::time::Duration;

use chrono::Utc;
use rust_decimal::Decimal;
use thiserror::Error;
use tracing::{info, warn};

use crate::{
    account::{Account, AccountError, AccountId},
    ledger::{LedgerError, TransferLedger, TransferRecord},
    store::{AccountRef, AccountStore, AccountUpdate, StoreError},
};

/// How long a transfer waits for exclusive access to an account before giving
/// up with [`StoreError::LockTimeout`].
pub const DEFAULT_LOCK_WAIT: Duration = Duration::from_secs(1);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransferError {
    #[error("Transfer amount must be greater than zero, got {0}")]
    NonPositiveAmount(Decimal),
    #[error("Transfer amount {0} is finer than cent precision")]
    SubCentAmount(Decimal),
    #[error("Cannot transfer from an account to itself")]
    SelfTransfer,
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Funds(#[from] AccountError),
    /// The ledger refused the record; both balance mutations of this attempt
    /// were rolled back before the error surfaced. Safe to retry.
    #[error("Transfer aborted and rolled back: {0}")]
    Aborted(#[source] LedgerError),
}

/// Moves funds between accounts and keeps the audit trail. This is the only
/// writer of balances, and the facade the presentation layer consumes.
///
/// A transfer locks both accounts in ascending-id order regardless of which
/// one is sending, so two transfers over the same pair in opposite directions
/// cannot deadlock. Transfers over disjoint pairs share no lock and run in
/// parallel.
pub struct TransferEngine<L> {
    store: AccountStore,
    ledger: L,
    lock_wait: Duration,
}

impl<L> TransferEngine<L>
where
    L: TransferLedger,
{
    pub fn new(ledger: L) -> Self {
        Self {
            store: AccountStore::new(),
            ledger,
            lock_wait: DEFAULT_LOCK_WAIT,
        }
    }

    /// Bounds the wait for an account lock. Attempts that exceed it fail with
    /// [`StoreError::LockTimeout`] before any mutation, and can be retried.
    pub fn with_lock_wait(mut self, wait: Duration) -> Self {
        self.lock_wait = wait;
        self
    }

    pub fn create_account(&self, name: &str, initial_balance: Decimal) -> Result<Account, StoreError> {
        self.store.create(name, initial_balance)
    }

    pub fn account(&self, account: &AccountRef) -> Result<Account, StoreError> {
        self.store.get(account)
    }

    /// All accounts, ordered by id ascending.
    pub fn accounts(&self) -> Vec<Account> {
        self.store.list()
    }

    pub fn update_account(&self, id: AccountId, update: AccountUpdate) -> Result<Account, StoreError> {
        self.store.update(id, update, self.lock_wait)
    }

    /// Deletes an account unless the audit trail references it. The reference
    /// check runs under the account's lock, so it cannot race a transfer that
    /// would add a reference.
    pub fn delete_account(&self, id: AccountId) -> Result<(), StoreError> {
        self.store
            .remove(id, self.lock_wait, |id| self.ledger.references(id))
    }

    /// The audit trail, in insertion order.
    pub fn transfers(&self) -> Vec<TransferRecord> {
        self.ledger.list()
    }

    /// Moves `amount` from `sender` to `receiver` as one atomic unit: debit,
    /// credit and ledger append all become visible together or not at all.
    pub fn transfer(
        &self,
        sender: &AccountRef,
        receiver: &AccountRef,
        amount: Decimal,
    ) -> Result<TransferRecord, TransferError> {
        if amount <= Decimal::ZERO {
            return Err(TransferError::NonPositiveAmount(amount));
        }
        if amount.normalize().scale() > 2 {
            return Err(TransferError::SubCentAmount(amount));
        }

        let (sender_id, sender_slot) = self.store.resolve(sender)?;
        let (receiver_id, receiver_slot) = self.store.resolve(receiver)?;
        if sender_id == receiver_id {
            return Err(TransferError::SelfTransfer);
        }

        // Both locks in ascending-id order, each with a bounded wait. If the
        // second acquisition times out the first guard is dropped on return,
        // with nothing mutated yet.
        let (first_id, first_slot, second_id, second_slot) = if sender_id < receiver_id {
            (sender_id, &sender_slot, receiver_id, &receiver_slot)
        } else {
            (receiver_id, &receiver_slot, sender_id, &sender_slot)
        };
        let Some(first_guard) = first_slot.try_lock_for(self.lock_wait) else {
            warn!(account = first_id, "timed out waiting for account lock");
            return Err(StoreError::LockTimeout(first_id).into());
        };
        let Some(second_guard) = second_slot.try_lock_for(self.lock_wait) else {
            warn!(account = second_id, "timed out waiting for account lock");
            return Err(StoreError::LockTimeout(second_id).into());
        };
        let (mut sender_guard, mut receiver_guard) = if sender_id < receiver_id {
            (first_guard, second_guard)
        } else {
            (second_guard, first_guard)
        };

        // The slots were resolved before the locks were taken; a concurrent
        // delete may have unregistered either account in between.
        for id in [sender_id, receiver_id] {
            if !self.store.contains(id) {
                return Err(StoreError::NotFound(AccountRef::Id(id)).into());
            }
        }

        let sender_before = sender_guard.balance();
        let receiver_before = receiver_guard.balance();

        // balance re-read under the lock, not the snapshot from resolution
        sender_guard.debit(amount)?;
        receiver_guard.credit(amount);

        match self
            .ledger
            .append(sender_id, receiver_id, amount, Utc::now())
        {
            Ok(record) => {
                info!(
                    transfer = record.id(),
                    sender = sender_id,
                    receiver = receiver_id,
                    %amount,
                    "transfer applied"
                );
                Ok(record)
            }
            Err(err) => {
                // still holding both guards, so nobody saw the half-state
                sender_guard.correct_balance(sender_before);
                receiver_guard.correct_balance(receiver_before);
                warn!(sender = sender_id, receiver = receiver_id, %err, "transfer aborted");
                Err(TransferError::Aborted(err))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use chrono::{DateTime, Utc};
    use rust_decimal_macros::dec;

    use crate::ledger::in_memory::InMemoryTransferLedger;

    use super::*;

    fn engine() -> TransferEngine<InMemoryTransferLedger> {
        TransferEngine::new(InMemoryTransferLedger::new())
    }

    fn by_name(name: &str) -> AccountRef {
        AccountRef::Name(name.to_string())
    }

    #[test]
    fn worked_example() {
        let engine = engine();
        engine.create_account("alice", dec!(100.00)).unwrap();
        engine.create_account("bob", dec!(0.00)).unwrap();

        let record = engine
            .transfer(&by_name("alice"), &by_name("bob"), dec!(40.00))
            .unwrap();
        assert_eq!(record.sender(), 1);
        assert_eq!(record.receiver(), 2);
        assert_eq!(record.amount(), dec!(40.00));

        assert_eq!(engine.account(&AccountRef::Id(1)).unwrap().balance(), dec!(60.00));
        assert_eq!(engine.account(&AccountRef::Id(2)).unwrap().balance(), dec!(40.00));

        let err = engine
            .transfer(&by_name("alice"), &by_name("bob"), dec!(1000.00))
            .unwrap_err();
        assert_eq!(
            err,
            TransferError::Funds(AccountError::InsufficientFunds {
                balance: dec!(60.00),
                requested: dec!(1000.00),
            })
        );

        // the failed attempt left balances and the trail untouched
        assert_eq!(engine.account(&AccountRef::Id(1)).unwrap().balance(), dec!(60.00));
        assert_eq!(engine.account(&AccountRef::Id(2)).unwrap().balance(), dec!(40.00));
        assert_eq!(engine.transfers().len(), 1);
    }

    #[test]
    fn rejects_bad_amounts() {
        let engine = engine();
        engine.create_account("alice", dec!(10.00)).unwrap();
        engine.create_account("bob", dec!(0.00)).unwrap();

        for (amount, expected) in [
            (dec!(0.00), TransferError::NonPositiveAmount(dec!(0.00))),
            (dec!(-5.00), TransferError::NonPositiveAmount(dec!(-5.00))),
            (dec!(0.001), TransferError::SubCentAmount(dec!(0.001))),
        ] {
            let err = engine
                .transfer(&by_name("alice"), &by_name("bob"), amount)
                .unwrap_err();
            assert_eq!(err, expected);
        }
        assert!(engine.transfers().is_empty());
        assert_eq!(engine.account(&by_name("alice")).unwrap().balance(), dec!(10.00));
    }

    #[test]
    fn trailing_zeros_do_not_count_as_precision() {
        let engine = engine();
        engine.create_account("alice", dec!(10.00)).unwrap();
        engine.create_account("bob", dec!(0.00)).unwrap();
        engine
            .transfer(&by_name("alice"), &by_name("bob"), dec!(1.500))
            .unwrap();
        assert_eq!(engine.account(&by_name("bob")).unwrap().balance(), dec!(1.50));
    }

    #[test]
    fn self_transfer_is_rejected_across_ref_kinds() {
        let engine = engine();
        let alice = engine.create_account("alice", dec!(10.00)).unwrap();

        let err = engine
            .transfer(&AccountRef::Id(alice.id()), &by_name("alice"), dec!(1.00))
            .unwrap_err();
        assert_eq!(err, TransferError::SelfTransfer);
        assert!(engine.transfers().is_empty());
    }

    #[test]
    fn unknown_accounts_are_rejected() {
        let engine = engine();
        engine.create_account("alice", dec!(10.00)).unwrap();

        let err = engine
            .transfer(&by_name("alice"), &by_name("bob"), dec!(1.00))
            .unwrap_err();
        assert_eq!(
            err,
            TransferError::Store(StoreError::NotFound(by_name("bob")))
        );

        let err = engine
            .transfer(&AccountRef::Id(99), &by_name("alice"), dec!(1.00))
            .unwrap_err();
        assert_eq!(
            err,
            TransferError::Store(StoreError::NotFound(AccountRef::Id(99)))
        );
    }

    #[test]
    fn transfers_conserve_the_total() {
        let engine = engine();
        engine.create_account("alice", dec!(100.00)).unwrap();
        engine.create_account("bob", dec!(50.00)).unwrap();
        engine.create_account("carol", dec!(7.25)).unwrap();
        let total_before: Decimal = engine.accounts().iter().map(Account::balance).sum();

        engine.transfer(&by_name("alice"), &by_name("bob"), dec!(12.50)).unwrap();
        engine.transfer(&by_name("bob"), &by_name("carol"), dec!(60.00)).unwrap();
        engine.transfer(&by_name("carol"), &by_name("alice"), dec!(0.25)).unwrap();

        let total_after: Decimal = engine.accounts().iter().map(Account::balance).sum();
        assert_eq!(total_before, total_after);
        assert_eq!(engine.transfers().len(), 3);
    }

    #[test]
    fn concurrent_fan_out_drains_the_sender_exactly() {
        const WORKERS: u32 = 8;
        let amount = dec!(5.00);

        let engine = engine();
        let sender_id = engine
            .create_account("hub", amount * Decimal::from(WORKERS))
            .unwrap()
            .id();
        let receivers: Vec<AccountId> = (0..WORKERS)
            .map(|i| engine.create_account(&format!("spoke-{i}"), dec!(0.00)).unwrap().id())
            .collect();

        thread::scope(|scope| {
            for &receiver in &receivers {
                let engine = &engine;
                scope.spawn(move || {
                    engine
                        .transfer(&AccountRef::Id(sender_id), &AccountRef::Id(receiver), amount)
                        .unwrap();
                });
            }
        });

        assert_eq!(
            engine.account(&AccountRef::Id(sender_id)).unwrap().balance(),
            Decimal::ZERO,
        );
        for receiver in receivers {
            assert_eq!(engine.account(&AccountRef::Id(receiver)).unwrap().balance(), amount);
        }
        assert_eq!(engine.transfers().len(), WORKERS as usize);
    }

    #[test]
    fn concurrent_fan_in_loses_no_credit() {
        const WORKERS: u32 = 8;
        let amount = dec!(1.00);

        let engine = engine();
        let sink_id = engine.create_account("sink", dec!(0.00)).unwrap().id();
        let senders: Vec<AccountId> = (0..WORKERS)
            .map(|i| engine.create_account(&format!("payer-{i}"), amount).unwrap().id())
            .collect();

        thread::scope(|scope| {
            for &sender in &senders {
                let engine = &engine;
                scope.spawn(move || {
                    engine
                        .transfer(&AccountRef::Id(sender), &AccountRef::Id(sink_id), amount)
                        .unwrap();
                });
            }
        });

        assert_eq!(
            engine.account(&AccountRef::Id(sink_id)).unwrap().balance(),
            amount * Decimal::from(WORKERS),
        );
    }

    #[test]
    fn opposite_directions_cannot_deadlock() {
        const ROUNDS: usize = 50;

        let engine = engine();
        let a = engine.create_account("a", dec!(1000.00)).unwrap().id();
        let b = engine.create_account("b", dec!(1000.00)).unwrap().id();

        thread::scope(|scope| {
            scope.spawn(|| {
                for _ in 0..ROUNDS {
                    engine
                        .transfer(&AccountRef::Id(a), &AccountRef::Id(b), dec!(1.00))
                        .unwrap();
                }
            });
            scope.spawn(|| {
                for _ in 0..ROUNDS {
                    engine
                        .transfer(&AccountRef::Id(b), &AccountRef::Id(a), dec!(1.00))
                        .unwrap();
                }
            });
        });

        // equal traffic both ways, so both balances end where they started
        assert_eq!(engine.account(&AccountRef::Id(a)).unwrap().balance(), dec!(1000.00));
        assert_eq!(engine.account(&AccountRef::Id(b)).unwrap().balance(), dec!(1000.00));
        assert_eq!(engine.transfers().len(), 2 * ROUNDS);
    }

    #[test]
    fn lock_timeout_leaves_no_mutation() {
        let engine = engine().with_lock_wait(Duration::from_millis(10));
        engine.create_account("alice", dec!(10.00)).unwrap();
        engine.create_account("bob", dec!(0.00)).unwrap();

        // pin the receiver's slot; the sender lock (lower id) is acquired
        // first and must be released again on the way out
        let (_, slot) = engine.store.resolve(&by_name("bob")).unwrap();
        let _held = slot.lock();

        let err = engine
            .transfer(&by_name("alice"), &by_name("bob"), dec!(1.00))
            .unwrap_err();
        assert_eq!(err, TransferError::Store(StoreError::LockTimeout(2)));
        drop(_held);

        assert_eq!(engine.account(&by_name("alice")).unwrap().balance(), dec!(10.00));
        assert_eq!(engine.account(&by_name("bob")).unwrap().balance(), dec!(0.00));
        assert!(engine.transfers().is_empty());

        // the sender lock was released, so a retry goes through
        engine
            .transfer(&by_name("alice"), &by_name("bob"), dec!(1.00))
            .unwrap();
    }

    struct FailingLedger;

    impl TransferLedger for FailingLedger {
        fn append(
            &self,
            _sender: AccountId,
            _receiver: AccountId,
            _amount: Decimal,
            _timestamp: DateTime<Utc>,
        ) -> Result<TransferRecord, LedgerError> {
            Err(LedgerError::Storage("append refused".to_string()))
        }

        fn list(&self) -> Vec<TransferRecord> {
            Vec::new()
        }

        fn references(&self, _account: AccountId) -> bool {
            false
        }
    }

    #[test]
    fn append_failure_rolls_both_balances_back() {
        let engine = TransferEngine::new(FailingLedger);
        engine.create_account("alice", dec!(10.00)).unwrap();
        engine.create_account("bob", dec!(2.00)).unwrap();

        let err = engine
            .transfer(&by_name("alice"), &by_name("bob"), dec!(4.00))
            .unwrap_err();
        assert_eq!(
            err,
            TransferError::Aborted(LedgerError::Storage("append refused".to_string()))
        );

        assert_eq!(engine.account(&by_name("alice")).unwrap().balance(), dec!(10.00));
        assert_eq!(engine.account(&by_name("bob")).unwrap().balance(), dec!(2.00));
    }

    #[test]
    fn delete_is_blocked_by_audit_references() {
        let engine = engine();
        let alice = engine.create_account("alice", dec!(10.00)).unwrap();
        let bob = engine.create_account("bob", dec!(0.00)).unwrap();
        let carol = engine.create_account("carol", dec!(0.00)).unwrap();

        engine
            .transfer(&AccountRef::Id(alice.id()), &AccountRef::Id(bob.id()), dec!(1.00))
            .unwrap();

        assert_eq!(
            engine.delete_account(alice.id()).unwrap_err(),
            StoreError::Referenced(alice.id()),
        );
        assert_eq!(
            engine.delete_account(bob.id()).unwrap_err(),
            StoreError::Referenced(bob.id()),
        );
        // carol never took part in a transfer
        engine.delete_account(carol.id()).unwrap();
        assert_eq!(
            engine.delete_account(carol.id()).unwrap_err(),
            StoreError::NotFound(AccountRef::Id(carol.id())),
        );
    }

    #[test]
    fn records_keep_creation_order() {
        let engine = engine();
        engine.create_account("alice", dec!(10.00)).unwrap();
        engine.create_account("bob", dec!(10.00)).unwrap();

        for _ in 0..3 {
            engine.transfer(&by_name("alice"), &by_name("bob"), dec!(1.00)).unwrap();
        }
        let ids: Vec<_> = engine.transfers().iter().map(TransferRecord::id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }
}
