use rust_decimal::Decimal;
use thiserror::Error;

pub type AccountId = u32;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AccountError {
    #[error("Insufficient funds: balance {balance} cannot cover {requested}")]
    InsufficientFunds {
        balance: Decimal,
        requested: Decimal,
    },
}

/// An account holder's record. Balances are mutated only through
/// [`debit`](Account::debit) and [`credit`](Account::credit) (by the transfer
/// engine, under the account's exclusive lock) or through an explicit balance
/// correction in the store, so a balance below zero is unreachable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    id: AccountId,
    name: String,
    balance: Decimal,
}

impl Account {
    pub(crate) fn new(id: AccountId, name: String, balance: Decimal) -> Self {
        Self { id, name, balance }
    }

    pub fn id(&self) -> AccountId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn balance(&self) -> Decimal {
        self.balance
    }

    pub(crate) fn rename(&mut self, name: String) {
        self.name = name;
    }

    pub(crate) fn correct_balance(&mut self, balance: Decimal) {
        self.balance = balance;
    }

    /// Withdraws `amount`, refusing to let the balance go negative.
    pub(crate) fn debit(&mut self, amount: Decimal) -> Result<(), AccountError> {
        if self.balance < amount {
            return Err(AccountError::InsufficientFunds {
                balance: self.balance,
                requested: amount,
            });
        }
        self.balance -= amount;
        Ok(())
    }

    pub(crate) fn credit(&mut self, amount: Decimal) {
        self.balance += amount;
    }
}
