//! Economy business logic - wallets, bank balances and payments.
//!
//! An account has two amounts: `withdrawnCash`, the spendable wallet, and
//! `balance`, money parked in the bank. Payments always move wallet cash;
//! bank money has to be withdrawn before it can be spent.
//!
//! Amounts are `f64` in memory. Whole amounts are written back as integers,
//! so `60` in an old file stays `60` rather than becoming `60.0`.

use crate::core::{decode_or_default, encode, validate_amount, whole_as_integer};
use crate::errors::{Error, Result};
use crate::store::{KeyPath, RecordStore};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{info, instrument};

/// Collection holding one account per user id.
pub const COLLECTION: &str = "economy";

/// A user's money.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    /// Spendable cash
    #[serde(default, serialize_with = "whole_as_integer")]
    pub withdrawn_cash: f64,
    /// Banked money
    #[serde(default, serialize_with = "whole_as_integer")]
    pub balance: f64,
    /// Fields other commands keep on the account
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Account {
    #[must_use]
    pub fn total(&self) -> f64 {
        self.withdrawn_cash + self.balance
    }
}

/// Reads a user's account; users without one have an empty account.
pub async fn get_account(store: &RecordStore, user_id: &str) -> Result<Account> {
    let record = store.get(COLLECTION, user_id).await?;
    decode_or_default(record.as_ref())
}

/// Credits wallet cash, e.g. a daily reward.
#[instrument(skip(store))]
pub async fn add_cash(store: &RecordStore, user_id: &str, amount: f64) -> Result<Account> {
    validate_amount(amount)?;
    modify_account(store, user_id, move |account| {
        account.withdrawn_cash += amount;
        Ok(())
    })
    .await
}

/// Moves wallet cash into the bank.
#[instrument(skip(store))]
pub async fn deposit(store: &RecordStore, user_id: &str, amount: f64) -> Result<Account> {
    validate_amount(amount)?;
    modify_account(store, user_id, move |account| {
        if account.withdrawn_cash < amount {
            return Err(Error::InsufficientFunds {
                current: account.withdrawn_cash,
                required: amount,
            });
        }
        account.withdrawn_cash -= amount;
        account.balance += amount;
        Ok(())
    })
    .await
}

/// Moves banked money into the wallet.
#[instrument(skip(store))]
pub async fn withdraw(store: &RecordStore, user_id: &str, amount: f64) -> Result<Account> {
    validate_amount(amount)?;
    modify_account(store, user_id, move |account| {
        if account.balance < amount {
            return Err(Error::InsufficientFunds {
                current: account.balance,
                required: amount,
            });
        }
        account.balance -= amount;
        account.withdrawn_cash += amount;
        Ok(())
    })
    .await
}

/// Moves wallet cash from one user to another.
///
/// Both accounts change in one write: either the payment happened in full or
/// not at all. Returns the sender's and recipient's accounts afterwards.
#[instrument(skip(store))]
pub async fn pay(
    store: &RecordStore,
    from_user: &str,
    to_user: &str,
    amount: f64,
) -> Result<(Account, Account)> {
    validate_amount(amount)?;
    let from = KeyPath::from(from_user);
    let to = KeyPath::from(to_user);

    let result = store
        .transact(COLLECTION, move |txn| {
            let mut sender: Account = decode_or_default(txn.get(&from)?)?;
            if sender.withdrawn_cash < amount {
                return Err(Error::InsufficientFunds {
                    current: sender.withdrawn_cash,
                    required: amount,
                });
            }
            sender.withdrawn_cash -= amount;
            txn.set(from.clone(), encode(&sender)?)?;

            let mut recipient: Account = decode_or_default(txn.get(&to)?)?;
            recipient.withdrawn_cash += amount;
            txn.set(to, encode(&recipient)?)?;

            // Paying yourself reads back the credited account.
            let sender: Account = decode_or_default(txn.get(&from)?)?;
            Ok((sender, recipient))
        })
        .await?;

    info!("{} paid {} {:.2}", from_user, to_user, amount);
    Ok(result)
}

/// Richest users first, by wallet plus bank. Ties are ordered by user id.
pub async fn leaderboard(store: &RecordStore, limit: usize) -> Result<Vec<(String, Account)>> {
    let listing = store.list_scope(COLLECTION, &[]).await?;
    let mut accounts = Vec::new();
    for (path, record) in &listing {
        let account: Account = decode_or_default(Some(record))?;
        accounts.push((path.to_string(), account));
    }

    accounts.sort_by(|(a_id, a), (b_id, b)| {
        b.total()
            .total_cmp(&a.total())
            .then_with(|| a_id.cmp(b_id))
    });
    accounts.truncate(limit);
    Ok(accounts)
}

async fn modify_account<F>(store: &RecordStore, user_id: &str, change: F) -> Result<Account>
where
    F: FnOnce(&mut Account) -> Result<()> + Send + 'static,
{
    let record = store
        .try_update(COLLECTION, user_id, Value::Null, move |record| {
            let mut account: Account = if record.is_null() {
                Account::default()
            } else {
                serde_json::from_value(record)?
            };
            change(&mut account)?;
            encode(&account)
        })
        .await?;
    decode_or_default(Some(&record))
}
