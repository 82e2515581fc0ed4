//! Core business logic - framework-agnostic operations over the record store.
//!
//! Each function takes the store and the command's input and returns the data
//! a reply is built from. None of them touch the filesystem directly.

/// Wallet and bank balances, payments, leaderboard
pub mod economy;
/// Per-user item counts
pub mod inventory;
/// Warnings issued by moderators
pub mod moderation;
/// Per-guild experience and levels
pub mod xp;

use crate::errors::{Error, Result};
use crate::store::Record;
use serde::de::DeserializeOwned;
use serde::{Serialize, Serializer};

// Largest magnitude below which every whole f64 is an exact integer.
const MAX_EXACT_INTEGER: f64 = 9_007_199_254_740_992.0;

/// Decodes a stored record, or the type's default when there is none.
pub(crate) fn decode_or_default<T>(record: Option<&Record>) -> Result<T>
where
    T: DeserializeOwned + Default,
{
    match record {
        Some(value) => serde_json::from_value(value.clone()).map_err(Error::from),
        None => Ok(T::default()),
    }
}

pub(crate) fn encode<T: Serialize>(value: &T) -> Result<Record> {
    serde_json::to_value(value).map_err(Error::from)
}

/// Rejects zero, negative and non-finite amounts.
pub(crate) fn validate_amount(amount: f64) -> Result<()> {
    if amount.is_finite() && amount > 0.0 {
        Ok(())
    } else {
        Err(Error::InvalidAmount { amount })
    }
}

/// Writes whole money amounts as JSON integers, as the old data files hold
/// them, and anything fractional as a float.
#[allow(clippy::trivially_copy_pass_by_ref, clippy::cast_possible_truncation)]
pub(crate) fn whole_as_integer<S: Serializer>(
    amount: &f64,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    if amount.fract() == 0.0 && amount.abs() < MAX_EXACT_INTEGER {
        serializer.serialize_i64(*amount as i64)
    } else {
        serializer.serialize_f64(*amount)
    }
}
