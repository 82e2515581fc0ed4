//! Moderation business logic - warnings per user per guild.

use crate::core::{decode_or_default, encode};
use crate::errors::{Error, Result};
use crate::store::RecordStore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, instrument};

/// Collection keyed by guild id, then user id.
pub const COLLECTION: &str = "moderation";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Warning {
    pub reason: String,
    /// User id of the moderator who issued it
    pub moderator: String,
    pub issued_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModerationRecord {
    #[serde(default)]
    pub warnings: Vec<Warning>,
}

/// Records a warning and returns how many the user now has in this guild.
#[instrument(skip(store))]
pub async fn warn(
    store: &RecordStore,
    guild_id: &str,
    user_id: &str,
    moderator_id: &str,
    reason: &str,
) -> Result<usize> {
    let reason = reason.trim();
    if reason.is_empty() {
        return Err(Error::InvalidInput {
            message: "Warning reason cannot be empty".to_string(),
        });
    }

    let warning = Warning {
        reason: reason.to_string(),
        moderator: moderator_id.to_string(),
        issued_at: Utc::now(),
    };
    let record = store
        .try_update(COLLECTION, [guild_id, user_id], Value::Null, move |record| {
            let existing = Some(&record).filter(|r| !r.is_null());
            let mut moderation: ModerationRecord = decode_or_default(existing)?;
            moderation.warnings.push(warning);
            encode(&moderation)
        })
        .await?;

    let count = decode_or_default::<ModerationRecord>(Some(&record))?
        .warnings
        .len();
    info!("User {} in guild {} now has {} warning(s)", user_id, guild_id, count);
    Ok(count)
}

/// Warnings for a user in a guild, oldest first.
pub async fn warnings(store: &RecordStore, guild_id: &str, user_id: &str) -> Result<Vec<Warning>> {
    let record = store.get(COLLECTION, [guild_id, user_id]).await?;
    Ok(decode_or_default::<ModerationRecord>(record.as_ref())?.warnings)
}

/// Clears all warnings. Returns whether the user had any record.
#[instrument(skip(store))]
pub async fn clear_warnings(store: &RecordStore, guild_id: &str, user_id: &str) -> Result<bool> {
    store.delete(COLLECTION, [guild_id, user_id]).await
}
