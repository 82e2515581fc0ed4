//! XP business logic
//!
//! Users earn experience per guild. Each level needs `5l² + 50l + 100` XP to
//! clear, and XP left over after a level-up carries into the next level.

use crate::core::{decode_or_default, encode};
use crate::errors::{Error, Result};
use crate::store::{KeyPath, RecordStore};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

/// Collection keyed by guild id, then user id.
pub const COLLECTION: &str = "xp";

/// A user's standing in one guild.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct XpRecord {
    /// XP earned towards the next level
    pub xp: u64,
    pub level: u32,
    /// XP earned overall
    pub total_xp: u64,
}

/// Result of awarding XP.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LevelProgress {
    pub record: XpRecord,
    /// Levels gained by this award; zero when no level-up happened
    pub levels_gained: u32,
}

impl LevelProgress {
    #[must_use]
    pub const fn leveled_up(&self) -> bool {
        self.levels_gained > 0
    }
}

/// XP needed to go from `level` to `level + 1`.
///
/// Saturates at `u64::MAX` for levels far beyond anything earned normally;
/// old data files are loaded as they are and may hold such levels.
#[must_use]
pub fn xp_for_next_level(level: u32) -> u64 {
    let l = u64::from(level);
    5u64.saturating_mul(l)
        .saturating_mul(l)
        .saturating_add(50 * l)
        .saturating_add(100)
}

pub async fn get_record(store: &RecordStore, guild_id: &str, user_id: &str) -> Result<XpRecord> {
    let record = store.get(COLLECTION, [guild_id, user_id]).await?;
    decode_or_default(record.as_ref())
}

/// Adds `amount` XP to a user in a guild, levelling up as many times as it covers.
#[instrument(skip(store))]
pub async fn award_xp(
    store: &RecordStore,
    guild_id: &str,
    user_id: &str,
    amount: u64,
) -> Result<LevelProgress> {
    if amount == 0 {
        return Err(Error::InvalidAmount { amount: 0.0 });
    }
    let key = KeyPath::from([guild_id, user_id]);

    let progress = store
        .transact(COLLECTION, move |txn| {
            let mut record: XpRecord = decode_or_default(txn.get(&key)?)?;
            record.xp = record.xp.saturating_add(amount);
            record.total_xp = record.total_xp.saturating_add(amount);

            let mut levels_gained = 0;
            while record.level < u32::MAX && record.xp >= xp_for_next_level(record.level) {
                record.xp -= xp_for_next_level(record.level);
                record.level += 1;
                levels_gained += 1;
            }

            txn.set(key, encode(&record)?)?;
            Ok(LevelProgress {
                record,
                levels_gained,
            })
        })
        .await?;

    if progress.leveled_up() {
        info!(
            "User {} reached level {} in guild {}",
            user_id, progress.record.level, guild_id
        );
    }
    Ok(progress)
}

/// Users of one guild ordered by overall XP, highest first.
pub async fn rank_list(
    store: &RecordStore,
    guild_id: &str,
    limit: usize,
) -> Result<Vec<(String, XpRecord)>> {
    let listing = store.list_scope(COLLECTION, &[guild_id]).await?;
    let mut ranked = Vec::new();
    for (path, record) in &listing {
        let user_id = path.key().unwrap_or_default().to_string();
        ranked.push((user_id, decode_or_default::<XpRecord>(Some(record))?));
    }

    ranked.sort_by(|(a_id, a), (b_id, b)| {
        b.total_xp
            .cmp(&a.total_xp)
            .then_with(|| a_id.cmp(b_id))
    });
    ranked.truncate(limit);
    Ok(ranked)
}
