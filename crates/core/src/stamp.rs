//! Record stamping: creation/update timestamps and the soft-delete flag.
//!
//! These are plain transforms applied at the call sites that persist a record,
//! so every insert and every save is stamped the same way:
//!
//! - insert: `created_at` and `updated_at` set, `deleted = false`
//! - update: `updated_at` set
//! - delete: `deleted = true`, `updated_at` set (the record is retained)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Bookkeeping fields shared by stamped records.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stamps {
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub deleted: bool,
}

/// A record that carries [`Stamps`].
pub trait Stamped {
    fn stamps(&self) -> &Stamps;
    fn stamps_mut(&mut self) -> &mut Stamps;

    /// True while the record has not been soft-deleted.
    fn is_live(&self) -> bool {
        !self.stamps().deleted
    }
}

/// Stamp a record that is about to be inserted.
pub fn stamp_insert<E: Stamped>(mut entity: E, now: DateTime<Utc>) -> E {
    let stamps = entity.stamps_mut();
    stamps.created_at = Some(now);
    stamps.updated_at = Some(now);
    stamps.deleted = false;
    entity
}

/// Stamp a record that is about to be saved over an existing one.
pub fn stamp_update<E: Stamped>(mut entity: E, now: DateTime<Utc>) -> E {
    entity.stamps_mut().updated_at = Some(now);
    entity
}

/// Mark a record deleted and stamp it. The caller still has to save it.
pub fn soft_delete<E: Stamped>(mut entity: E, now: DateTime<Utc>) -> E {
    entity.stamps_mut().deleted = true;
    stamp_update(entity, now)
}
