//! StateEntry entity model
//!
//! SeaORM entity for the `sitesync_state` table: a versioned key/value store
//! holding the job slot and the staged-artifact records.

use sea_orm::entity::prelude::*;

/// One key/value record. `value` is JSON text; `version` increases on every
/// compare-and-set update.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "sitesync_state")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub key: String,

    #[sea_orm(column_type = "Text")]
    pub value: String,

    pub version: i64,

    /// Entries past this instant are treated as absent
    pub expires_at: Option<DateTimeUtc>,

    pub updated_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub fn is_expired(&self, now: DateTimeUtc) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}
